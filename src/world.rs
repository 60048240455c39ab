// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: entity allocation and per-component storages

use std::cell::UnsafeCell;
use std::ptr::NonNull;

use slotmap::SlotMap;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::component::{component_info, Bundle, Component, ComponentId};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::query::{Query, QueryData};
use crate::reflection::ReflectValue;
use crate::storage::{Storage, StorageBase};

/// Owning slot of one storage.
///
/// Queries take `&mut World` and then resolve several storages through
/// `&World`, so the box sits behind an `UnsafeCell`.
pub(crate) struct StorageCell(UnsafeCell<Box<dyn StorageBase>>);

impl StorageCell {
    fn new(storage: Box<dyn StorageBase>) -> Self {
        Self(UnsafeCell::new(storage))
    }

    fn get(&self) -> &dyn StorageBase {
        // SAFETY: shared access; mutation through `as_ptr` only happens while
        // a query holds the world exclusively
        unsafe { &**self.0.get() }
    }

    fn get_mut(&mut self) -> &mut dyn StorageBase {
        self.0.get_mut().as_mut()
    }

    fn as_ptr(&self) -> NonNull<dyn StorageBase> {
        // SAFETY: the cell pointer is never null and the boxed storage does
        // not move while the world is alive
        unsafe { NonNull::from(&mut **self.0.get()) }
    }
}

/// Central ECS world
///
/// Owns every entity id and one storage per component type. Storages are
/// created on the first insert of their component and live as long as the
/// world.
#[derive(Default)]
pub struct World {
    entities: SlotMap<EntityId, ()>,
    /// Indexed by `ComponentId::index`
    storages: Vec<Option<StorageCell>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an entity and attach components through the returned builder
    ///
    /// ```ignore
    /// let entity = world
    ///     .create_entity()
    ///     .with(Transform::default())
    ///     .with(TagC)
    ///     .build()?;
    /// ```
    pub fn create_entity(&mut self) -> EntityBuilder<'_> {
        let entity = self.spawn_empty();
        EntityBuilder {
            world: self,
            entity,
            error: None,
        }
    }

    /// Spawn an entity without components
    pub fn spawn_empty(&mut self) -> EntityId {
        self.entities.insert(())
    }

    /// Spawn a new entity with the given bundle of components.
    ///
    /// On failure the entity is despawned again.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<EntityId> {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.spawn", entity_count = self.entities.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let entity = self.spawn_empty();
        if let Err(err) = bundle.insert_into(self, entity) {
            self.despawn(entity)?;
            return Err(err);
        }
        Ok(entity)
    }

    /// Check if an entity is alive
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains_key(entity)
    }

    /// Despawn entity immediately
    ///
    /// Removes the entity and all its components from the world.
    pub fn despawn(&mut self, entity: EntityId) -> Result<()> {
        if self.entities.remove(entity).is_none() {
            return Err(EcsError::EntityNotFound);
        }
        for cell in self.storages.iter_mut().flatten() {
            cell.get_mut().remove(entity);
        }
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Attach (or overwrite) a component
    pub fn insert<T: Component>(&mut self, entity: EntityId, component: T) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(EcsError::EntityNotFound);
        }
        self.ensure_storage::<T>()?.insert(entity, component);
        Ok(())
    }

    /// Attach a component known only by id, described by named values.
    ///
    /// Used for script components; the storage is created from the
    /// registry on first use.
    pub fn insert_dynamic(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        values: Vec<(String, ReflectValue)>,
    ) -> Result<()> {
        if !self.is_alive(entity) {
            return Err(EcsError::EntityNotFound);
        }
        if let Some(storage) = self.get_storage_by_id_mut(component) {
            return storage.insert_dynamic(entity, values);
        }
        // Unknown ids never reach the slot table
        let info = component_info(component).ok_or(EcsError::ComponentNotRegistered(component))?;
        self.slot_mut(component)
            .insert(StorageCell::new(info.create_storage()))
            .get_mut()
            .insert_dynamic(entity, values)
    }

    /// Detach a component. Returns `false` if the entity did not have it.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> bool {
        self.remove_by_id(entity, ComponentId::of::<T>())
    }

    pub fn remove_by_id(&mut self, entity: EntityId, component: ComponentId) -> bool {
        self.get_storage_by_id_mut(component)
            .is_some_and(|storage| storage.remove(entity))
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.get_storage::<T>()
            .is_some_and(|storage| storage.has(entity))
    }

    /// Immutable component access, never flags the entity changed
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.get_storage::<T>()?.get(entity)
    }

    /// Mutable component access, flags the entity when its storage traces changes
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.get_storage_mut::<T>()?.get_mut(entity)
    }

    pub fn get_storage<T: Component>(&self) -> Option<&T::Storage> {
        self.get_storage_by_id(ComponentId::of::<T>())?
            .as_any()
            .downcast_ref()
    }

    pub fn get_storage_mut<T: Component>(&mut self) -> Option<&mut T::Storage> {
        self.get_storage_by_id_mut(ComponentId::of::<T>())?
            .as_any_mut()
            .downcast_mut()
    }

    pub fn get_storage_by_id(&self, component: ComponentId) -> Option<&dyn StorageBase> {
        self.storages
            .get(component.index())?
            .as_ref()
            .map(StorageCell::get)
    }

    pub fn get_storage_by_id_mut(&mut self, component: ComponentId) -> Option<&mut dyn StorageBase> {
        self.storages
            .get_mut(component.index())?
            .as_mut()
            .map(StorageCell::get_mut)
    }

    /// Clear the changed flags of every storage
    pub fn flush_changed(&mut self) {
        for cell in self.storages.iter_mut().flatten() {
            cell.get_mut().flush_changed();
        }
    }

    /// Build a typed query.
    ///
    /// # Panics
    /// Panics if two terms of `F` would fetch the same component mutably;
    /// use [`try_query`](Self::try_query) to get the error instead.
    pub fn query<F: QueryData>(&mut self) -> Query<'_, F> {
        Query::new(self)
    }

    pub fn try_query<F: QueryData>(&mut self) -> Result<Query<'_, F>> {
        Query::try_new(self)
    }

    fn slot_mut(&mut self, component: ComponentId) -> &mut Option<StorageCell> {
        let index = component.index();
        if index >= self.storages.len() {
            self.storages.resize_with(index + 1, || None);
        }
        &mut self.storages[index]
    }

    fn ensure_storage<T: Component>(&mut self) -> Result<&mut T::Storage> {
        self.slot_mut(ComponentId::of::<T>())
            .get_or_insert_with(|| StorageCell::new(Box::new(T::Storage::default())))
            .get_mut()
            .as_any_mut()
            .downcast_mut()
            .ok_or_else(|| EcsError::StorageTypeMismatch(T::component_name().to_string()))
    }

    /// Raw pointer to the typed storage of `T`
    pub(crate) fn storage_ptr<T: Component>(&self) -> Option<NonNull<T::Storage>> {
        let mut ptr = self.storage_ptr_by_id(ComponentId::of::<T>())?;
        // SAFETY: the pointer comes from a live cell; the reference is dropped
        // before returning
        let storage = unsafe { ptr.as_mut() }.as_any_mut().downcast_mut::<T::Storage>()?;
        Some(NonNull::from(storage))
    }

    /// Raw pointer to a type-erased storage
    pub(crate) fn storage_ptr_by_id(&self, component: ComponentId) -> Option<NonNull<dyn StorageBase>> {
        self.storages
            .get(component.index())?
            .as_ref()
            .map(StorageCell::as_ptr)
    }
}

/// Attaches components to a freshly created entity
///
/// The first failing `with` is kept and reported by [`build`](Self::build);
/// later calls are skipped.
pub struct EntityBuilder<'w> {
    world: &'w mut World,
    entity: EntityId,
    error: Option<EcsError>,
}

impl EntityBuilder<'_> {
    pub fn with<T: Component>(mut self, component: T) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.world.insert(self.entity, component) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Attach a component by id, e.g. a script component
    pub fn with_dynamic(mut self, component: ComponentId, values: Vec<(String, ReflectValue)>) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.world.insert_dynamic(self.entity, component, values) {
                self.error = Some(err);
            }
        }
        self
    }

    pub fn id(&self) -> EntityId {
        self.entity
    }

    /// Finish the entity. On error it is despawned again.
    pub fn build(self) -> Result<EntityId> {
        match self.error {
            None => Ok(self.entity),
            Some(err) => {
                self.world.despawn(self.entity)?;
                Err(err)
            }
        }
    }
}
