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

//! Component, registry and Bundle
//!
//! Components are data attached to entities. Each component type picks the
//! storage that holds it and gets a process-wide [`ComponentId`] on first use.
//! Bundles group multiple components for spawning.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::reflection::Reflect;
use crate::script::{ScriptComponentDescriptor, ScriptStorage};
use crate::storage::{Storage, StorageBase};
use crate::world::World;

/// Identifier of a registered component type, stable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Id of `T`, registering it on first use.
    pub fn of<T: Component>() -> Self {
        register_component::<T>()
    }

    /// Build an id from its raw value. The id may be unregistered.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Slot of this component in per-world storage tables
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_registered(self) -> bool {
        ComponentRegistry::global().read().info(self).is_some()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Component data type.
///
/// Use [`impl_component!`](crate::impl_component) rather than implementing
/// this by hand; it also provides the [`Reflect`] impl.
pub trait Component: Reflect + Sized {
    /// Storage holding every instance of this component
    type Storage: Storage<Self> + Default;

    /// Name used for registry lookups
    fn component_name() -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Creates an empty storage for one component
pub type StorageFactory = Arc<dyn Fn() -> Box<dyn StorageBase> + Send + Sync>;

/// Registry entry
#[derive(Clone)]
pub struct ComponentInfo {
    id: ComponentId,
    name: String,
    type_id: Option<TypeId>,
    script: Option<Arc<ScriptComponentDescriptor>>,
    factory: StorageFactory,
}

impl ComponentInfo {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type of native components; `None` for script components
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn script_descriptor(&self) -> Option<&Arc<ScriptComponentDescriptor>> {
        self.script.as_ref()
    }

    pub fn create_storage(&self) -> Box<dyn StorageBase> {
        (self.factory)()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("script", &self.script.is_some())
            .finish()
    }
}

/// Name and type lookup for component ids.
///
/// The process-wide instance is reached through [`ComponentRegistry::global`];
/// the free functions in this module wrap it.
#[derive(Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: AHashMap<TypeId, ComponentId>,
    by_name: AHashMap<String, ComponentId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static RwLock<ComponentRegistry> {
        static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();
        REGISTRY.get_or_init(|| RwLock::new(ComponentRegistry::new()))
    }

    /// Register `T` (idempotent)
    pub fn register<T: Component>(&mut self) -> ComponentId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }

        let factory: StorageFactory =
            Arc::new(|| -> Box<dyn StorageBase> { Box::new(T::Storage::default()) });
        let id = self.push(T::component_name().to_string(), Some(TypeId::of::<T>()), None, factory);
        self.by_type.insert(TypeId::of::<T>(), id);
        id
    }

    /// Register a component whose shape is a runtime field list
    pub fn register_script(&mut self, descriptor: ScriptComponentDescriptor) -> Result<ComponentId> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(EcsError::DuplicateComponent(descriptor.name));
        }
        descriptor.validate()?;

        let name = descriptor.name.clone();
        let descriptor = Arc::new(descriptor);
        let shared = Arc::clone(&descriptor);
        let factory: StorageFactory = Arc::new(move || -> Box<dyn StorageBase> {
            Box::new(ScriptStorage::new(Arc::clone(&shared)))
        });
        Ok(self.push(name, None, Some(descriptor), factory))
    }

    fn push(
        &mut self,
        name: String,
        type_id: Option<TypeId>,
        script: Option<Arc<ScriptComponentDescriptor>>,
        factory: StorageFactory,
    ) -> ComponentId {
        let id = ComponentId(self.infos.len() as u32);
        // First registration keeps the name when two types share a short name
        self.by_name.entry(name.clone()).or_insert(id);
        self.infos.push(ComponentInfo {
            id,
            name,
            type_id,
            script,
            factory,
        });
        id
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn id_by_name(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Register `T` in the global registry and return its id
pub fn register_component<T: Component>() -> ComponentId {
    let registry = ComponentRegistry::global();
    if let Some(id) = registry.read().id_of::<T>() {
        return id;
    }
    registry.write().register::<T>()
}

/// Register a script component in the global registry
pub fn register_script_component(descriptor: ScriptComponentDescriptor) -> Result<ComponentId> {
    ComponentRegistry::global().write().register_script(descriptor)
}

/// Look up a component id by its registered name
pub fn component_id_by_name(name: &str) -> Option<ComponentId> {
    ComponentRegistry::global().read().id_by_name(name)
}

/// Snapshot of a registry entry
pub fn component_info(id: ComponentId) -> Option<ComponentInfo> {
    ComponentRegistry::global().read().info(id).cloned()
}

/// Implement [`Component`] and [`Reflect`](crate::reflection::Reflect) for a type.
///
/// ```ignore
/// impl_component!(Tag);
/// impl_component!(Hit, storage: BatchStorage<Hit>);
/// impl_component!(Transform, fields: [translation, scale]);
/// impl_component!(Sensor, storage: MyStorage<Sensor>, fields: [range]);
/// ```
///
/// Listed fields must be `Clone` and convertible to and from
/// [`ReflectValue`](crate::reflection::ReflectValue).
#[macro_export]
macro_rules! impl_component {
    ($t:ty) => {
        $crate::impl_component!($t, storage: $crate::storage::DenseVecStorage<$t>, fields: []);
    };
    ($t:ty, storage: $s:ty) => {
        $crate::impl_component!($t, storage: $s, fields: []);
    };
    ($t:ty, fields: [$($f:ident),* $(,)?]) => {
        $crate::impl_component!($t, storage: $crate::storage::DenseVecStorage<$t>, fields: [$($f),*]);
    };
    ($t:ty, storage: $s:ty, fields: [$($f:ident),* $(,)?]) => {
        impl $crate::component::Component for $t {
            type Storage = $s;
        }

        impl $crate::reflection::Reflect for $t {
            fn field_names(&self) -> Vec<&str> {
                vec![$(stringify!($f)),*]
            }

            fn get_field(&self, name: &str) -> Option<$crate::reflection::ReflectValue> {
                match name {
                    $(stringify!($f) => Some($crate::reflection::ReflectValue::from(self.$f.clone())),)*
                    _ => None,
                }
            }

            fn set_field(&mut self, name: &str, value: $crate::reflection::ReflectValue) -> bool {
                match name {
                    $(stringify!($f) => match ::core::convert::TryFrom::try_from(value) {
                        Ok(field) => {
                            self.$f = field;
                            true
                        }
                        Err(_) => false,
                    },)*
                    _ => {
                        let _ = value;
                        false
                    }
                }
            }
        }
    };
}

/// Bundle of components
///
/// Allows spawning entities with multiple components at once.
pub trait Bundle: Send + Sync + 'static {
    /// Insert every component of the bundle for `entity`
    fn insert_into(self, world: &mut World, entity: EntityId) -> Result<()>;
}

// Single components spawn as 1-tuples: a blanket `impl<T: Component>` would
// overlap with the tuple impls.
macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            #[allow(non_snake_case)]
            fn insert_into(self, world: &mut World, entity: EntityId) -> Result<()> {
                let ($($T,)*) = self;
                $(world.insert(entity, $T)?;)*
                Ok(())
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
