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

//! Component storages with change tracking
//!
//! A storage owns every instance of one component type. Presence only changes
//! through `insert`/`remove`. Each storage carries a [`ChangeTracker`]: while
//! tracing is enabled, mutable fetches, inserts and explicit notifications
//! flag the entity, and the flag stays set until the next flush.
//! Immutable fetches never flag anything.

use std::any::Any;
use std::slice;

use rustc_hash::FxHashMap;

use crate::bitset::BitSet;
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::reflection::{Reflect, ReflectValue};

/// Per-entity changed flags owned by one storage
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    enabled: bool,
    changed: BitSet,
}

impl ChangeTracker {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle marking. Already set flags survive until [`flush`](Self::flush).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Flag `entity` if tracing is enabled
    pub fn notify(&mut self, entity: EntityId) {
        if self.enabled {
            self.changed.set(entity.index());
        }
    }

    pub fn is_changed(&self, entity: EntityId) -> bool {
        self.changed.contains(entity.index())
    }

    /// Drop the flag of an entity that left the storage
    pub fn forget(&mut self, entity: EntityId) {
        self.changed.remove(entity.index());
    }

    pub fn flush(&mut self) {
        self.changed.clear();
    }

    pub fn changed_count(&self) -> usize {
        self.changed.count_ones()
    }
}

/// Type-erased storage interface
pub trait StorageBase: Any + Send {
    /// Name of the storage type, for diagnostics
    fn storage_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn has(&self, entity: EntityId) -> bool;

    /// Delete the entity's instance(s). Returns `false` if there were none.
    fn remove(&mut self, entity: EntityId) -> bool;

    /// Empty the storage and flush all changed flags
    fn clear(&mut self);

    /// Entities currently holding this component
    fn stored_entities(&self) -> &[EntityId];

    fn len(&self) -> usize {
        self.stored_entities().len()
    }

    fn is_empty(&self) -> bool {
        self.stored_entities().is_empty()
    }

    fn change_tracker(&self) -> &ChangeTracker;

    fn change_tracker_mut(&mut self) -> &mut ChangeTracker;

    fn set_tracing_change(&mut self, enabled: bool) {
        self.change_tracker_mut().set_enabled(enabled);
    }

    fn is_tracing_change(&self) -> bool {
        self.change_tracker().is_enabled()
    }

    /// Flag `entity` while tracing. Entities without the component are ignored.
    fn notify_changed(&mut self, entity: EntityId) {
        if self.has(entity) {
            self.change_tracker_mut().notify(entity);
        }
    }

    fn is_changed(&self, entity: EntityId) -> bool {
        self.change_tracker().is_changed(entity)
    }

    fn flush_changed(&mut self) {
        self.change_tracker_mut().flush();
    }

    /// Immutable erased fetch
    fn get_reflect(&self, entity: EntityId) -> Option<&dyn Reflect>;

    /// Mutable erased fetch; flags the entity like a typed mutable fetch
    fn get_reflect_mut(&mut self, entity: EntityId) -> Option<&mut dyn Reflect>;

    /// Insert an instance described by named values
    fn insert_dynamic(&mut self, _entity: EntityId, _values: Vec<(String, ReflectValue)>) -> Result<()> {
        Err(EcsError::UnsupportedOperation(format!(
            "{} does not accept dynamic values",
            self.storage_name()
        )))
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Typed storage interface
pub trait Storage<T>: StorageBase {
    /// Create or overwrite the entity's instance (batch storages append)
    fn insert(&mut self, entity: EntityId, value: T);

    /// Immutable fetch, never flags the entity
    fn get(&self, entity: EntityId) -> Option<&T>;

    /// Mutable fetch, flags the entity when tracing is enabled
    fn get_mut(&mut self, entity: EntityId) -> Option<&mut T>;

    /// Every instance held for the entity
    fn get_batch(&self, entity: EntityId) -> &[T] {
        self.get(entity).map(slice::from_ref).unwrap_or(&[])
    }

    /// Mutable view of every instance, flags the entity like `get_mut`
    fn get_batch_mut(&mut self, entity: EntityId) -> &mut [T] {
        match self.get_mut(entity) {
            Some(value) => slice::from_mut(value),
            None => Default::default(),
        }
    }
}

/// Sparse-set storage: one dense `Vec<T>` plus an entity index
pub struct DenseVecStorage<T> {
    data: Vec<T>,
    entities: Vec<EntityId>,
    index: FxHashMap<EntityId, usize>,
    tracker: ChangeTracker,
}

impl<T> DenseVecStorage<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            entities: Vec::with_capacity(capacity),
            index: FxHashMap::default(),
            tracker: ChangeTracker::default(),
        }
    }

    /// Iterate instances without flagging them
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.entities.iter().copied().zip(self.data.iter())
    }
}

impl<T> Default for DenseVecStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflect> StorageBase for DenseVecStorage<T> {
    fn has(&self, entity: EntityId) -> bool {
        self.index.contains_key(&entity)
    }

    fn remove(&mut self, entity: EntityId) -> bool {
        self.tracker.forget(entity);
        let Some(row) = self.index.remove(&entity) else {
            return false;
        };
        self.data.swap_remove(row);
        self.entities.swap_remove(row);
        if let Some(&moved) = self.entities.get(row) {
            self.index.insert(moved, row);
        }
        true
    }

    fn clear(&mut self) {
        self.data.clear();
        self.entities.clear();
        self.index.clear();
        self.tracker.flush();
    }

    fn stored_entities(&self) -> &[EntityId] {
        &self.entities
    }

    fn change_tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn change_tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn get_reflect(&self, entity: EntityId) -> Option<&dyn Reflect> {
        self.get(entity).map(|value| value as &dyn Reflect)
    }

    fn get_reflect_mut(&mut self, entity: EntityId) -> Option<&mut dyn Reflect> {
        self.get_mut(entity).map(|value| value as &mut dyn Reflect)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Reflect> Storage<T> for DenseVecStorage<T> {
    fn insert(&mut self, entity: EntityId, value: T) {
        match self.index.get(&entity) {
            Some(&row) => self.data[row] = value,
            None => {
                self.index.insert(entity, self.data.len());
                self.data.push(value);
                self.entities.push(entity);
            }
        }
        self.tracker.notify(entity);
    }

    fn get(&self, entity: EntityId) -> Option<&T> {
        let &row = self.index.get(&entity)?;
        self.data.get(row)
    }

    fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        let &row = self.index.get(&entity)?;
        self.tracker.notify(entity);
        self.data.get_mut(row)
    }
}

/// Per-entity capacity of an unbounded [`BatchStorage`]
pub const UNBOUNDED: usize = usize::MAX;

/// One-to-many storage: each entity holds 0..`LIMIT` contiguous instances.
///
/// `insert` appends; instances past `LIMIT` are dropped. Typed `get` returns
/// the first instance, the batch accessors return all of them in insertion
/// order.
pub struct BatchStorage<T, const LIMIT: usize = UNBOUNDED> {
    batches: Vec<Vec<T>>,
    entities: Vec<EntityId>,
    index: FxHashMap<EntityId, usize>,
    tracker: ChangeTracker,
}

impl<T, const LIMIT: usize> BatchStorage<T, LIMIT> {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            entities: Vec::new(),
            index: FxHashMap::default(),
            tracker: ChangeTracker::default(),
        }
    }

    /// Maximum instances kept per entity
    pub const fn limit() -> usize {
        LIMIT
    }

    /// Number of instances held for the entity
    pub fn batch_len(&self, entity: EntityId) -> usize {
        self.index
            .get(&entity)
            .map_or(0, |&row| self.batches[row].len())
    }
}

impl<T, const LIMIT: usize> Default for BatchStorage<T, LIMIT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflect, const LIMIT: usize> StorageBase for BatchStorage<T, LIMIT> {
    fn has(&self, entity: EntityId) -> bool {
        self.index.contains_key(&entity)
    }

    fn remove(&mut self, entity: EntityId) -> bool {
        self.tracker.forget(entity);
        let Some(row) = self.index.remove(&entity) else {
            return false;
        };
        self.batches.swap_remove(row);
        self.entities.swap_remove(row);
        if let Some(&moved) = self.entities.get(row) {
            self.index.insert(moved, row);
        }
        true
    }

    fn clear(&mut self) {
        self.batches.clear();
        self.entities.clear();
        self.index.clear();
        self.tracker.flush();
    }

    fn stored_entities(&self) -> &[EntityId] {
        &self.entities
    }

    fn change_tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn change_tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn get_reflect(&self, entity: EntityId) -> Option<&dyn Reflect> {
        self.get(entity).map(|value| value as &dyn Reflect)
    }

    fn get_reflect_mut(&mut self, entity: EntityId) -> Option<&mut dyn Reflect> {
        self.get_mut(entity).map(|value| value as &mut dyn Reflect)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Reflect, const LIMIT: usize> Storage<T> for BatchStorage<T, LIMIT> {
    fn insert(&mut self, entity: EntityId, value: T) {
        if LIMIT == 0 {
            return;
        }
        match self.index.get(&entity) {
            Some(&row) => {
                let batch = &mut self.batches[row];
                if batch.len() >= LIMIT {
                    #[cfg(feature = "profiling")]
                    tracing::trace!(limit = LIMIT, "batch full, instance dropped");
                    return;
                }
                batch.push(value);
            }
            None => {
                self.index.insert(entity, self.batches.len());
                self.batches.push(vec![value]);
                self.entities.push(entity);
            }
        }
        self.tracker.notify(entity);
    }

    fn get(&self, entity: EntityId) -> Option<&T> {
        self.get_batch(entity).first()
    }

    fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.get_batch_mut(entity).first_mut()
    }

    fn get_batch(&self, entity: EntityId) -> &[T] {
        match self.index.get(&entity) {
            Some(&row) => &self.batches[row],
            None => &[],
        }
    }

    fn get_batch_mut(&mut self, entity: EntityId) -> &mut [T] {
        match self.index.get(&entity) {
            Some(&row) => {
                self.tracker.notify(entity);
                &mut self.batches[row]
            }
            None => Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);
    crate::impl_component!(Health);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Hit(u32);
    crate::impl_component!(Hit, storage: BatchStorage<Hit>);

    fn entities(n: usize) -> Vec<EntityId> {
        let mut ids: SlotMap<EntityId, ()> = SlotMap::with_key();
        (0..n).map(|_| ids.insert(())).collect()
    }

    #[test]
    fn test_dense_insert_get_overwrite() {
        let e = entities(2);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.insert(e[0], Health(10));
        storage.insert(e[1], Health(20));
        storage.insert(e[0], Health(15));

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get(e[0]), Some(&Health(15)));
        assert_eq!(storage.stored_entities(), &[e[0], e[1]]);
    }

    #[test]
    fn test_dense_swap_remove_keeps_index() {
        let e = entities(3);
        let mut storage = DenseVecStorage::<Health>::new();
        for (i, &entity) in e.iter().enumerate() {
            storage.insert(entity, Health(i as u32));
        }

        assert!(storage.remove(e[0]));
        assert!(!storage.remove(e[0]));
        assert!(!storage.has(e[0]));
        assert_eq!(storage.get(e[2]), Some(&Health(2)));
        assert_eq!(storage.get(e[1]), Some(&Health(1)));
        assert_eq!(storage.iter().count(), 2);
    }

    #[test]
    fn test_only_mutable_fetch_flags_entity() {
        let e = entities(2);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.insert(e[0], Health(1));
        storage.insert(e[1], Health(2));

        // Tracing off: nothing is flagged
        assert!(storage.get_mut(e[0]).is_some());
        storage.notify_changed(e[0]);
        assert!(!storage.is_changed(e[0]));

        storage.set_tracing_change(true);
        assert!(storage.get(e[0]).is_some());
        assert!(!storage.is_changed(e[0]));

        assert!(storage.get_mut(e[0]).is_some());
        assert!(storage.is_changed(e[0]));
        assert!(!storage.is_changed(e[1]));

        storage.notify_changed(e[1]);
        assert!(storage.is_changed(e[1]));

        storage.flush_changed();
        assert!(!storage.is_changed(e[0]));
        assert!(!storage.is_changed(e[1]));
    }

    #[test]
    fn test_absent_entity_never_keeps_a_flag() {
        let e = entities(2);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.set_tracing_change(true);
        storage.insert(e[0], Health(1));

        storage.notify_changed(e[1]);
        assert!(!storage.is_changed(e[1]));

        storage.change_tracker_mut().notify(e[1]);
        assert!(!storage.remove(e[1]));
        assert!(!storage.is_changed(e[1]));
        assert!(storage.is_changed(e[0]));
    }

    #[test]
    fn test_insert_flags_when_tracing() {
        let e = entities(2);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.insert(e[0], Health(1));
        storage.set_tracing_change(true);
        storage.insert(e[1], Health(2));

        assert!(!storage.is_changed(e[0]));
        assert!(storage.is_changed(e[1]));
    }

    #[test]
    fn test_flags_stay_set_after_disabling() {
        let e = entities(1);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.set_tracing_change(true);
        storage.insert(e[0], Health(1));
        storage.set_tracing_change(false);

        assert!(storage.is_changed(e[0]));
        assert_eq!(storage.change_tracker().changed_count(), 1);
    }

    #[test]
    fn test_remove_and_clear_drop_flags() {
        let e = entities(2);
        let mut storage = DenseVecStorage::<Health>::new();
        storage.set_tracing_change(true);
        storage.insert(e[0], Health(1));
        storage.insert(e[1], Health(2));

        storage.remove(e[0]);
        assert!(!storage.is_changed(e[0]));
        assert!(storage.is_changed(e[1]));

        storage.clear();
        assert!(storage.is_empty());
        assert!(!storage.is_changed(e[1]));
    }

    #[test]
    fn test_batch_keeps_insertion_order() {
        let e = entities(2);
        let mut storage = BatchStorage::<Hit>::new();
        storage.insert(e[0], Hit(1));
        storage.insert(e[0], Hit(2));
        storage.insert(e[0], Hit(3));

        assert_eq!(storage.get_batch(e[0]), &[Hit(1), Hit(2), Hit(3)]);
        assert_eq!(storage.get(e[0]), Some(&Hit(1)));
        assert!(storage.get_batch(e[1]).is_empty());
        assert_eq!(storage.stored_entities(), &[e[0]]);
    }

    #[test]
    fn test_fixed_batch_drops_overflow() {
        let e = entities(1);
        let mut storage = BatchStorage::<Hit, 2>::new();
        for i in 0..4 {
            storage.insert(e[0], Hit(i));
        }

        assert_eq!(BatchStorage::<Hit, 2>::limit(), 2);
        assert_eq!(storage.batch_len(e[0]), 2);
        assert_eq!(storage.get_batch(e[0]), &[Hit(0), Hit(1)]);
    }

    #[test]
    fn test_batch_mutable_view_flags_entity() {
        let e = entities(1);
        let mut storage = BatchStorage::<Hit>::new();
        storage.insert(e[0], Hit(1));
        storage.set_tracing_change(true);
        assert!(!storage.is_changed(e[0]));

        storage.get_batch_mut(e[0])[0].0 = 9;
        assert!(storage.is_changed(e[0]));
        assert_eq!(storage.get(e[0]), Some(&Hit(9)));
    }

    #[test]
    fn test_plain_storage_rejects_dynamic_insert() {
        let e = entities(1);
        let mut storage = DenseVecStorage::<Health>::new();
        let err = storage.insert_dynamic(e[0], Vec::new()).unwrap_err();
        assert!(matches!(err, EcsError::UnsupportedOperation(_)));
    }
}
