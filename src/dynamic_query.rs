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

//! Runtime-built queries
//!
//! [`DynamicQuery`] collects terms by [`ComponentId`] and
//! [`begin`](DynamicQuery::begin) turns them into a [`DynamicQueryCursor`]
//! that walks the matches and exposes one [`ComponentAccess`] per term, in
//! declaration order. Field access goes through [`Reflect`].
//!
//! ```ignore
//! let mut query = DynamicQuery::new();
//! query.with_component(transform_id, true).without_component(tag_id);
//! let mut cursor = query.begin(&mut world)?;
//! while cursor.is_not_done() {
//!     if let Some(access) = cursor.get_access_mut(0) {
//!         access.set("scale", ReflectValue::Float(2.0));
//!     }
//!     cursor.next();
//! }
//! ```

use std::marker::PhantomData;
use std::ptr::NonNull;

#[cfg(feature = "profiling")]
use tracing::{debug, info_span};

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::filter::{check_aliasing, FilterNode};
use crate::reflection::{Reflect, ReflectValue};
use crate::storage::StorageBase;
use crate::system::SystemExeInfo;
use crate::world::World;

/// Filter applied by one dynamic term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    With,
    Without,
    Maybe,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicTerm {
    pub component: ComponentId,
    pub kind: TermKind,
    pub mutable: bool,
}

impl DynamicTerm {
    pub fn describe(&self) -> FilterNode {
        let with = FilterNode::with(self.component, self.mutable);
        match self.kind {
            TermKind::With => with,
            TermKind::Without => {
                FilterNode::Without(Box::new(FilterNode::with(self.component, false)))
            }
            TermKind::Maybe => FilterNode::Maybe(Box::new(with)),
            TermKind::Changed => FilterNode::Changed(Box::new(with)),
        }
    }

    fn is_anchor(&self) -> bool {
        matches!(self.kind, TermKind::With | TermKind::Changed)
    }
}

/// Builder of a runtime query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicQuery {
    terms: Vec<DynamicTerm>,
}

impl DynamicQuery {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, component: ComponentId, kind: TermKind, mutable: bool) -> &mut Self {
        self.terms.push(DynamicTerm {
            component,
            kind,
            mutable,
        });
        self
    }

    /// Entity must have the component
    pub fn with_component(&mut self, component: ComponentId, mutable: bool) -> &mut Self {
        self.push(component, TermKind::With, mutable)
    }

    /// Entity must not have the component. The accessor is always immutable.
    pub fn without_component(&mut self, component: ComponentId) -> &mut Self {
        self.push(component, TermKind::Without, false)
    }

    /// Optional component, the accessor target is `None` when absent
    pub fn maybe_component(&mut self, component: ComponentId, mutable: bool) -> &mut Self {
        self.push(component, TermKind::Maybe, mutable)
    }

    /// Component must be present and flagged changed
    pub fn changed_component(&mut self, component: ComponentId, mutable: bool) -> &mut Self {
        self.push(component, TermKind::Changed, mutable)
    }

    /// Validate the term list.
    ///
    /// Fails when there are no terms, when a component id is not registered
    /// and when two terms would fetch the same component mutably. A query
    /// whose terms are all `without`/`maybe` is valid but never matches.
    pub fn build(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(EcsError::InvalidQuery("query has no terms".to_string()));
        }
        if let Some(term) = self.terms.iter().find(|term| !term.component.is_registered()) {
            return Err(EcsError::ComponentNotRegistered(term.component));
        }
        check_aliasing(&self.describe())
    }

    pub fn is_valid(&self) -> bool {
        self.build().is_ok()
    }

    /// Drop every term and go back to building
    pub fn reset(&mut self) {
        self.terms.clear();
    }

    pub fn terms(&self) -> &[DynamicTerm] {
        &self.terms
    }

    pub fn describe(&self) -> Vec<FilterNode> {
        self.terms.iter().map(DynamicTerm::describe).collect()
    }

    /// Report accessed components
    pub fn get_components(&self, info: &mut SystemExeInfo) {
        for node in self.describe() {
            node.report_access(info);
        }
    }

    /// Resolve storages and position on the first match.
    ///
    /// `changed` terms enable change tracing on their storage.
    pub fn begin<'w>(&self, world: &'w mut World) -> Result<DynamicQueryCursor<'w>> {
        self.build()
            .map_err(|err| EcsError::InvalidQuery(err.to_string()))?;

        #[cfg(feature = "profiling")]
        let span = info_span!("dynamic_query.begin", terms = self.terms.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let world: &World = world;
        let bindings: Vec<Binding> = self
            .terms
            .iter()
            .map(|&term| Binding {
                term,
                storage: world.storage_ptr_by_id(term.component),
            })
            .collect();

        for binding in bindings.iter().filter(|b| b.term.kind == TermKind::Changed) {
            if let Some(ptr) = binding.storage {
                // SAFETY: the world is exclusively borrowed for 'w
                unsafe { (*ptr.as_ptr()).set_tracing_change(true) };
            }
        }

        let entities = candidates(&bindings);
        #[cfg(feature = "profiling")]
        debug!(candidates = entities.len(), "dynamic query resolved");

        let accesses = bindings
            .iter()
            .map(|binding| ComponentAccess {
                component: binding.term.component,
                mutable: binding.term.mutable,
                target: None,
                _marker: PhantomData,
            })
            .collect();

        let mut cursor = DynamicQueryCursor {
            bindings,
            entities,
            position: 0,
            current: EntityId::default(),
            accesses,
            phase: CursorPhase::Begun,
            _marker: PhantomData,
        };
        cursor.settle();
        Ok(cursor)
    }
}

struct Binding {
    term: DynamicTerm,
    storage: Option<NonNull<dyn StorageBase>>,
}

impl Binding {
    fn storage(&self) -> Option<&dyn StorageBase> {
        // SAFETY: the cursor holds the world exclusively
        self.storage.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    fn has(&self, entity: EntityId) -> bool {
        self.storage().is_some_and(|storage| storage.has(entity))
    }

    fn matches(&self, entity: EntityId) -> bool {
        match self.term.kind {
            TermKind::With => self.has(entity),
            TermKind::Without => !self.has(entity),
            TermKind::Maybe => true,
            TermKind::Changed => self
                .storage()
                .is_some_and(|storage| storage.has(entity) && storage.is_changed(entity)),
        }
    }
}

/// Copy of the smallest anchoring storage's entity list; empty when the
/// query has no anchor or an anchoring storage does not exist.
fn candidates(bindings: &[Binding]) -> Vec<EntityId> {
    let mut best: Option<&[EntityId]> = None;
    for binding in bindings.iter().filter(|b| b.term.is_anchor()) {
        let Some(storage) = binding.storage() else {
            return Vec::new();
        };
        let list = storage.stored_entities();
        if best.map_or(true, |current| list.len() < current.len()) {
            best = Some(list);
        }
    }
    best.map(<[EntityId]>::to_vec).unwrap_or_default()
}

/// Lifecycle of a [`DynamicQueryCursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    /// Positioned on the first match
    Begun,
    Iterating,
    /// No more matches
    Ended,
}

/// Iteration state of a begun [`DynamicQuery`]
pub struct DynamicQueryCursor<'w> {
    bindings: Vec<Binding>,
    entities: Vec<EntityId>,
    position: usize,
    current: EntityId,
    accesses: Vec<ComponentAccess<'w>>,
    phase: CursorPhase,
    _marker: PhantomData<&'w mut World>,
}

impl<'w> DynamicQueryCursor<'w> {
    fn settle(&mut self) {
        while let Some(&entity) = self.entities.get(self.position) {
            if self.matches(entity) {
                self.current = entity;
                self.load(entity);
                return;
            }
            self.position += 1;
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.position = self.entities.len();
        self.current = EntityId::default();
        self.phase = CursorPhase::Ended;
        for access in &mut self.accesses {
            access.target = None;
        }
    }

    fn matches(&self, entity: EntityId) -> bool {
        !self.entities.is_empty() && self.bindings.iter().all(|binding| binding.matches(entity))
    }

    /// Point every accessor at `entity`; mutable accessors flag it changed
    fn load(&mut self, entity: EntityId) {
        for (binding, access) in self.bindings.iter().zip(self.accesses.iter_mut()) {
            access.target = match (binding.term.kind, binding.storage) {
                (TermKind::Without, _) | (_, None) => None,
                (_, Some(ptr)) if binding.term.mutable => {
                    // SAFETY: the world is exclusively borrowed for 'w and no
                    // two mutable accessors share a storage
                    let storage = unsafe { &mut *ptr.as_ptr() };
                    storage.get_reflect_mut(entity).map(NonNull::from)
                }
                (_, Some(ptr)) => {
                    // SAFETY: shared reborrow, earlier shared accessors stay valid
                    let storage = unsafe { &*ptr.as_ptr() };
                    storage.get_reflect(entity).map(NonNull::from)
                }
            };
        }
    }

    pub fn is_not_done(&self) -> bool {
        self.phase != CursorPhase::Ended
    }

    pub fn phase(&self) -> CursorPhase {
        self.phase
    }

    /// Advance to the next match
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.phase == CursorPhase::Ended {
            return;
        }
        self.phase = CursorPhase::Iterating;
        self.position += 1;
        self.settle();
    }

    /// Current entity, `EntityId::null()` once done
    pub fn get_current_entity_id(&self) -> EntityId {
        self.current
    }

    /// Membership test, fetches nothing
    pub fn has(&self, entity: EntityId) -> bool {
        self.matches(entity)
    }

    /// Point the accessors at `entity` without moving the cursor.
    /// Returns `false` and leaves them untouched when it does not match.
    pub fn fetch(&mut self, entity: EntityId) -> bool {
        if !self.matches(entity) {
            return false;
        }
        self.load(entity);
        true
    }

    pub fn access_count(&self) -> usize {
        self.accesses.len()
    }

    pub fn get_access(&self, index: usize) -> Option<&ComponentAccess<'w>> {
        self.accesses.get(index)
    }

    pub fn get_access_mut(&mut self, index: usize) -> Option<&mut ComponentAccess<'w>> {
        self.accesses.get_mut(index)
    }

    /// Count every match, wherever the cursor stands, then end it
    pub fn count(&mut self) -> usize {
        let total = self
            .entities
            .iter()
            .filter(|&&entity| self.matches(entity))
            .count();
        self.finish();
        total
    }

    /// Release the world
    pub fn end(self) {}
}

/// Type-erased handle on one term's component for the current entity
pub struct ComponentAccess<'w> {
    component: ComponentId,
    mutable: bool,
    target: Option<NonNull<dyn Reflect>>,
    _marker: PhantomData<&'w mut World>,
}

impl ComponentAccess<'_> {
    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Component of the current entity, `None` when absent
    pub fn get_target(&self) -> Option<&dyn Reflect> {
        let ptr = self.target?;
        // SAFETY: target set from a live storage for the cursor's borrow
        let target: &dyn Reflect = unsafe { &*ptr.as_ptr() };
        Some(target)
    }

    /// `None` when absent or when the accessor is immutable
    pub fn get_target_mut(&mut self) -> Option<&mut dyn Reflect> {
        if !self.mutable {
            return None;
        }
        let ptr = self.target?;
        // SAFETY: fetched mutably; exclusive through `&mut self`
        let target: &mut dyn Reflect = unsafe { &mut *ptr.as_ptr() };
        Some(target)
    }

    pub fn get(&self, field: &str) -> Option<ReflectValue> {
        self.get_target()?.get_field(field)
    }

    /// Write a field. Returns `false` and changes nothing when the accessor
    /// is immutable, the target is absent, the field is unknown or the value
    /// has the wrong type.
    pub fn set(&mut self, field: &str, value: ReflectValue) -> bool {
        self.get_target_mut()
            .is_some_and(|target| target.set_field(field, value))
    }
}
