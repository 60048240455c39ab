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

//! Typed queries
//!
//! A [`Query`] is generic over a tuple of terms. Each term tests one
//! condition per entity and produces one slot of the result tuple:
//!
//! | term | matches when | slot |
//! |---|---|---|
//! | `&T` / `&mut T` | entity has `T` | `&T` / `&mut T` |
//! | [`Without<Q>`] | `Q` does not match | always `None` |
//! | [`Maybe<Q>`] | always | `Option<Q::Item>` |
//! | [`Changed<Q>`] | `Q` matches and is flagged changed | `Q::Item` |
//! | [`Batch<Q>`] | `Q` matches | every instance, [`BatchRef`] / [`BatchMut`] |
//! | [`Any<(..)>`] | at least one child, first wins | [`JoinData`] |
//! | [`Join<(..)>`] | exactly one child | [`JoinData`] |
//! | [`EntityId`] | always | the entity |
//!
//! Candidates come from the least populated storage among the anchoring
//! terms. A query without an anchoring term never matches.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::vec;

use ahash::AHashSet;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::batch::{BatchMut, BatchRef};
use crate::component::{Component, ComponentId};
use crate::entity::EntityId;
use crate::error::Result;
use crate::filter::{check_aliasing, flatten, is_vacuous, FilterNode, SlotLayout};
use crate::join::JoinData;
use crate::storage::{Storage, StorageBase};
use crate::system::SystemExeInfo;
use crate::world::World;

/// Optional term: always matches, the slot is `None` when `Q` misses
pub struct Maybe<Q>(PhantomData<Q>);

/// Exclusion term: matches when `Q` does not. Never fetches.
pub struct Without<Q>(PhantomData<Q>);

/// `Q` must match and its component must be flagged changed.
///
/// Building a query with this term enables change tracing on the storage.
pub struct Changed<Q>(PhantomData<Q>);

/// Every instance of `Q`'s component held by the entity
pub struct Batch<Q>(PhantomData<Q>);

/// Alternation over a tuple of terms, first matching child wins
pub struct Any<C>(PhantomData<C>);

/// Exactly one child of the tuple must match
pub struct Join<C>(PhantomData<C>);

/// Resolved storage of one component
pub struct ComponentState<T: Component> {
    storage: Option<NonNull<T::Storage>>,
    component: ComponentId,
}

impl<T: Component> ComponentState<T> {
    fn new(world: &World) -> Self {
        Self {
            storage: world.storage_ptr::<T>(),
            component: ComponentId::of::<T>(),
        }
    }

    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    unsafe fn storage<'w>(&self) -> Option<&'w T::Storage> {
        self.storage.map(|ptr| &*ptr.as_ptr())
    }

    unsafe fn storage_mut<'w>(&self) -> Option<&'w mut T::Storage> {
        self.storage.map(|ptr| &mut *ptr.as_ptr())
    }

    fn has(&self, entity: EntityId) -> bool {
        // SAFETY: pointer valid while the owning query borrows the world
        unsafe { self.storage() }.is_some_and(|storage| storage.has(entity))
    }

    fn is_changed(&self, entity: EntityId) -> bool {
        // SAFETY: as above
        unsafe { self.storage() }.is_some_and(|storage| storage.is_changed(entity))
    }
}

/// One query term.
///
/// # Safety
/// `init_state` may only be called while the world is exclusively borrowed
/// for as long as the state is used. The `unsafe` methods must be called
/// with a state built that way; `fetch` must not be called twice for the
/// same entity while a previous result is alive.
pub unsafe trait QueryTerm {
    type Item<'w>;
    type State: 'static;

    unsafe fn init_state(world: &World) -> Self::State;

    /// False when a storage this term requires does not exist
    fn is_satisfiable(state: &Self::State) -> bool;

    /// Entities that may match; `None` when the term is not an anchor
    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>>;

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool;

    /// Payload for a matching entity; `None` when the term does not match
    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>>;

    /// Payload as seen by an enclosing `Any`/`Join`
    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w>;

    fn describe() -> FilterNode;
}

/// Term bound to a single component, usable under [`Changed`] and [`Batch`].
///
/// # Safety
/// Same contract as [`QueryTerm`].
pub unsafe trait ComponentTerm: QueryTerm {
    type Component: Component;
    type BatchItem<'w>;

    fn component_state(state: &Self::State) -> &ComponentState<Self::Component>;

    unsafe fn fetch_batch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::BatchItem<'w>>;

    unsafe fn fetch_batch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w>;

    fn empty_batch<'w>() -> Self::BatchItem<'w>;
}

unsafe impl<'a, T: Component> QueryTerm for &'a T {
    type Item<'w> = &'w T;
    type State = ComponentState<T>;

    unsafe fn init_state(world: &World) -> Self::State {
        ComponentState::new(world)
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        state.has_storage()
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        Some(match state.storage() {
            Some(storage) => Cow::Borrowed(storage.stored_entities()),
            None => Cow::Borrowed(&[]),
        })
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        state.has(entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        state.storage()?.get(entity)
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        match Self::fetch(state, entity) {
            Some(value) => JoinData::from_ref(state.component, value),
            None => JoinData::null(),
        }
    }

    fn describe() -> FilterNode {
        FilterNode::with(ComponentId::of::<T>(), false)
    }
}

unsafe impl<'a, T: Component> ComponentTerm for &'a T {
    type Component = T;
    type BatchItem<'w> = BatchRef<'w, T>;

    fn component_state(state: &Self::State) -> &ComponentState<T> {
        state
    }

    unsafe fn fetch_batch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::BatchItem<'w>> {
        let storage = state.storage()?;
        if !storage.has(entity) {
            return None;
        }
        Some(BatchRef::new(storage.get_batch(entity)))
    }

    unsafe fn fetch_batch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        match state.storage() {
            Some(storage) if storage.has(entity) => {
                JoinData::from_slice(state.component, storage.get_batch(entity))
            }
            _ => JoinData::null(),
        }
    }

    fn empty_batch<'w>() -> Self::BatchItem<'w> {
        BatchRef::default()
    }
}

unsafe impl<'a, T: Component> QueryTerm for &'a mut T {
    type Item<'w> = &'w mut T;
    type State = ComponentState<T>;

    unsafe fn init_state(world: &World) -> Self::State {
        ComponentState::new(world)
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        state.has_storage()
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        <&T as QueryTerm>::candidates(state)
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        state.has(entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        state.storage_mut()?.get_mut(entity)
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        match Self::fetch(state, entity) {
            Some(value) => JoinData::from_mut(state.component, value),
            None => JoinData::null(),
        }
    }

    fn describe() -> FilterNode {
        FilterNode::with(ComponentId::of::<T>(), true)
    }
}

unsafe impl<'a, T: Component> ComponentTerm for &'a mut T {
    type Component = T;
    type BatchItem<'w> = BatchMut<'w, T>;

    fn component_state(state: &Self::State) -> &ComponentState<T> {
        state
    }

    unsafe fn fetch_batch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::BatchItem<'w>> {
        let storage = state.storage_mut()?;
        if !storage.has(entity) {
            return None;
        }
        Some(BatchMut::new(storage.get_batch_mut(entity)))
    }

    unsafe fn fetch_batch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        match state.storage_mut() {
            Some(storage) if storage.has(entity) => {
                JoinData::from_slice_mut(state.component, storage.get_batch_mut(entity))
            }
            _ => JoinData::null(),
        }
    }

    fn empty_batch<'w>() -> Self::BatchItem<'w> {
        BatchMut::default()
    }
}

unsafe impl<Q: QueryTerm> QueryTerm for Maybe<Q> {
    type Item<'w> = Option<Q::Item<'w>>;
    type State = Q::State;

    unsafe fn init_state(world: &World) -> Self::State {
        Q::init_state(world)
    }

    fn is_satisfiable(_state: &Self::State) -> bool {
        true
    }

    unsafe fn candidates<'w>(_state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        None
    }

    unsafe fn matches(_state: &Self::State, _entity: EntityId) -> bool {
        true
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        if Q::matches(state, entity) {
            Some(Q::fetch(state, entity))
        } else {
            Some(None)
        }
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        if Q::matches(state, entity) {
            Q::fetch_erased(state, entity)
        } else {
            JoinData::null()
        }
    }

    fn describe() -> FilterNode {
        FilterNode::Maybe(Box::new(Q::describe()))
    }
}

unsafe impl<Q: ComponentTerm> ComponentTerm for Maybe<Q> {
    type Component = Q::Component;
    type BatchItem<'w> = Q::BatchItem<'w>;

    fn component_state(state: &Self::State) -> &ComponentState<Self::Component> {
        Q::component_state(state)
    }

    unsafe fn fetch_batch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::BatchItem<'w>> {
        let batch = if Q::matches(state, entity) {
            Q::fetch_batch(state, entity)
        } else {
            None
        };
        Some(batch.unwrap_or_else(Q::empty_batch))
    }

    unsafe fn fetch_batch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        if Q::matches(state, entity) {
            Q::fetch_batch_erased(state, entity)
        } else {
            JoinData::null()
        }
    }

    fn empty_batch<'w>() -> Self::BatchItem<'w> {
        Q::empty_batch()
    }
}

unsafe impl<Q: QueryTerm> QueryTerm for Without<Q> {
    type Item<'w> = Option<Q::Item<'w>>;
    type State = Q::State;

    unsafe fn init_state(world: &World) -> Self::State {
        Q::init_state(world)
    }

    fn is_satisfiable(_state: &Self::State) -> bool {
        true
    }

    unsafe fn candidates<'w>(_state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        None
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        !Q::matches(state, entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        if Q::matches(state, entity) {
            None
        } else {
            Some(None)
        }
    }

    unsafe fn fetch_erased<'w>(_state: &Self::State, _entity: EntityId) -> JoinData<'w> {
        JoinData::null()
    }

    fn describe() -> FilterNode {
        FilterNode::Without(Box::new(Q::describe()))
    }
}

unsafe impl<Q: ComponentTerm> QueryTerm for Changed<Q> {
    type Item<'w> = Q::Item<'w>;
    type State = Q::State;

    unsafe fn init_state(world: &World) -> Self::State {
        let state = Q::init_state(world);
        if let Some(ptr) = Q::component_state(&state).storage {
            (*ptr.as_ptr()).set_tracing_change(true);
        }
        state
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        Q::is_satisfiable(state)
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        Q::candidates(state)
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        Q::matches(state, entity) && Q::component_state(state).is_changed(entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        if Self::matches(state, entity) {
            Q::fetch(state, entity)
        } else {
            None
        }
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        if Self::matches(state, entity) {
            Q::fetch_erased(state, entity)
        } else {
            JoinData::null()
        }
    }

    fn describe() -> FilterNode {
        FilterNode::Changed(Box::new(Q::describe()))
    }
}

unsafe impl<Q: ComponentTerm> ComponentTerm for Changed<Q> {
    type Component = Q::Component;
    type BatchItem<'w> = Q::BatchItem<'w>;

    fn component_state(state: &Self::State) -> &ComponentState<Self::Component> {
        Q::component_state(state)
    }

    unsafe fn fetch_batch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::BatchItem<'w>> {
        if Self::matches(state, entity) {
            Q::fetch_batch(state, entity)
        } else {
            None
        }
    }

    unsafe fn fetch_batch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        if Self::matches(state, entity) {
            Q::fetch_batch_erased(state, entity)
        } else {
            JoinData::null()
        }
    }

    fn empty_batch<'w>() -> Self::BatchItem<'w> {
        Q::empty_batch()
    }
}

unsafe impl<Q: ComponentTerm> QueryTerm for Batch<Q> {
    type Item<'w> = Q::BatchItem<'w>;
    type State = Q::State;

    unsafe fn init_state(world: &World) -> Self::State {
        Q::init_state(world)
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        Q::is_satisfiable(state)
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        Q::candidates(state)
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        Q::matches(state, entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        Q::fetch_batch(state, entity)
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        Q::fetch_batch_erased(state, entity)
    }

    fn describe() -> FilterNode {
        FilterNode::Batch(Box::new(Q::describe()))
    }
}

unsafe impl<C: QueryData> QueryTerm for Any<C> {
    type Item<'w> = JoinData<'w>;
    type State = C::State;

    unsafe fn init_state(world: &World) -> Self::State {
        C::init_state(world)
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        C::any_satisfiable(state)
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        C::union_candidates(state)
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        C::any_matches(state, entity)
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        if C::any_matches(state, entity) {
            Some(C::fetch_first(state, entity))
        } else {
            None
        }
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        C::fetch_first(state, entity)
    }

    fn describe() -> FilterNode {
        FilterNode::Any(C::describe())
    }
}

unsafe impl<C: QueryData> QueryTerm for Join<C> {
    type Item<'w> = JoinData<'w>;
    type State = C::State;

    unsafe fn init_state(world: &World) -> Self::State {
        C::init_state(world)
    }

    fn is_satisfiable(state: &Self::State) -> bool {
        C::any_satisfiable(state)
    }

    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        C::union_candidates(state)
    }

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
        C::match_count(state, entity) == 1
    }

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        if Self::matches(state, entity) {
            Some(C::fetch_first(state, entity))
        } else {
            None
        }
    }

    unsafe fn fetch_erased<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
        if Self::matches(state, entity) {
            C::fetch_first(state, entity)
        } else {
            JoinData::null()
        }
    }

    fn describe() -> FilterNode {
        FilterNode::Join(C::describe())
    }
}

unsafe impl QueryTerm for EntityId {
    type Item<'w> = EntityId;
    type State = ();

    unsafe fn init_state(_world: &World) -> Self::State {}

    fn is_satisfiable(_state: &Self::State) -> bool {
        true
    }

    unsafe fn candidates<'w>(_state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
        None
    }

    unsafe fn matches(_state: &Self::State, _entity: EntityId) -> bool {
        true
    }

    unsafe fn fetch<'w>(_state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
        Some(entity)
    }

    unsafe fn fetch_erased<'w>(_state: &Self::State, _entity: EntityId) -> JoinData<'w> {
        JoinData::null()
    }

    fn describe() -> FilterNode {
        FilterNode::Entity
    }
}

/// Tuple of query terms; the result is the tuple of their slots.
///
/// # Safety
/// Same contract as [`QueryTerm`].
pub unsafe trait QueryData {
    type Item<'w>;
    type State: 'static;

    /// Number of result slots
    const SIZE: usize;

    unsafe fn init_state(world: &World) -> Self::State;

    /// Every term can be satisfied
    fn is_satisfiable(state: &Self::State) -> bool;

    /// At least one term can be satisfied
    fn any_satisfiable(state: &Self::State) -> bool;

    /// Smallest candidate list among the anchoring terms
    unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>>;

    /// Union of all candidate lists; `None` unless every term anchors
    unsafe fn union_candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>>;

    unsafe fn matches(state: &Self::State, entity: EntityId) -> bool;

    unsafe fn any_matches(state: &Self::State, entity: EntityId) -> bool;

    unsafe fn match_count(state: &Self::State, entity: EntityId) -> usize;

    unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>>;

    /// Erased payload of the first matching term in declaration order
    unsafe fn fetch_first<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w>;

    fn describe() -> Vec<FilterNode>;
}

macro_rules! impl_query_data {
    ($size:expr; $($idx:tt $T:ident),*) => {
        unsafe impl<$($T: QueryTerm),*> QueryData for ($($T,)*) {
            type Item<'w> = ($($T::Item<'w>,)*);
            type State = ($($T::State,)*);

            const SIZE: usize = $size;

            unsafe fn init_state(world: &World) -> Self::State {
                ($($T::init_state(world),)*)
            }

            fn is_satisfiable(state: &Self::State) -> bool {
                true $(&& $T::is_satisfiable(&state.$idx))*
            }

            fn any_satisfiable(state: &Self::State) -> bool {
                false $(|| $T::is_satisfiable(&state.$idx))*
            }

            unsafe fn candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
                let mut best: Option<Cow<'w, [EntityId]>> = None;
                $(
                    if let Some(list) = $T::candidates(&state.$idx) {
                        if best.as_ref().map_or(true, |current| list.len() < current.len()) {
                            best = Some(list);
                        }
                    }
                )*
                best
            }

            unsafe fn union_candidates<'w>(state: &Self::State) -> Option<Cow<'w, [EntityId]>> {
                let mut seen = AHashSet::new();
                let mut merged = Vec::new();
                $(
                    for &entity in $T::candidates(&state.$idx)?.iter() {
                        if seen.insert(entity) {
                            merged.push(entity);
                        }
                    }
                )*
                Some(Cow::Owned(merged))
            }

            unsafe fn matches(state: &Self::State, entity: EntityId) -> bool {
                true $(&& $T::matches(&state.$idx, entity))*
            }

            unsafe fn any_matches(state: &Self::State, entity: EntityId) -> bool {
                false $(|| $T::matches(&state.$idx, entity))*
            }

            unsafe fn match_count(state: &Self::State, entity: EntityId) -> usize {
                0 $(+ usize::from($T::matches(&state.$idx, entity)))*
            }

            unsafe fn fetch<'w>(state: &Self::State, entity: EntityId) -> Option<Self::Item<'w>> {
                Some(($($T::fetch(&state.$idx, entity)?,)*))
            }

            unsafe fn fetch_first<'w>(state: &Self::State, entity: EntityId) -> JoinData<'w> {
                $(
                    if $T::matches(&state.$idx, entity) {
                        return $T::fetch_erased(&state.$idx, entity);
                    }
                )*
                JoinData::null()
            }

            fn describe() -> Vec<FilterNode> {
                vec![$($T::describe()),*]
            }
        }
    };
}

impl_query_data!(1; 0 A);
impl_query_data!(2; 0 A, 1 B);
impl_query_data!(3; 0 A, 1 B, 2 C);
impl_query_data!(4; 0 A, 1 B, 2 C, 3 D);
impl_query_data!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_query_data!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_query_data!(7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_query_data!(8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

/// Typed query over the world.
///
/// Holds the world exclusively for `'w`. Results borrow the query, so two
/// results for the same entity never coexist.
///
/// ```ignore
/// let mut query = world.query::<(EntityId, &mut Transform, Without<&TagC>)>();
/// for (entity, transform, _) in query.iter() {
///     transform.origin.x += 1.0;
/// }
/// ```
pub struct Query<'w, F: QueryData> {
    state: F::State,
    satisfiable: bool,
    anchored: bool,
    _marker: PhantomData<&'w mut World>,
}

impl<'w, F: QueryData> Query<'w, F> {
    /// Build the query, rejecting terms that would alias a mutable fetch
    pub fn try_new(world: &'w mut World) -> Result<Self> {
        let nodes = F::describe();
        check_aliasing(&nodes)?;

        #[cfg(feature = "profiling")]
        let span = info_span!("query.new", terms = F::SIZE, entities = world.entity_count());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        // SAFETY: `world` stays exclusively borrowed for 'w
        let state = unsafe { F::init_state(world) };
        let satisfiable = F::is_satisfiable(&state);
        Ok(Self {
            state,
            satisfiable,
            anchored: !is_vacuous(&nodes),
            _marker: PhantomData,
        })
    }

    /// # Panics
    /// Panics if two terms fetch the same component and one of them mutably.
    pub fn new(world: &'w mut World) -> Self {
        match Self::try_new(world) {
            Ok(query) => query,
            Err(err) => panic!("{err}"),
        }
    }

    /// Slot layout of the result tuple
    pub fn layout() -> Vec<SlotLayout> {
        flatten(&F::describe())
    }

    fn candidates(&self) -> Vec<EntityId> {
        if !self.satisfiable || !self.anchored {
            return Vec::new();
        }
        // SAFETY: state built from the borrowed world
        unsafe { F::candidates(&self.state) }
            .map(Cow::into_owned)
            .unwrap_or_default()
    }

    /// Number of matching entities
    pub fn count(&self) -> usize {
        if !self.satisfiable || !self.anchored {
            return 0;
        }
        // SAFETY: state built from the borrowed world, nothing is fetched
        unsafe {
            F::candidates(&self.state).map_or(0, |list| {
                list.iter()
                    .filter(|&&entity| F::matches(&self.state, entity))
                    .count()
            })
        }
    }

    /// Membership test, fetches nothing
    pub fn has(&self, entity: EntityId) -> bool {
        // SAFETY: state built from the borrowed world
        self.satisfiable && self.anchored && unsafe { F::matches(&self.state, entity) }
    }

    /// Result tuple for one entity. Mutable terms fetch mutably on every call.
    pub fn get(&mut self, entity: EntityId) -> Option<F::Item<'_>> {
        if !self.has(entity) {
            return None;
        }
        // SAFETY: the result borrows `self` mutably
        unsafe { F::fetch(&self.state, entity) }
    }

    /// Single pass over every match
    pub fn iter(&mut self) -> QueryIter<'_, F> {
        QueryIter {
            entities: self.candidates().into_iter(),
            state: &self.state,
            _marker: PhantomData,
        }
    }

    /// Cursor positioned on the first match
    pub fn begin(&mut self) -> QueryCursor<'_, F> {
        let mut cursor = QueryCursor {
            entities: self.candidates(),
            position: 0,
            state: &self.state,
        };
        cursor.settle();
        cursor
    }

    /// Report accessed components
    pub fn get_components(&self, info: &mut SystemExeInfo) {
        for node in F::describe() {
            node.report_access(info);
        }
    }
}

/// Iterator over query results
pub struct QueryIter<'q, F: QueryData> {
    entities: vec::IntoIter<EntityId>,
    state: &'q F::State,
    _marker: PhantomData<&'q mut World>,
}

impl<'q, F: QueryData> Iterator for QueryIter<'q, F> {
    type Item = F::Item<'q>;

    fn next(&mut self) -> Option<Self::Item> {
        for entity in self.entities.by_ref() {
            // SAFETY: each candidate is visited once, results for distinct
            // entities never alias
            unsafe {
                if F::matches(self.state, entity) {
                    return F::fetch(self.state, entity);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entities.len()))
    }
}

impl<'q, 'w, F: QueryData> IntoIterator for &'q mut Query<'w, F> {
    type Item = F::Item<'q>;
    type IntoIter = QueryIter<'q, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward cursor over query results.
///
/// Unlike [`QueryIter`], [`get`](Self::get) can be called repeatedly on the
/// same position and fetches again every time.
pub struct QueryCursor<'q, F: QueryData> {
    entities: Vec<EntityId>,
    position: usize,
    state: &'q F::State,
}

impl<F: QueryData> QueryCursor<'_, F> {
    fn settle(&mut self) {
        while let Some(&entity) = self.entities.get(self.position) {
            // SAFETY: state outlives the cursor
            if unsafe { F::matches(self.state, entity) } {
                break;
            }
            self.position += 1;
        }
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.entities.len()
    }

    /// Current entity, `None` once done
    pub fn entity(&self) -> Option<EntityId> {
        self.entities.get(self.position).copied()
    }

    pub fn get(&mut self) -> Option<F::Item<'_>> {
        let entity = self.entity()?;
        // SAFETY: the result borrows the cursor mutably
        unsafe { F::fetch(self.state, entity) }
    }

    /// Move to the next match
    pub fn advance(&mut self) {
        if !self.is_done() {
            self.position += 1;
            self.settle();
        }
    }
}
