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

//! Filter descriptors and result-tuple flattening
//!
//! Static query terms describe themselves as [`FilterNode`] trees and dynamic
//! queries build the same nodes from their term list, so access reports,
//! anchoring and slot layout are computed once, here, for both.
//!
//! Every top-level term owns exactly one result slot. `Any` and `Join` take a
//! single slot whatever their child count and nesting never adds slots.

use smallvec::SmallVec;

use crate::component::ComponentId;
use crate::error::{EcsError, Result};
use crate::system::SystemExeInfo;

/// Shape of one filter term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    /// The entity id itself
    Entity,
    /// Component must be present
    With { component: ComponentId, mutable: bool },
    /// Child must not match
    Without(Box<FilterNode>),
    /// Child is optional
    Maybe(Box<FilterNode>),
    /// Child must match and be flagged changed
    Changed(Box<FilterNode>),
    /// Every instance of the child's component
    Batch(Box<FilterNode>),
    /// At least one child, first match wins
    Any(Vec<FilterNode>),
    /// Exactly one child
    Join(Vec<FilterNode>),
}

impl FilterNode {
    pub fn with(component: ComponentId, mutable: bool) -> Self {
        FilterNode::With { component, mutable }
    }

    /// True when the term requires presence in some storage.
    ///
    /// A query needs at least one anchoring term to draw candidates from;
    /// without one it is vacuous.
    pub fn is_anchor(&self) -> bool {
        match self {
            FilterNode::With { .. } => true,
            FilterNode::Changed(child) | FilterNode::Batch(child) => child.is_anchor(),
            FilterNode::Entity | FilterNode::Without(_) | FilterNode::Maybe(_) => false,
            FilterNode::Any(children) | FilterNode::Join(children) => {
                !children.is_empty() && children.iter().all(FilterNode::is_anchor)
            }
        }
    }

    /// Component the term's slot refers to, if it is a single one
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            FilterNode::With { component, .. } => Some(*component),
            FilterNode::Without(child)
            | FilterNode::Maybe(child)
            | FilterNode::Changed(child)
            | FilterNode::Batch(child) => child.component(),
            FilterNode::Entity | FilterNode::Any(_) | FilterNode::Join(_) => None,
        }
    }

    /// True when the term hands out mutable payloads
    pub fn is_mutable(&self) -> bool {
        match self {
            FilterNode::With { mutable, .. } => *mutable,
            FilterNode::Without(_) | FilterNode::Entity => false,
            FilterNode::Maybe(child) | FilterNode::Changed(child) | FilterNode::Batch(child) => {
                child.is_mutable()
            }
            FilterNode::Any(children) | FilterNode::Join(children) => {
                children.iter().any(FilterNode::is_mutable)
            }
        }
    }

    /// Add this term's accesses to `info`
    pub fn report_access(&self, info: &mut SystemExeInfo) {
        self.report(info, false);
    }

    fn report(&self, info: &mut SystemExeInfo, read_only: bool) {
        match self {
            FilterNode::Entity => {}
            FilterNode::With { component, mutable } => info.add(*component, *mutable && !read_only),
            FilterNode::Without(child) => child.report(info, true),
            FilterNode::Maybe(child) | FilterNode::Batch(child) => child.report(info, read_only),
            FilterNode::Changed(child) => {
                child.report(info, read_only);
                child.for_each_component(&mut |id| {
                    info.need_changed.insert(id);
                });
            }
            FilterNode::Any(children) | FilterNode::Join(children) => {
                for child in children {
                    child.report(info, read_only);
                }
            }
        }
    }

    fn for_each_component(&self, f: &mut impl FnMut(ComponentId)) {
        match self {
            FilterNode::Entity => {}
            FilterNode::With { component, .. } => f(*component),
            FilterNode::Without(child)
            | FilterNode::Maybe(child)
            | FilterNode::Changed(child)
            | FilterNode::Batch(child) => child.for_each_component(f),
            FilterNode::Any(children) | FilterNode::Join(children) => {
                for child in children {
                    child.for_each_component(f);
                }
            }
        }
    }

    /// Components this term may fetch for one entity, with their mode.
    ///
    /// `Without` never fetches. The children of `Any`/`Join` are alternatives:
    /// only one of them is live per entity, so they are merged by id.
    pub fn collect_fetches(&self, out: &mut SmallVec<[(ComponentId, bool); 8]>) {
        match self {
            FilterNode::Entity | FilterNode::Without(_) => {}
            FilterNode::With { component, mutable } => out.push((*component, *mutable)),
            FilterNode::Maybe(child) | FilterNode::Changed(child) | FilterNode::Batch(child) => {
                child.collect_fetches(out)
            }
            FilterNode::Any(children) | FilterNode::Join(children) => {
                let mut merged: SmallVec<[(ComponentId, bool); 8]> = SmallVec::new();
                for child in children {
                    let mut fetches = SmallVec::new();
                    child.collect_fetches(&mut fetches);
                    for (id, mutable) in fetches {
                        match merged.iter_mut().find(|(seen, _)| *seen == id) {
                            Some(entry) => entry.1 |= mutable,
                            None => merged.push((id, mutable)),
                        }
                    }
                }
                out.extend(merged);
            }
        }
    }
}

/// What a result slot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Entity,
    Component,
    Batch,
    /// `JoinData` of an `Any`/`Join`
    Erased,
    /// Always empty (`Without`)
    Empty,
}

/// Flattened description of one result slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub index: usize,
    pub kind: SlotKind,
    pub component: Option<ComponentId>,
    pub mutable: bool,
    pub optional: bool,
}

impl SlotLayout {
    fn of(index: usize, node: &FilterNode) -> Self {
        let mut layout = SlotLayout {
            index,
            kind: SlotKind::Component,
            component: node.component(),
            mutable: node.is_mutable(),
            optional: false,
        };
        match node {
            FilterNode::Entity => layout.kind = SlotKind::Entity,
            FilterNode::With { .. } => {}
            FilterNode::Without(_) => {
                layout.kind = SlotKind::Empty;
                layout.optional = true;
            }
            FilterNode::Maybe(child) => {
                layout.kind = SlotLayout::of(index, child).kind;
                layout.optional = true;
            }
            FilterNode::Changed(child) => {
                let inner = SlotLayout::of(index, child);
                layout.kind = inner.kind;
                layout.optional = inner.optional;
            }
            FilterNode::Batch(child) => {
                layout.kind = SlotKind::Batch;
                layout.optional = SlotLayout::of(index, child).optional;
            }
            FilterNode::Any(_) | FilterNode::Join(_) => layout.kind = SlotKind::Erased,
        }
        layout
    }
}

/// Slot layout of a term list, one slot per top-level term
pub fn flatten(nodes: &[FilterNode]) -> Vec<SlotLayout> {
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| SlotLayout::of(index, node))
        .collect()
}

/// True when no term can supply candidates; such a query never matches
pub fn is_vacuous(nodes: &[FilterNode]) -> bool {
    !nodes.iter().any(FilterNode::is_anchor)
}

/// Reject term lists that would fetch a component mutably while another
/// term fetches it too.
pub fn check_aliasing(nodes: &[FilterNode]) -> Result<()> {
    let mut fetches = SmallVec::new();
    for node in nodes {
        node.collect_fetches(&mut fetches);
    }
    for (i, &(id, mutable)) in fetches.iter().enumerate() {
        let aliased = fetches[i + 1..]
            .iter()
            .any(|&(other, other_mutable)| other == id && (mutable || other_mutable));
        if aliased {
            return Err(EcsError::ConflictingAccess(format!(
                "component {id} is fetched mutably by more than one term"
            )));
        }
    }
    Ok(())
}

/// Index access to slot `I` of a result tuple
pub trait Slot<const I: usize> {
    type Output;

    fn slot(&self) -> &Self::Output;

    fn slot_mut(&mut self) -> &mut Self::Output;
}

/// Flattened result tuple.
///
/// Tuples also destructure natively; `get`/`set` are the index-based view.
///
/// ```ignore
/// let mut row = (1u32, "two", Some(3.0f32));
/// row.set::<1>("deux");
/// assert_eq!(*row.get::<0>(), 1);
/// ```
pub trait QueryResultTuple: Sized {
    const SIZE: usize;

    fn get<const I: usize>(&self) -> &<Self as Slot<I>>::Output
    where
        Self: Slot<I>,
    {
        <Self as Slot<I>>::slot(self)
    }

    fn set<const I: usize>(&mut self, value: <Self as Slot<I>>::Output)
    where
        Self: Slot<I>,
    {
        *<Self as Slot<I>>::slot_mut(self) = value;
    }
}

macro_rules! impl_result_tuple {
    (@tuple [$($all:ident),*] $size:expr) => {
        impl<$($all),*> QueryResultTuple for ($($all,)*) {
            const SIZE: usize = $size;
        }
    };
    (@slot [$($all:ident),*] $idx:tt $T:ident) => {
        impl<$($all),*> Slot<$idx> for ($($all,)*) {
            type Output = $T;

            #[inline]
            fn slot(&self) -> &$T {
                &self.$idx
            }

            #[inline]
            fn slot_mut(&mut self) -> &mut $T {
                &mut self.$idx
            }
        }
    };
    ($size:expr; $all:tt; $($idx:tt $T:ident),*) => {
        impl_result_tuple!(@tuple $all $size);
        $(impl_result_tuple!(@slot $all $idx $T);)*
    };
}

impl_result_tuple!(1; [A]; 0 A);
impl_result_tuple!(2; [A, B]; 0 A, 1 B);
impl_result_tuple!(3; [A, B, C]; 0 A, 1 B, 2 C);
impl_result_tuple!(4; [A, B, C, D]; 0 A, 1 B, 2 C, 3 D);
impl_result_tuple!(5; [A, B, C, D, E]; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_result_tuple!(6; [A, B, C, D, E, F]; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_result_tuple!(7; [A, B, C, D, E, F, G]; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_result_tuple!(8; [A, B, C, D, E, F, G, H]; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

#[cfg(test)]
mod tests {
    use super::*;

    const A: ComponentId = ComponentId::from_raw(1);
    const B: ComponentId = ComponentId::from_raw(2);
    const C: ComponentId = ComponentId::from_raw(3);

    fn changed(node: FilterNode) -> FilterNode {
        FilterNode::Changed(Box::new(node))
    }

    #[test]
    fn test_anchoring() {
        assert!(FilterNode::with(A, false).is_anchor());
        assert!(changed(FilterNode::with(A, true)).is_anchor());
        assert!(!FilterNode::Maybe(Box::new(FilterNode::with(A, false))).is_anchor());
        assert!(!FilterNode::Without(Box::new(FilterNode::with(A, false))).is_anchor());
        assert!(!FilterNode::Any(Vec::new()).is_anchor());
        assert!(FilterNode::Join(vec![FilterNode::with(A, false), FilterNode::with(B, false)]).is_anchor());

        let nodes = [
            FilterNode::Entity,
            FilterNode::Maybe(Box::new(FilterNode::with(A, true))),
        ];
        assert!(is_vacuous(&nodes));
        assert!(!is_vacuous(&[FilterNode::with(A, false)]));
    }

    #[test]
    fn test_nested_any_takes_one_slot() {
        let any = FilterNode::Any(vec![
            FilterNode::Without(Box::new(changed(FilterNode::with(A, false)))),
            FilterNode::Batch(Box::new(FilterNode::Maybe(Box::new(changed(
                FilterNode::with(B, false),
            ))))),
        ]);
        let nodes = [FilterNode::with(C, true), any, FilterNode::Entity];
        let layout = flatten(&nodes);

        assert_eq!(layout.len(), 3);
        assert_eq!(layout[1].kind, SlotKind::Erased);
        assert_eq!(layout[1].index, 1);
        assert_eq!(layout[2].kind, SlotKind::Entity);
        assert!(layout[0].mutable);
    }

    #[test]
    fn test_slot_layout_of_wrappers() {
        let nodes = [
            FilterNode::Without(Box::new(FilterNode::with(A, true))),
            FilterNode::Maybe(Box::new(FilterNode::with(B, true))),
            FilterNode::Batch(Box::new(changed(FilterNode::with(C, false)))),
        ];
        let layout = flatten(&nodes);

        assert_eq!(layout[0].kind, SlotKind::Empty);
        assert!(!layout[0].mutable);
        assert_eq!(layout[1].component, Some(B));
        assert!(layout[1].optional && layout[1].mutable);
        assert_eq!(layout[2].kind, SlotKind::Batch);
        assert!(!layout[2].optional);
    }

    #[test]
    fn test_access_report() {
        let nodes = [
            FilterNode::with(A, true),
            FilterNode::Without(Box::new(FilterNode::with(B, true))),
            changed(FilterNode::with(C, false)),
        ];
        let mut info = SystemExeInfo::new();
        for node in &nodes {
            node.report_access(&mut info);
        }

        assert!(info.mutable_components.contains(&A));
        assert!(info.immutable_components.contains(&B));
        assert!(!info.mutable_components.contains(&B));
        assert!(info.immutable_components.contains(&C));
        assert_eq!(info.need_changed.len(), 1);
        assert!(info.need_changed.contains(&C));
    }

    #[test]
    fn test_aliasing_rules() {
        assert!(check_aliasing(&[FilterNode::with(A, false), FilterNode::with(A, false)]).is_ok());
        assert!(check_aliasing(&[FilterNode::with(A, true), FilterNode::with(B, true)]).is_ok());
        assert!(check_aliasing(&[
            FilterNode::with(A, true),
            FilterNode::Without(Box::new(FilterNode::with(A, false))),
        ])
        .is_ok());
        assert!(check_aliasing(&[FilterNode::Any(vec![
            FilterNode::with(A, true),
            changed(FilterNode::with(A, true)),
        ])])
        .is_ok());

        let err = check_aliasing(&[
            FilterNode::with(A, true),
            FilterNode::Maybe(Box::new(FilterNode::with(A, false))),
        ])
        .unwrap_err();
        assert!(matches!(err, EcsError::ConflictingAccess(_)));
    }

    #[test]
    fn test_result_tuple_set_get_independence() {
        let mut row = (1u32, 2.0f32, 'c', Some(4u8));
        assert_eq!(<(u32, f32, char, Option<u8>) as QueryResultTuple>::SIZE, 4);

        row.set::<2>('z');
        row.set::<0>(10);
        assert_eq!(*row.get::<0>(), 10);
        assert_eq!(*row.get::<1>(), 2.0);
        assert_eq!(*row.get::<2>(), 'z');
        assert_eq!(*row.get::<3>(), Some(4));

        row.set::<3>(None);
        let (a, b, c, d) = row;
        assert_eq!((a, b, c, d), (10, 2.0, 'z', None));
    }
}
