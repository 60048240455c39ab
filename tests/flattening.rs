use storage_ecs::prelude::*;
use storage_ecs::{QueryData, SlotKind};

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(i64);
impl_component!(A);

#[derive(Debug, Clone, Copy, PartialEq)]
struct B(f64);
impl_component!(B);

#[derive(Debug, Clone, Copy, PartialEq)]
struct C;
impl_component!(C);

fn slot_count<F: QueryData>() -> usize {
    assert_eq!(F::SIZE, Query::<F>::layout().len());
    F::SIZE
}

#[test]
fn test_flattening_identity() {
    assert_eq!(slot_count::<(&'static A,)>(), 1);
    assert_eq!(slot_count::<(&'static A, &'static mut B, Without<&'static C>)>(), 3);
    assert_eq!(
        slot_count::<(
            Any<(Without<Changed<&'static A>>, Batch<Maybe<Changed<&'static B>>>)>,
        )>(),
        1
    );
    assert_eq!(
        slot_count::<(
            EntityId,
            Maybe<&'static A>,
            Any<(Without<Changed<&'static A>>, Batch<Maybe<Changed<&'static B>>>)>,
            Join<(&'static B, &'static C, Batch<&'static A>)>,
            Changed<&'static mut C>,
        )>(),
        5
    );
}

#[test]
fn test_layout_describes_each_slot() {
    type Q = (
        EntityId,
        Maybe<&'static mut A>,
        Without<&'static B>,
        Batch<Changed<&'static C>>,
        Join<(&'static A, &'static B)>,
    );
    let layout = Query::<Q>::layout();

    assert_eq!(layout[0].kind, SlotKind::Entity);

    assert_eq!(layout[1].kind, SlotKind::Component);
    assert_eq!(layout[1].component, Some(ComponentId::of::<A>()));
    assert!(layout[1].mutable);
    assert!(layout[1].optional);

    assert_eq!(layout[2].kind, SlotKind::Empty);
    assert!(!layout[2].mutable);

    assert_eq!(layout[3].kind, SlotKind::Batch);
    assert_eq!(layout[3].component, Some(ComponentId::of::<C>()));

    assert_eq!(layout[4].kind, SlotKind::Erased);
    assert_eq!(layout[4].component, None);

    for (index, slot) in layout.iter().enumerate() {
        assert_eq!(slot.index, index);
    }
}

#[test]
fn test_result_slots_are_independent() {
    let mut world = World::new();
    let e = world.spawn((A(1), B(2.0))).unwrap();

    let mut query = world.query::<(EntityId, &A, Maybe<&B>, Without<&C>)>();
    let mut row = query.get(e).unwrap();
    assert_eq!(<(EntityId, &A, Option<&B>, Option<&C>) as QueryResultTuple>::SIZE, 4);

    row.set::<2>(None);
    assert_eq!(*row.get::<0>(), e);
    assert_eq!(*row.get::<1>(), &A(1));
    assert_eq!(*row.get::<2>(), None);
    assert_eq!(*row.get::<3>(), None);

    let other = A(7);
    row.set::<1>(&other);
    assert_eq!(row.get::<1>().0, 7);
    assert_eq!(*row.get::<0>(), e);

    let (entity, a, b, c) = row;
    assert_eq!((entity, a.0, b, c), (e, 7, None, None));
}
