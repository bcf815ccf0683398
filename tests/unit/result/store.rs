use super::*;
use crate::result::pool::BufferPool;

fn store() -> ResultStore {
    ResultStore::new(Box::new(BufferPool::default()))
}

fn domain(w: u32, h: u32) -> Domain {
    Domain::new(Size::new(w, h)).unwrap()
}

#[test]
fn release_frees_once_at_zero() {
    let mut s = store();
    let r = s.create(ResultType::Color, Precision::Full);
    s.set_initial_reference_count(r, 2);
    s.reset(r);
    s.allocate_image(r, domain(4, 4), true).unwrap();

    s.release(r).unwrap();
    assert!(s.is_allocated(r));
    s.release(r).unwrap();
    assert!(!s.is_allocated(r));
    assert_eq!(s.stats().allocations, 1);
    assert_eq!(s.stats().frees, 1);

    let err = s.release(r).unwrap_err();
    assert!(matches!(err, GraphError::Evaluation(_)));
}

#[test]
fn proxies_resolve_transitively() {
    let mut s = store();
    let a = s.create(ResultType::Float, Precision::Full);
    let b = s.create(ResultType::Float, Precision::Full);
    let c = s.create(ResultType::Float, Precision::Full);
    for (id, n) in [(a, 1), (b, 1), (c, 2)] {
        s.set_initial_reference_count(id, n);
        s.reset(id);
    }
    s.allocate_image(a, domain(8, 8), false).unwrap();
    s.pass_through(a, b).unwrap();
    s.pass_through(b, c).unwrap();

    assert_eq!(s.resolve(c), a);
    assert_eq!(s.reference_count(c), 4);
    assert_eq!(s.image(c).map(|i| i.size()), Some(Size::new(8, 8)));
    assert_eq!(s.rec(c).initial_reference_count, 2);

    s.release(c).unwrap();
    assert_eq!(s.reference_count(a), 3);
    for id in [c, b, a] {
        s.release(id).unwrap();
    }
    assert!(!s.is_allocated(a));
    assert_eq!(s.stats().frees, 1);
}

#[test]
fn pass_through_rejects_cycles() {
    let mut s = store();
    let a = s.create(ResultType::Float, Precision::Full);
    let b = s.create(ResultType::Float, Precision::Full);
    s.pass_through(a, b).unwrap();
    assert!(s.pass_through(b, a).is_err());
}

#[test]
fn proxies_keep_their_own_domain() {
    let mut s = store();
    let a = s.create(ResultType::Color, Precision::Full);
    let b = s.create(ResultType::Color, Precision::Full);
    s.set_initial_reference_count(a, 1);
    s.reset(a);
    s.allocate_image(a, domain(2, 2), true).unwrap();
    s.pass_through(a, b).unwrap();
    let moved = s.domain(b).transformed(kurbo::Affine::translate((5.0, 0.0)));
    s.set_domain(b, moved);
    assert_ne!(s.domain(a), s.domain(b));
}

#[test]
fn steal_moves_storage_and_domain() {
    let mut s = store();
    let src = s.create(ResultType::Color, Precision::Full);
    let dst = s.create(ResultType::Color, Precision::Full);
    s.set_initial_reference_count(src, 1);
    s.set_initial_reference_count(dst, 1);
    s.reset(src);
    s.reset(dst);
    s.allocate_image(src, domain(3, 2), true).unwrap();

    s.steal(dst, src).unwrap();
    assert!(!s.is_allocated(src));
    assert_eq!(s.domain(dst).size(), Size::new(3, 2));

    s.release(src).unwrap();
    assert_eq!(s.stats().frees, 0);
    s.release(dst).unwrap();
    assert_eq!(s.stats().frees, 1);
}

#[test]
fn steal_requires_unallocated_non_proxy_target() {
    let mut s = store();
    let a = s.create(ResultType::Float, Precision::Full);
    let b = s.create(ResultType::Float, Precision::Full);
    let c = s.create(ResultType::Float, Precision::Full);
    s.allocate_single_value(a).unwrap();
    s.allocate_single_value(b).unwrap();
    assert!(s.steal(b, a).is_err());
    s.pass_through(a, c).unwrap();
    assert!(s.steal(c, a).is_err());
}

#[test]
fn external_storage_is_never_freed() {
    let mut s = store();
    let r = s.create(ResultType::Float, Precision::Full);
    s.set_initial_reference_count(r, 1);
    s.reset(r);
    s.wrap_external_value(r, Value::Float(2.0)).unwrap();
    s.release(r).unwrap();
    assert_eq!(s.single_value(r), Some(Value::Float(2.0)));
    assert_eq!(s.stats().frees, 0);
}

#[test]
fn unneeded_results_get_a_dummy() {
    let mut s = store();
    let r = s.create(ResultType::Color, Precision::Full);
    assert!(!s.should_compute(r));
    s.allocate_image(r, domain(64, 64), true).unwrap();
    assert_eq!(s.image(r).map(|i| i.size()), Some(Size::new(1, 1)));
    s.release_unneeded(r);
    assert!(!s.is_allocated(r));
}

#[test]
fn decrement_adjusts_initial_and_master() {
    let mut s = store();
    let a = s.create(ResultType::Float, Precision::Full);
    let b = s.create(ResultType::Float, Precision::Full);
    s.set_initial_reference_count(a, 1);
    s.set_initial_reference_count(b, 3);
    s.reset(a);
    s.reset(b);
    s.allocate_single_value(a).unwrap();
    s.pass_through(a, b).unwrap();
    assert_eq!(s.reference_count(a), 4);

    s.decrement_reference_count(b, 2).unwrap();
    assert_eq!(s.rec(b).initial_reference_count, 1);
    assert_eq!(s.reference_count(a), 2);
}

#[test]
fn invalid_replaces_image_storage() {
    let mut s = store();
    let r = s.create(ResultType::Color, Precision::Full);
    s.set_initial_reference_count(r, 1);
    s.reset(r);
    s.allocate_image(r, domain(4, 4), true).unwrap();
    s.allocate_invalid(r).unwrap();
    assert!(s.is_single_value(r));
    assert_eq!(s.single_value(r), Some(Value::Color([0.0; 4])));
    assert_eq!(s.stats().allocations, 2);
    assert_eq!(s.stats().frees, 1);
}

#[test]
fn release_all_frees_everything_owned() {
    let mut s = store();
    for _ in 0..3 {
        let r = s.create(ResultType::Float, Precision::Full);
        s.set_initial_reference_count(r, 1);
        s.reset(r);
        s.allocate_image(r, domain(2, 2), true).unwrap();
    }
    s.release_all();
    assert_eq!(s.stats().live, 0);
    assert_eq!(s.stats().frees, 3);
}
