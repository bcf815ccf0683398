use super::*;

fn desc(w: u32, h: u32) -> BufferDesc {
    BufferDesc {
        size: Size::new(w, h),
        ty: ResultType::Color,
        precision: Precision::Full,
    }
}

#[test]
fn pool_honors_bucket_cap() {
    let mut p = BufferPool::new(BufferPoolOpts {
        max_pool_bytes: 1 << 30,
        max_buffers_per_bucket: 1,
        max_live_bytes: None,
    });
    let d = desc(8, 8);

    let a = p.acquire(d, true).unwrap();
    let b = p.acquire(d, true).unwrap();
    p.recycle(a, true);
    p.recycle(b, true);

    let st = p.stats();
    assert_eq!(st.retained_buffers, 1);
    assert_eq!(st.dropped_on_release, 1);
    assert_eq!(st.live_bytes, 0);
}

#[test]
fn pool_honors_global_byte_cap() {
    let bytes_8x8 = desc(8, 8).byte_len();
    let mut p = BufferPool::new(BufferPoolOpts {
        max_pool_bytes: bytes_8x8,
        max_buffers_per_bucket: 8,
        max_live_bytes: None,
    });
    let d = desc(8, 8);

    let a = p.acquire(d, true).unwrap();
    let b = p.acquire(d, true).unwrap();
    p.recycle(a, true);
    p.recycle(b, true);

    let st = p.stats();
    assert_eq!(st.retained_bytes, bytes_8x8);
    assert_eq!(st.retained_buffers, 1);
    assert!(st.dropped_on_release >= 1);
}

#[test]
fn reused_buffers_come_back_zeroed() {
    let mut p = BufferPool::default();
    let d = desc(2, 2);
    let mut a = p.acquire(d, true).unwrap();
    a.data_mut().fill(3.0);
    p.recycle(a, true);

    let b = p.acquire(d, true).unwrap();
    assert!(b.data().iter().all(|&v| v == 0.0));
    assert_eq!(p.stats().reused_buffers, 1);
    assert_eq!(p.stats().alloc_buffers, 1);
}

#[test]
fn dedicated_buffers_are_not_retained() {
    let mut p = BufferPool::default();
    let a = p.acquire(desc(4, 4), false).unwrap();
    p.recycle(a, false);
    assert_eq!(p.stats().retained_buffers, 0);
    assert_eq!(p.stats().dropped_on_release, 1);
}

#[test]
fn live_byte_limit_fails_acquisition() {
    let mut p = BufferPool::new(BufferPoolOpts {
        max_live_bytes: Some(desc(4, 4).byte_len()),
        ..BufferPoolOpts::default()
    });
    let a = p.acquire(desc(4, 4), true).unwrap();
    let err = p.acquire(desc(1, 1), true).unwrap_err();
    assert!(matches!(err, GraphError::Allocation(_)));

    p.recycle(a, true);
    assert!(p.acquire(desc(1, 1), true).is_ok());
}
