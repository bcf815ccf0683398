use crate::domain::Size;
use crate::foundation::error::{GraphError, GraphResult};
use crate::result::value::{ImageBuffer, Precision, ResultType};
use std::collections::HashMap;

/// Shape of backing storage requested for an image result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Pixel size.
    pub size: Size,
    /// Value type per pixel.
    pub ty: ResultType,
    /// Storage precision.
    pub precision: Precision,
}

impl BufferDesc {
    fn byte_len(self) -> usize {
        self.size
            .pixel_count()
            .saturating_mul(self.ty.channel_count())
            .saturating_mul(self.precision.bytes_per_channel())
    }
}

/// Resource allocator collaborator: hands out backing storage and takes it back on release.
///
/// `pooled` distinguishes short-lived intermediates, which may be recycled, from dedicated
/// storage that should be dropped on release.
pub trait ResourceAllocator: Send {
    /// Acquire a zero-filled buffer matching `desc`.
    fn acquire(&mut self, desc: BufferDesc, pooled: bool) -> GraphResult<ImageBuffer>;

    /// Return a buffer previously handed out by [`ResourceAllocator::acquire`].
    fn recycle(&mut self, buffer: ImageBuffer, pooled: bool);
}

/// Pool configuration for cached buffers.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per (size, type, precision) bucket.
    pub max_buffers_per_bucket: usize,
    /// Upper bound on bytes handed out and not yet recycled. Acquisitions beyond it fail.
    pub max_live_bytes: Option<usize>,
}

impl Default for BufferPoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
            max_live_bytes: None,
        }
    }
}

/// Counters describing pool behavior.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers currently retained for reuse.
    pub retained_buffers: usize,
    /// Bytes currently retained for reuse.
    pub retained_bytes: usize,
    /// Bytes handed out and not yet recycled.
    pub live_bytes: usize,
    /// Fresh allocations.
    pub alloc_buffers: u64,
    /// Bytes of fresh allocations.
    pub alloc_bytes: u64,
    /// Acquisitions served from a bucket.
    pub reused_buffers: u64,
    /// Buffers returned through [`ResourceAllocator::recycle`].
    pub recycled_buffers: u64,
    /// Recycled buffers dropped because a cap was hit or they were dedicated.
    pub dropped_on_release: u64,
}

struct Bucket {
    buffers: Vec<ImageBuffer>,
}

/// Bounded pooled allocator for host image buffers.
///
/// Keyed by `(size, type, precision)`. Acquire/recycle happen at operation granularity.
pub struct BufferPool {
    opts: BufferPoolOpts,
    stats: BufferPoolStats,

    bucket_idx_by_key: HashMap<BufferDesc, usize>,
    buckets: Vec<Bucket>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new(opts: BufferPoolOpts) -> Self {
        Self {
            opts,
            stats: BufferPoolStats::default(),
            bucket_idx_by_key: HashMap::new(),
            buckets: Vec::new(),
        }
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        self.stats.clone()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolOpts::default())
    }
}

impl ResourceAllocator for BufferPool {
    fn acquire(&mut self, desc: BufferDesc, pooled: bool) -> GraphResult<ImageBuffer> {
        let bytes = desc.byte_len();
        if let Some(limit) = self.opts.max_live_bytes
            && self.stats.live_bytes.saturating_add(bytes) > limit
        {
            return Err(GraphError::allocation(format!(
                "cannot acquire {}x{} {:?} buffer: {} live bytes exceed the {} byte limit",
                desc.size.width,
                desc.size.height,
                desc.ty,
                self.stats.live_bytes.saturating_add(bytes),
                limit
            )));
        }
        self.stats.live_bytes = self.stats.live_bytes.saturating_add(bytes);

        if pooled
            && let Some(&bi) = self.bucket_idx_by_key.get(&desc)
            && let Some(mut buffer) = self.buckets[bi].buffers.pop()
        {
            self.stats.retained_buffers = self.stats.retained_buffers.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(bytes);
            self.stats.reused_buffers = self.stats.reused_buffers.saturating_add(1);
            buffer.reset();
            return Ok(buffer);
        }

        self.stats.alloc_buffers = self.stats.alloc_buffers.saturating_add(1);
        self.stats.alloc_bytes = self.stats.alloc_bytes.saturating_add(bytes as u64);
        Ok(ImageBuffer::new(desc.size, desc.ty, desc.precision))
    }

    fn recycle(&mut self, buffer: ImageBuffer, pooled: bool) {
        let desc = BufferDesc {
            size: buffer.size(),
            ty: buffer.ty(),
            precision: buffer.precision(),
        };
        let bytes = buffer.byte_len();
        self.stats.recycled_buffers = self.stats.recycled_buffers.saturating_add(1);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(bytes);

        if !pooled || self.opts.max_pool_bytes == 0 || self.opts.max_buffers_per_bucket == 0 {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        if self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bi = match self.bucket_idx_by_key.get(&desc).copied() {
            Some(i) => i,
            None => {
                let i = self.buckets.len();
                self.buckets.push(Bucket {
                    buffers: Vec::new(),
                });
                self.bucket_idx_by_key.insert(desc, i);
                i
            }
        };

        let bucket = &mut self.buckets[bi];
        if bucket.buffers.len() >= self.opts.max_buffers_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.buffers.push(buffer);
        self.stats.retained_buffers = self.stats.retained_buffers.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/result/pool.rs"]
mod tests;
