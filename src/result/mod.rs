//! Reference-counted results stored in an arena.
//!
//! A result is either a single value or an image buffer plus its [`Domain`]. Proxies delegate
//! storage and reference counting to a master result through a short chain of indices.

pub(crate) mod pool;
pub(crate) mod value;

use crate::domain::{Domain, Size};
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::ResultId;
use crate::result::pool::{BufferDesc, ResourceAllocator};
use crate::result::value::{ImageBuffer, Precision, ResultType, Value};

// Proxies are only created by pass-through, never cyclically; this bounds the resolve walk.
const MAX_PROXY_DEPTH: usize = 64;

#[derive(Debug)]
enum Storage {
    Unallocated,
    Single(Value),
    Image(ImageBuffer),
}

impl Storage {
    fn is_allocated(&self) -> bool {
        !matches!(self, Self::Unallocated)
    }
}

#[derive(Debug)]
struct ResultRecord {
    ty: ResultType,
    precision: Precision,
    is_single_value: bool,
    storage: Storage,
    reference_count: u32,
    initial_reference_count: u32,
    domain: Domain,
    master: Option<ResultId>,
    is_external: bool,
    pooled: bool,
}

/// Allocation counters of a result store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResultStats {
    /// Storage allocations performed (images, single values and invalid fallbacks).
    pub allocations: u64,
    /// Storage releases performed; never counts external storage.
    pub frees: u64,
    /// Results currently holding owned storage.
    pub live: usize,
}

/// Arena of result records plus the allocator backing their images.
pub(crate) struct ResultStore {
    records: Vec<ResultRecord>,
    allocator: Box<dyn ResourceAllocator>,
    allocations: u64,
    frees: u64,
}

impl ResultStore {
    pub(crate) fn new(allocator: Box<dyn ResourceAllocator>) -> Self {
        Self {
            records: Vec::new(),
            allocator,
            allocations: 0,
            frees: 0,
        }
    }

    pub(crate) fn set_allocator(&mut self, allocator: Box<dyn ResourceAllocator>) {
        self.allocator = allocator;
    }

    /// Create an unallocated result with a zero reference count.
    pub(crate) fn create(&mut self, ty: ResultType, precision: Precision) -> ResultId {
        let id = ResultId(self.records.len() as u32);
        self.records.push(ResultRecord {
            ty,
            precision,
            is_single_value: false,
            storage: Storage::Unallocated,
            reference_count: 0,
            initial_reference_count: 0,
            domain: Domain::identity(),
            master: None,
            is_external: false,
            pooled: false,
        });
        id
    }

    pub(crate) fn stats(&self) -> ResultStats {
        ResultStats {
            allocations: self.allocations,
            frees: self.frees,
            live: self
                .records
                .iter()
                .filter(|r| r.storage.is_allocated() && !r.is_external)
                .count(),
        }
    }

    fn rec(&self, id: ResultId) -> &ResultRecord {
        &self.records[id.index()]
    }

    fn rec_mut(&mut self, id: ResultId) -> &mut ResultRecord {
        &mut self.records[id.index()]
    }

    /// Follow the master chain to the result that owns storage and reference count.
    pub(crate) fn resolve(&self, id: ResultId) -> ResultId {
        let mut cur = id;
        for _ in 0..MAX_PROXY_DEPTH {
            match self.rec(cur).master {
                Some(m) => cur = m,
                None => return cur,
            }
        }
        debug_assert!(false, "proxy chain of {id:?} exceeds {MAX_PROXY_DEPTH}");
        cur
    }

    pub(crate) fn is_proxy(&self, id: ResultId) -> bool {
        self.rec(id).master.is_some()
    }

    pub(crate) fn ty(&self, id: ResultId) -> ResultType {
        self.rec(id).ty
    }

    pub(crate) fn precision(&self, id: ResultId) -> Precision {
        self.rec(id).precision
    }

    pub(crate) fn is_single_value(&self, id: ResultId) -> bool {
        self.rec(self.resolve(id)).is_single_value
    }

    pub(crate) fn is_allocated(&self, id: ResultId) -> bool {
        self.rec(self.resolve(id)).storage.is_allocated()
    }

    /// Domain of this result; proxies keep their own domain.
    pub(crate) fn domain(&self, id: ResultId) -> Domain {
        self.rec(id).domain
    }

    pub(crate) fn set_domain(&mut self, id: ResultId, domain: Domain) {
        self.rec_mut(id).domain = domain;
    }

    pub(crate) fn reference_count(&self, id: ResultId) -> u32 {
        self.rec(self.resolve(id)).reference_count
    }

    pub(crate) fn set_initial_reference_count(&mut self, id: ResultId, count: u32) {
        let r = self.rec_mut(id);
        r.initial_reference_count = count;
        r.reference_count = count;
    }

    /// Remove `count` consumers from this result, both for the running pass and for replays.
    ///
    /// A proxy also hands the references back to its master.
    pub(crate) fn decrement_reference_count(&mut self, id: ResultId, count: u32) -> GraphResult<()> {
        if count == 0 {
            return Ok(());
        }
        let r = self.rec_mut(id);
        if r.initial_reference_count < count || r.reference_count < count {
            return Err(GraphError::evaluation(format!(
                "cannot drop {count} references from {id:?}, it holds {}",
                r.reference_count
            )));
        }
        r.initial_reference_count -= count;
        r.reference_count -= count;
        if let Some(master) = r.master {
            let root = self.resolve(master);
            let m = self.rec_mut(root);
            m.reference_count = m.reference_count.checked_sub(count).ok_or_else(|| {
                GraphError::evaluation(format!("master of {id:?} underflows on decrement"))
            })?;
        }
        Ok(())
    }

    /// Results with no consumers are still allocated, but only as cheap dummies.
    pub(crate) fn should_compute(&self, id: ResultId) -> bool {
        self.rec(id).initial_reference_count != 0
    }

    /// Restore the reference count for a new pass and drop any proxy link.
    pub(crate) fn reset(&mut self, id: ResultId) {
        let r = self.rec_mut(id);
        r.reference_count = r.initial_reference_count;
        r.master = None;
    }

    fn check_allocatable(&self, id: ResultId) -> GraphResult<()> {
        let r = self.rec(id);
        if r.master.is_some() {
            return Err(GraphError::evaluation(format!(
                "cannot allocate proxy result {id:?}"
            )));
        }
        if r.storage.is_allocated() && !r.is_external {
            return Err(GraphError::evaluation(format!(
                "result {id:?} is already allocated"
            )));
        }
        Ok(())
    }

    /// Allocate image storage over `domain`; results nobody consumes get a 1x1 dummy.
    pub(crate) fn allocate_image(
        &mut self,
        id: ResultId,
        domain: Domain,
        pooled: bool,
    ) -> GraphResult<()> {
        self.check_allocatable(id)?;
        let (size, domain) = if self.should_compute(id) {
            (domain.size(), domain)
        } else {
            (Size::new(1, 1), Domain::identity())
        };
        let desc = BufferDesc {
            size,
            ty: self.ty(id),
            precision: self.precision(id),
        };
        let buffer = self.allocator.acquire(desc, pooled)?;
        let r = self.rec_mut(id);
        r.storage = Storage::Image(buffer);
        r.is_single_value = false;
        r.is_external = false;
        r.pooled = pooled;
        r.domain = domain;
        self.allocations += 1;
        Ok(())
    }

    /// Allocate a zero single value over the identity domain.
    pub(crate) fn allocate_single_value(&mut self, id: ResultId) -> GraphResult<()> {
        self.check_allocatable(id)?;
        let r = self.rec_mut(id);
        r.storage = Storage::Single(Value::zero(r.ty));
        r.is_single_value = true;
        r.is_external = false;
        r.pooled = false;
        r.domain = Domain::identity();
        self.allocations += 1;
        Ok(())
    }

    /// Replace whatever this result holds with a zero single value.
    pub(crate) fn allocate_invalid(&mut self, id: ResultId) -> GraphResult<()> {
        if self.is_proxy(id) {
            return Err(GraphError::evaluation(format!(
                "cannot invalidate proxy result {id:?}"
            )));
        }
        self.free_storage(id);
        self.allocate_single_value(id)
    }

    pub(crate) fn set_single_value(&mut self, id: ResultId, value: Value) -> GraphResult<()> {
        let ty = self.ty(id);
        let value = value.convert(ty).ok_or_else(|| {
            GraphError::evaluation(format!("cannot store {:?} into a {ty:?} result", value.ty()))
        })?;
        match &mut self.rec_mut(id).storage {
            Storage::Single(v) => {
                *v = value;
                Ok(())
            }
            _ => Err(GraphError::evaluation(format!(
                "result {id:?} does not hold a single value"
            ))),
        }
    }

    pub(crate) fn single_value(&self, id: ResultId) -> Option<Value> {
        match &self.rec(self.resolve(id)).storage {
            Storage::Single(v) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn image(&self, id: ResultId) -> Option<&ImageBuffer> {
        match &self.rec(self.resolve(id)).storage {
            Storage::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Temporarily move an owned image out so it can be written while inputs are read.
    pub(crate) fn take_image(&mut self, id: ResultId) -> Option<ImageBuffer> {
        let r = self.rec_mut(id);
        if r.master.is_some() || r.is_external {
            return None;
        }
        match std::mem::replace(&mut r.storage, Storage::Unallocated) {
            Storage::Image(img) => Some(img),
            other => {
                r.storage = other;
                None
            }
        }
    }

    pub(crate) fn restore_image(&mut self, id: ResultId, image: ImageBuffer) {
        self.rec_mut(id).storage = Storage::Image(image);
    }

    /// Make `target` a proxy of `source`.
    ///
    /// The owner of `source` gains `target`'s current references; `target` keeps its own initial
    /// count and takes over the domain of `source`.
    pub(crate) fn pass_through(&mut self, source: ResultId, target: ResultId) -> GraphResult<()> {
        let root = self.resolve(source);
        if root == target || source == target {
            return Err(GraphError::evaluation(format!(
                "pass-through from {source:?} to {target:?} would form a cycle"
            )));
        }
        if self.rec(target).storage.is_allocated() || self.rec(target).master.is_some() {
            return Err(GraphError::evaluation(format!(
                "pass-through target {target:?} must be unallocated"
            )));
        }
        let domain = self.domain(source);
        let t = self.rec_mut(target);
        t.master = Some(source);
        t.domain = domain;
        let count = t.reference_count;
        let m = self.rec_mut(root);
        m.reference_count = m.reference_count.saturating_add(count);
        Ok(())
    }

    /// Move storage, single-valueness and domain from `source` into the unallocated `target`.
    pub(crate) fn steal(&mut self, target: ResultId, source: ResultId) -> GraphResult<()> {
        if self.is_proxy(target) || self.is_proxy(source) {
            return Err(GraphError::evaluation(
                "steal requires two non-proxy results",
            ));
        }
        if self.rec(target).storage.is_allocated() {
            return Err(GraphError::evaluation(format!(
                "steal target {target:?} is already allocated"
            )));
        }
        if self.rec(source).is_external {
            return Err(GraphError::evaluation(format!(
                "cannot steal external storage of {source:?}"
            )));
        }
        if self.ty(target) != self.ty(source) {
            return Err(GraphError::evaluation(format!(
                "cannot steal a {:?} result into a {:?} result",
                self.ty(source),
                self.ty(target)
            )));
        }
        let s = self.rec_mut(source);
        let storage = std::mem::replace(&mut s.storage, Storage::Unallocated);
        let (is_single_value, domain, pooled) = (s.is_single_value, s.domain, s.pooled);
        let t = self.rec_mut(target);
        t.storage = storage;
        t.is_single_value = is_single_value;
        t.domain = domain;
        t.pooled = pooled;
        Ok(())
    }

    /// Attach host-owned image storage; releasing this result never frees it.
    pub(crate) fn wrap_external_image(
        &mut self,
        id: ResultId,
        image: ImageBuffer,
        domain: Domain,
    ) -> GraphResult<()> {
        self.check_allocatable(id)?;
        let r = self.rec_mut(id);
        r.storage = Storage::Image(image);
        r.is_single_value = false;
        r.is_external = true;
        r.domain = domain;
        Ok(())
    }

    /// Attach a host-owned single value; releasing this result never frees it.
    pub(crate) fn wrap_external_value(&mut self, id: ResultId, value: Value) -> GraphResult<()> {
        self.check_allocatable(id)?;
        let r = self.rec_mut(id);
        r.storage = Storage::Single(value);
        r.is_single_value = true;
        r.is_external = true;
        r.domain = Domain::identity();
        Ok(())
    }

    /// Drop one reference; the owner's storage is freed when its count reaches zero.
    pub(crate) fn release(&mut self, id: ResultId) -> GraphResult<()> {
        let root = self.resolve(id);
        let r = self.rec_mut(root);
        r.reference_count = r.reference_count.checked_sub(1).ok_or_else(|| {
            GraphError::evaluation(format!(
                "result {root:?} released more often than it is referenced"
            ))
        })?;
        if r.reference_count == 0 {
            self.free_storage(root);
        }
        Ok(())
    }

    /// Free the dummy storage of a result nobody consumes.
    pub(crate) fn release_unneeded(&mut self, id: ResultId) {
        if !self.should_compute(id) && !self.is_proxy(id) {
            self.free_storage(id);
        }
    }

    fn free_storage(&mut self, id: ResultId) {
        let r = self.rec_mut(id);
        if r.is_external {
            return;
        }
        let pooled = r.pooled;
        match std::mem::replace(&mut r.storage, Storage::Unallocated) {
            Storage::Unallocated => return,
            Storage::Single(_) => {}
            Storage::Image(img) => self.allocator.recycle(img, pooled),
        }
        self.frees += 1;
    }

    /// Free every owned storage and forget all records.
    pub(crate) fn release_all(&mut self) {
        for i in 0..self.records.len() {
            let id = ResultId(i as u32);
            if !self.is_proxy(id) {
                self.free_storage(id);
            }
        }
        self.records.clear();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/result/store.rs"]
mod tests;
