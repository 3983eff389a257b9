use std::cell::RefCell;
use std::sync::Arc;

use mpp_core::{MarkId, MppError};

use crate::mark::Mark;
use crate::voxel::{VoxelContext, VoxelizedMark};

#[derive(Debug)]
struct CachedVoxels {
    context: VoxelContext,
    voxels: Arc<VoxelizedMark>,
}

/// A mark together with its lazily computed voxelization.
///
/// The cached value is valid exactly as long as the mark has not been
/// replaced and is requested under the same [`VoxelContext`] it was computed
/// against: [`assign_from`](Self::assign_from) is the only way to change the
/// geometry and always clears the cache, and a request under a different
/// stack, region scheme or voxelizer recomputes and replaces it. The cache is
/// filled through `&self` so energy evaluation can read neighbouring marks
/// without taking the configuration mutably.
#[derive(Debug)]
pub struct VoxelizedMarkMemo {
    mark: Mark,
    cache: RefCell<Option<CachedVoxels>>,
}

impl VoxelizedMarkMemo {
    /// Wraps a mark with an empty cache.
    pub fn new(mark: Mark) -> Self {
        Self {
            mark,
            cache: RefCell::new(None),
        }
    }

    /// The wrapped mark.
    pub fn mark(&self) -> &Mark {
        &self.mark
    }

    /// Identifier of the wrapped mark.
    pub fn id(&self) -> MarkId {
        self.mark.id()
    }

    /// Returns `true` when a voxelization is currently cached.
    pub fn is_cached(&self) -> bool {
        self.cache.borrow().is_some()
    }

    /// Returns `true` when the cached voxelization was computed under `context`.
    pub fn is_cached_for(&self, context: &VoxelContext) -> bool {
        self.cache
            .borrow()
            .as_ref()
            .is_some_and(|cached| cached.context.is_same(context))
    }

    /// Returns the voxelization under `context`, computing it on first access
    /// or when the cache was filled under another context.
    pub fn voxelized(&self, context: &VoxelContext) -> Result<Arc<VoxelizedMark>, MppError> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            if cached.context.is_same(context) {
                return Ok(Arc::clone(&cached.voxels));
            }
        }
        let voxels = Arc::new(context.voxelize(&self.mark)?);
        *self.cache.borrow_mut() = Some(CachedVoxels {
            context: context.clone(),
            voxels: Arc::clone(&voxels),
        });
        Ok(voxels)
    }

    /// Drops the cached voxelization.
    pub fn reset(&mut self) {
        self.cache.get_mut().take();
    }

    /// Replaces the geometry of the mark and invalidates the cache.
    pub fn assign_from(&mut self, mark: Mark) {
        self.mark = mark;
        self.reset();
    }

    /// Deep copy of the mark with an empty cache.
    pub fn duplicate_fresh(&self) -> Self {
        Self::new(self.mark.clone())
    }

    /// Consumes the memo, returning the mark.
    pub fn into_mark(self) -> Mark {
        self.mark
    }
}
