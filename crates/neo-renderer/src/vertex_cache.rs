// vertex_cache.rs — index cache contract and a per-frame implementation

/// Non-owning reference to an index range held by the vertex cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexCacheHandle(pub u32);

/// Resolves index-cache handles for the back end.
pub trait VertexCache {
    /// The 32-bit indices behind `handle`, or `None` if the handle is stale
    /// or was never allocated.
    fn position(&self, handle: IndexCacheHandle) -> Option<&[u32]>;
}

/// Frame-temporary index storage. Handles are valid until `clear_frame`.
#[derive(Default)]
pub struct FrameIndexCache {
    indexes: Vec<u32>,
    ranges: Vec<(usize, usize)>,
}

impl FrameIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `indices` into the cache.
    pub fn alloc(&mut self, indices: &[u32]) -> IndexCacheHandle {
        let start = self.indexes.len();
        self.indexes.extend_from_slice(indices);
        self.ranges.push((start, indices.len()));
        IndexCacheHandle((self.ranges.len() - 1) as u32)
    }

    /// Drop everything allocated this frame.
    pub fn clear_frame(&mut self) {
        self.indexes.clear();
        self.ranges.clear();
    }

    /// Total indices held.
    pub fn total_indexes(&self) -> usize {
        self.indexes.len()
    }
}

impl VertexCache for FrameIndexCache {
    fn position(&self, handle: IndexCacheHandle) -> Option<&[u32]> {
        let &(start, len) = self.ranges.get(handle.0 as usize)?;
        self.indexes.get(start..start + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_resolve() {
        let mut cache = FrameIndexCache::new();
        let a = cache.alloc(&[0, 1, 2]);
        let b = cache.alloc(&[3, 4, 5, 5, 4, 6]);
        assert_eq!(cache.position(a), Some(&[0u32, 1, 2][..]));
        assert_eq!(cache.position(b).map(<[u32]>::len), Some(6));
        assert_eq!(cache.total_indexes(), 9);
    }

    #[test]
    fn test_clear_frame_invalidates_handles() {
        let mut cache = FrameIndexCache::new();
        let a = cache.alloc(&[0, 1, 2]);
        cache.clear_frame();
        assert_eq!(cache.position(a), None);
        assert_eq!(cache.position(IndexCacheHandle(42)), None);
    }
}
