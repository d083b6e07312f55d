// draw_surf.rs — surface draw dispatch with per-frame counters

use thiserror::Error;

use neo_common::common::DiagnosticSink;

use crate::backend::BackEnd;
use crate::device::{PrimitiveMode, RenderDevice};
use crate::draw::IndexError;
use crate::tr_local::DrawSurface;
use crate::vertex_cache::VertexCache;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DrawError {
    /// The surface has no resolvable index cache.
    #[error("Attempting to draw without index caching. This is a bug.")]
    MissingIndexCache,
    /// The index adapter refused the draw.
    #[error("draw skipped: {0}")]
    Skipped(#[from] IndexError),
}

impl DrawError {
    /// Route the error to `sink`. Skipped draws are already counted and are
    /// not reported.
    pub fn report(&self, sink: &dyn DiagnosticSink) {
        if let DrawError::MissingIndexCache = self {
            sink.report("missing_index_cache", &format!("{}\n", self));
        }
    }
}

impl<D: RenderDevice> BackEnd<D> {
    /// Draw every index of `surf`.
    pub fn draw_surface<V: VertexCache + ?Sized>(
        &mut self,
        surf: &DrawSurface,
        vertex_cache: &V,
    ) -> Result<(), DrawError> {
        self.pc.c_draw_elements += 1;
        self.draw_cached_indexes(surf, surf.num_indexes, vertex_cache)
    }

    /// Draw the first `num_indexes` indices of a shadow volume surface,
    /// which leaves out the caps when they are not needed.
    pub fn draw_shadow_surface<V: VertexCache + ?Sized>(
        &mut self,
        surf: &DrawSurface,
        num_indexes: usize,
        vertex_cache: &V,
    ) -> Result<(), DrawError> {
        self.pc.c_shadow_elements += 1;
        self.draw_cached_indexes(surf, num_indexes, vertex_cache)
    }

    fn draw_cached_indexes<V: VertexCache + ?Sized>(
        &mut self,
        surf: &DrawSurface,
        num_indexes: usize,
        vertex_cache: &V,
    ) -> Result<(), DrawError> {
        let indices = surf
            .index_cache
            .and_then(|handle| vertex_cache.position(handle))
            .ok_or(DrawError::MissingIndexCache)?;

        match self.adapter.draw_elements_with_conversion(
            &mut self.device,
            PrimitiveMode::Triangles,
            num_indexes,
            indices,
        ) {
            Ok(_) => {
                self.pc.c_vbo_indexes += num_indexes;
                Ok(())
            }
            Err(err) => {
                self.pc.c_skipped_draws += 1;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::IndexStreamAdapter;
    use crate::recording::{DeviceCall, RecordingDevice};
    use crate::tr_local::GlConfig;
    use crate::vertex_cache::{FrameIndexCache, IndexCacheHandle};
    use neo_common::common::WarnOnce;

    fn surface(cache: &mut FrameIndexCache, indices: &[u32]) -> DrawSurface {
        DrawSurface {
            index_cache: Some(cache.alloc(indices)),
            num_indexes: indices.len(),
            ..Default::default()
        }
    }

    // ============================================================
    // draw_surface
    // ============================================================

    #[test]
    fn test_draw_surface_counts() {
        let mut cache = FrameIndexCache::new();
        let surf = surface(&mut cache, &[0, 1, 2, 2, 1, 3]);
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig::default()));

        be.draw_surface(&surf, &cache).unwrap();
        be.draw_surface(&surf, &cache).unwrap();

        assert_eq!(be.pc.c_draw_elements, 2);
        assert_eq!(be.pc.c_vbo_indexes, 12);
        assert_eq!(be.device.draw_count(), 2);
    }

    #[test]
    fn test_missing_index_cache_is_not_drawn() {
        let cache = FrameIndexCache::new();
        let surf = DrawSurface { num_indexes: 3, ..Default::default() };
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig::default()));

        let err = be.draw_surface(&surf, &cache).unwrap_err();
        assert_eq!(err, DrawError::MissingIndexCache);
        assert_eq!(be.pc.c_draw_elements, 1);
        assert_eq!(be.pc.c_vbo_indexes, 0);
        assert!(be.device.calls.is_empty());

        // stale handle behaves the same
        let stale = DrawSurface {
            index_cache: Some(IndexCacheHandle(5)),
            num_indexes: 3,
            ..Default::default()
        };
        assert_eq!(be.draw_surface(&stale, &cache), Err(DrawError::MissingIndexCache));
    }

    #[test]
    fn test_missing_index_cache_warns_once() {
        let cache = FrameIndexCache::new();
        let surf = DrawSurface { num_indexes: 3, ..Default::default() };
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig::default()));
        let sink = WarnOnce::new();

        for _ in 0..3 {
            if let Err(err) = be.draw_surface(&surf, &cache) {
                err.report(&sink);
            }
        }
        assert!(sink.has_reported("missing_index_cache"));
        assert_eq!(sink.suppressed(), 2);
    }

    #[test]
    fn test_skipped_draw_is_counted() {
        let mut cache = FrameIndexCache::new();
        let surf = surface(&mut cache, &[0, 1, 2, 3, 4, 5]);
        let device = RecordingDevice::new(GlConfig {
            use_short_index_elements: true,
            ..Default::default()
        });
        let mut be = BackEnd::with_adapter(device, IndexStreamAdapter::with_capacity(3));

        let err = be.draw_surface(&surf, &cache).unwrap_err();
        assert!(matches!(err, DrawError::Skipped(IndexError::CapacityExceeded { .. })));
        assert_eq!(be.pc.c_skipped_draws, 1);
        assert_eq!(be.pc.c_vbo_indexes, 0);

        let sink = WarnOnce::new();
        err.report(&sink);
        assert!(!sink.has_reported("missing_index_cache"));
    }

    // ============================================================
    // draw_shadow_surface
    // ============================================================

    #[test]
    fn test_shadow_surface_uses_supplied_count() {
        let mut cache = FrameIndexCache::new();
        let surf = surface(&mut cache, &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig::default()));

        be.draw_shadow_surface(&surf, 6, &cache).unwrap();

        assert_eq!(be.pc.c_shadow_elements, 1);
        assert_eq!(be.pc.c_draw_elements, 0);
        assert_eq!(be.pc.c_vbo_indexes, 6);
        assert_eq!(
            be.device.calls,
            vec![DeviceCall::DrawElementsU32 {
                mode: PrimitiveMode::Triangles,
                indices: vec![0, 1, 2, 3, 4, 5],
            }]
        );
    }

    #[test]
    fn test_shadow_surface_without_cache() {
        let cache = FrameIndexCache::new();
        let surf = DrawSurface::default();
        let mut be = BackEnd::new(RecordingDevice::new(GlConfig::default()));
        assert_eq!(
            be.draw_shadow_surface(&surf, 0, &cache),
            Err(DrawError::MissingIndexCache)
        );
        assert_eq!(be.pc.c_shadow_elements, 1);
    }
}
