// draw.rs — index stream adaptation for short-index contexts

use thiserror::Error;

use crate::device::{IndexData, IndexType, PrimitiveMode, RenderDevice};

/// Scratch capacity for narrowed indices.
pub const MAXIMUM_SHORTS_RENDER_INDICES: usize = 1024 * 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// More indices than the short scratch buffer holds. Nothing was drawn.
    #[error("{count} indices exceed the short index capacity of {capacity}")]
    CapacityExceeded { count: usize, capacity: usize },
    /// The count is larger than the index data supplied.
    #[error("draw of {count} indices from a buffer of {available}")]
    OutOfRange { count: usize, available: usize },
}

/// Copy `src` into `dst`, keeping the low 16 bits of each index.
pub fn narrow_indices(src: &[u32], dst: &mut [u16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s as u16;
    }
}

/// Issues indexed draws, narrowing 32-bit indices to 16 bits first when the
/// context only accepts short indices.
pub struct IndexStreamAdapter {
    shorts: Box<[u16]>,
}

impl Default for IndexStreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStreamAdapter {
    pub fn new() -> Self {
        Self::with_capacity(MAXIMUM_SHORTS_RENDER_INDICES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shorts: vec![0u16; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shorts.len()
    }

    /// Draw the first `count` entries of `indices`. Returns the index type
    /// the device received.
    pub fn draw_elements_with_conversion<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        mode: PrimitiveMode,
        count: usize,
        indices: &[u32],
    ) -> Result<IndexType, IndexError> {
        let src = indices.get(..count).ok_or(IndexError::OutOfRange {
            count,
            available: indices.len(),
        })?;

        if !device.gl_config().use_short_index_elements {
            device.draw_elements(mode, IndexData::U32(src));
            return Ok(IndexType::U32);
        }

        if count > self.shorts.len() {
            return Err(IndexError::CapacityExceeded {
                count,
                capacity: self.shorts.len(),
            });
        }

        let dst = &mut self.shorts[..count];
        narrow_indices(src, dst);
        device.draw_elements(mode, IndexData::U16(dst));
        Ok(IndexType::U16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{DeviceCall, RecordingDevice};
    use crate::tr_local::GlConfig;

    fn short_device() -> RecordingDevice {
        RecordingDevice::new(GlConfig {
            use_short_index_elements: true,
            ..Default::default()
        })
    }

    // ============================================================
    // Short-index path
    // ============================================================

    #[test]
    fn test_short_context_truncates_indices() {
        let mut device = short_device();
        let mut adapter = IndexStreamAdapter::new();
        let indices = [0u32, 1, 2, 65535, 65536, 70000];

        let ty = adapter
            .draw_elements_with_conversion(&mut device, PrimitiveMode::Triangles, 6, &indices)
            .unwrap();

        assert_eq!(ty, IndexType::U16);
        assert_eq!(
            device.calls,
            vec![DeviceCall::DrawElementsU16 {
                mode: PrimitiveMode::Triangles,
                indices: vec![0, 1, 2, 65535, 0, 4464],
            }]
        );
    }

    #[test]
    fn test_short_context_capacity_boundary() {
        let mut device = short_device();
        let mut adapter = IndexStreamAdapter::new();
        let indices: Vec<u32> = (0..MAXIMUM_SHORTS_RENDER_INDICES as u32 + 1).collect();

        // exactly at capacity draws
        let ty = adapter
            .draw_elements_with_conversion(
                &mut device,
                PrimitiveMode::Triangles,
                MAXIMUM_SHORTS_RENDER_INDICES,
                &indices,
            )
            .unwrap();
        assert_eq!(ty, IndexType::U16);
        assert_eq!(device.draw_count(), 1);

        // one past is skipped
        let err = adapter
            .draw_elements_with_conversion(
                &mut device,
                PrimitiveMode::Triangles,
                MAXIMUM_SHORTS_RENDER_INDICES + 1,
                &indices,
            )
            .unwrap_err();
        assert_eq!(
            err,
            IndexError::CapacityExceeded {
                count: MAXIMUM_SHORTS_RENDER_INDICES + 1,
                capacity: MAXIMUM_SHORTS_RENDER_INDICES,
            }
        );
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn test_short_context_empty_draw() {
        let mut device = short_device();
        let mut adapter = IndexStreamAdapter::with_capacity(8);
        adapter
            .draw_elements_with_conversion(&mut device, PrimitiveMode::Triangles, 0, &[])
            .unwrap();
        assert_eq!(
            device.calls,
            vec![DeviceCall::DrawElementsU16 {
                mode: PrimitiveMode::Triangles,
                indices: vec![],
            }]
        );
    }

    // ============================================================
    // Wide-index path
    // ============================================================

    #[test]
    fn test_wide_context_passes_through() {
        let mut device = RecordingDevice::new(GlConfig::default());
        let mut adapter = IndexStreamAdapter::with_capacity(2);
        let indices = [7u32, 70000, 3, 9];

        // larger than the scratch buffer, but never copied
        let ty = adapter
            .draw_elements_with_conversion(&mut device, PrimitiveMode::Triangles, 3, &indices)
            .unwrap();

        assert_eq!(ty, IndexType::U32);
        assert_eq!(
            device.calls,
            vec![DeviceCall::DrawElementsU32 {
                mode: PrimitiveMode::Triangles,
                indices: vec![7, 70000, 3],
            }]
        );
    }

    #[test]
    fn test_count_past_buffer_is_refused() {
        let mut device = RecordingDevice::new(GlConfig::default());
        let mut adapter = IndexStreamAdapter::new();
        let err = adapter
            .draw_elements_with_conversion(&mut device, PrimitiveMode::Triangles, 6, &[0, 1, 2])
            .unwrap_err();
        assert_eq!(err, IndexError::OutOfRange { count: 6, available: 3 });
        assert!(device.calls.is_empty());
    }

    #[test]
    fn test_narrow_indices() {
        let mut dst = [0u16; 3];
        narrow_indices(&[0x1_0001, 0xFFFF, 0x2_ABCD], &mut dst);
        assert_eq!(dst, [1, 0xFFFF, 0xABCD]);
    }
}
