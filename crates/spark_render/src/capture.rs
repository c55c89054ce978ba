//! Color target readback
//!
//! Texture to buffer copies pad every row to
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`]. The transfer buffer is sized for the
//! padded layout and the padding is stripped after the fence.

use crate::backend::{GpuBackend, SubmissionId};
use crate::error::RenderError;
use crate::handle::Handle;
use crate::registry::Registry;

const BYTES_PER_PIXEL: u32 = 4;

/// Padded row layout of an RGBA8 image copied out of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLayout {
    pub width: u32,
    pub height: u32,
    pub padded_bytes_per_row: u32,
}

impl CaptureLayout {
    pub fn new(width: u32, height: u32) -> Self {
        let unpadded = width * BYTES_PER_PIXEL;
        Self {
            width,
            height,
            padded_bytes_per_row: unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
        }
    }

    pub fn unpadded_bytes_per_row(&self) -> u32 {
        self.width * BYTES_PER_PIXEL
    }

    /// Size of the transfer buffer the copy lands in
    pub fn buffer_size(&self) -> u64 {
        self.padded_bytes_per_row as u64 * self.height as u64
    }

    /// Drop row padding, producing tightly packed RGBA8.
    pub fn unpad(&self, padded: &[u8]) -> Vec<u8> {
        let row = self.unpadded_bytes_per_row() as usize;
        let mut pixels = Vec::with_capacity(row * self.height as usize);
        for chunk in padded
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.height as usize)
        {
            pixels.extend_from_slice(&chunk[..row]);
        }
        pixels
    }
}

/// Reads a captured frame back once its submission has completed.
pub struct Capture {
    layout: CaptureLayout,
    staging: Vec<u8>,
}

impl Capture {
    pub fn new(layout: CaptureLayout) -> Self {
        Self {
            layout,
            staging: vec![0; layout.buffer_size() as usize],
        }
    }

    pub fn layout(&self) -> CaptureLayout {
        self.layout
    }

    /// Wait for `submission`, then return the transfer buffer as packed RGBA8.
    pub fn read_back<B: GpuBackend>(
        &mut self,
        registry: &mut Registry<B>,
        transfer_buffer: Handle,
        submission: SubmissionId,
    ) -> Result<Vec<u8>, RenderError> {
        registry.wait_for(submission)?;
        registry.read_buffer(transfer_buffer, &mut self.staging)?;
        Ok(self.layout.unpad(&self.staging))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        let layout = CaptureLayout::new(1280, 720);
        assert_eq!(layout.padded_bytes_per_row, 5120);

        let layout = CaptureLayout::new(3, 2);
        assert_eq!(layout.unpadded_bytes_per_row(), 12);
        assert_eq!(layout.padded_bytes_per_row, 256);
        assert_eq!(layout.buffer_size(), 512);
    }

    #[test]
    fn unpad_keeps_only_pixels() {
        let layout = CaptureLayout::new(2, 2);
        let mut padded = vec![0xEE; layout.buffer_size() as usize];
        padded[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        padded[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        assert_eq!(layout.unpad(&padded), (1..=16).collect::<Vec<u8>>());
    }
}
