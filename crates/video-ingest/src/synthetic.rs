//! Generated test-pattern source used for demos and headless runs.

use crate::{CaptureError, Frame, FrameSource, SourceOpener};

const BLOCK_SIZE: i32 = 48;

/// Opens [`SyntheticCamera`]s of a fixed size.
pub struct SyntheticOpener {
    width: i32,
    height: i32,
}

impl SyntheticOpener {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, device_index: i32) -> Result<Box<dyn FrameSource>, CaptureError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(CaptureError::Open {
                device: device_index,
            });
        }
        tracing::debug!(
            "Synthetic camera #{device_index} opened at {}x{}",
            self.width,
            self.height
        );
        Ok(Box::new(SyntheticCamera::new(
            device_index,
            self.width,
            self.height,
        )))
    }
}

/// Gradient background with a block sweeping left to right.
pub struct SyntheticCamera {
    device_index: i32,
    width: i32,
    height: i32,
    frame_counter: u64,
}

impl SyntheticCamera {
    pub fn new(device_index: i32, width: i32, height: i32) -> Self {
        Self {
            device_index,
            width,
            height,
            frame_counter: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut data = vec![0u8; width * height * 3];
        let travel = (self.width - BLOCK_SIZE).max(1) as u64;
        let block_x = (self.frame_counter * 4 % travel) as i32;
        let block_y = (self.height - BLOCK_SIZE).max(0) / 2;

        for y in 0..height {
            for x in 0..width {
                let offset = (y * width + x) * 3;
                let in_block = (x as i32) >= block_x
                    && (x as i32) < block_x + BLOCK_SIZE
                    && (y as i32) >= block_y
                    && (y as i32) < block_y + BLOCK_SIZE;
                if in_block {
                    data[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
                } else {
                    data[offset] = (x * 255 / width.max(1)) as u8;
                    data[offset + 1] = (y * 255 / height.max(1)) as u8;
                    data[offset + 2] = 64;
                }
            }
        }
        data
    }
}

impl FrameSource for SyntheticCamera {
    fn device_index(&self) -> i32 {
        self.device_index
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let frame = Frame::from_bgr(self.width, self.height, self.render())?;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_moves_between_frames() {
        let mut camera = SyntheticCamera::new(0, 128, 64);
        let first = camera.read_frame().unwrap();
        let second = camera.read_frame().unwrap();
        assert_eq!(first.data.len(), 128 * 64 * 3);
        assert_ne!(first.data, second.data);
        assert_eq!(camera.device_index(), 0);
    }

    #[test]
    fn rejects_empty_geometry() {
        let opener = SyntheticOpener::new(0, 10);
        assert!(matches!(
            opener.open(1),
            Err(CaptureError::Open { device: 1 })
        ));
    }
}
