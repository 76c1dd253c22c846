use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A composed image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgb>,
}

impl Frame {
    pub const fn new(width: u32, height: u32, pixels: Vec<Rgb>) -> Self {
        Self { width, height, pixels }
    }

    pub fn filled(width: u32, height: u32, color: Rgb) -> Self {
        Self::new(width, height, vec![color; width as usize * height as usize])
    }

    /// Color at (`x`, `y`), `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Binary PPM (P6) encoding.
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.reserve(self.pixels.len() * 3);
        for p in &self.pixels {
            out.extend_from_slice(&[p.r, p.g, p.b]);
        }
        out
    }
}

/// Single-slot holder for the most recent complete frame.
///
/// Publishing replaces the slot; readers get a shared handle to whichever
/// frame was current and never observe a partial one.
#[derive(Debug)]
pub struct FrameMailbox {
    slot: Mutex<(u64, Arc<Frame>)>,
}

impl FrameMailbox {
    pub fn new(initial: Frame) -> Self {
        Self {
            slot: Mutex::new((0, Arc::new(initial))),
        }
    }

    /// Replace the current frame. Returns the new generation number.
    pub fn publish(&self, frame: Frame) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.0 += 1;
        slot.1 = Arc::new(frame);
        slot.0
    }

    pub fn latest(&self) -> Arc<Frame> {
        let slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&slot.1)
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).0
    }
}
