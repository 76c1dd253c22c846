//! Memory-mapped screen peripheral.
//!
//! Memory layout relative to the configured base address:
//!
//! | offset                | contents                                   |
//! |-----------------------|--------------------------------------------|
//! | `0`                   | `width * height` palette indices           |
//! | `SECOND_FRAME_OFFSET` | reserved for a target-side second frame    |
//! | `PALETTE_OFFSET`      | 256 RGB triples                            |
//! | `STATUS_OFFSET`       | status byte: bit 7 ACK, bit 6 FILL         |
//!
//! Frames are composed on a background [`RepeatingTask`] and published to a
//! [`FrameMailbox`], so readers always see a complete frame.

mod frame;

pub use frame::{Frame, FrameMailbox, Rgb};

use crate::config::ScreenConfig;
use crate::engine::{Engine, EngineError};
use crate::poll::{CancelToken, RepeatingTask};
use std::ops::ControlFlow;
use std::sync::Arc;
use thiserror::Error;

/// Default base of the screen region.
pub const DEFAULT_ADDRESS: u32 = 0x020000;
/// Start of a second frame area. The host never reads it: a double-buffering
/// target copies or draws into the primary buffer before setting ACK.
pub const SECOND_FRAME_OFFSET: u32 = 0x010000;
/// 256 RGB triples, one per palette index.
pub const PALETTE_OFFSET: u32 = 0x020000;
/// Status byte, see [`Status`].
pub const STATUS_OFFSET: u32 = 0x020400;

/// Status bit 7: a frame is ready (frame-swap mode).
pub const ACK_MASK: u8 = 0b1000_0000;
/// Status bit 6: paint the whole frame with the color of the first index.
pub const FILL_SCREEN_MASK: u8 = 0b0100_0000;

const PALETTE_ENTRIES: usize = 256;
const MAX_PREALLOCATED_PIXELS: usize = 1 << 20;

/// Shown after the screen is switched off.
pub const IDLE_COLOR: Rgb = Rgb::BLACK;
/// Shown while the screen is on but the engine is not powered.
pub const ENGINE_OFF_COLOR: Rgb = Rgb::WHITE;

/// Why a frame could not be composed.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("screen memory read failed: {0}")]
    Engine(#[from] EngineError),
    #[error("composition cancelled")]
    Cancelled,
    /// The frame buffer would not fit in the 32-bit address space.
    #[error("{width}x{height} frame at 0x{base:08X} exceeds the address space")]
    TooLarge { base: u32, width: u32, height: u32 },
}

/// Decoded status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub ack: bool,
    pub fill: bool,
}

impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        Self {
            ack: byte & ACK_MASK != 0,
            fill: byte & FILL_SCREEN_MASK != 0,
        }
    }
}

/// Read and decode the status byte.
pub fn read_status(engine: &dyn Engine, config: &ScreenConfig) -> Result<Status, EngineError> {
    engine.read_byte(config.base_address.wrapping_add(STATUS_OFFSET)).map(Status::from)
}

/// Read the full 256-entry palette.
pub fn read_palette(engine: &dyn Engine, config: &ScreenConfig) -> Result<Vec<Rgb>, EngineError> {
    let raw = engine.read_block(config.base_address.wrapping_add(PALETTE_OFFSET), PALETTE_ENTRIES * 3)?;
    Ok(raw.chunks_exact(3).map(|c| Rgb::new(c[0], c[1], c[2])).collect())
}

/// Compose one frame from the buffer at `buffer_base`.
pub fn compose(engine: &dyn Engine, config: &ScreenConfig, buffer_base: u32) -> Result<Frame, ScreenError> {
    compose_cancellable(engine, config, buffer_base, &CancelToken::new())
}

fn compose_cancellable(
    engine: &dyn Engine,
    config: &ScreenConfig,
    buffer_base: u32,
    cancel: &CancelToken,
) -> Result<Frame, ScreenError> {
    config
        .frame_len()
        .and_then(|len| buffer_base.checked_add(len))
        .ok_or(ScreenError::TooLarge { base: buffer_base, width: config.width, height: config.height })?;

    let status = read_status(engine, config)?;
    let palette = read_palette(engine, config)?;

    if status.fill {
        let index = engine.read_byte(buffer_base)?;
        return Ok(Frame::filled(config.width, config.height, palette[usize::from(index)]));
    }

    let width = config.width as usize;
    // grow past this only as rows actually read back
    let mut pixels = Vec::with_capacity(config.pixel_count().min(MAX_PREALLOCATED_PIXELS));
    for y in 0..config.height {
        if cancel.is_cancelled() {
            return Err(ScreenError::Cancelled);
        }
        // bounded by the frame_len check above
        let row_base = buffer_base + y * config.width;
        let row = engine.read_block(row_base, width)?;
        pixels.extend(row.iter().map(|&index| palette[usize::from(index)]));
    }
    Ok(Frame::new(config.width, config.height, pixels))
}

/// Callback invoked from the worker thread after each published frame.
pub type FrameListener = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Per-tick composition state owned by the worker thread.
pub struct ScreenWorker {
    engine: Arc<dyn Engine>,
    config: ScreenConfig,
    mailbox: Arc<FrameMailbox>,
    listener: Option<FrameListener>,
    showing_engine_off: bool,
}

impl ScreenWorker {
    pub fn new(
        engine: Arc<dyn Engine>,
        config: ScreenConfig,
        mailbox: Arc<FrameMailbox>,
        listener: Option<FrameListener>,
    ) -> Self {
        Self {
            engine,
            config,
            mailbox,
            listener,
            showing_engine_off: false,
        }
    }

    fn publish(&self, frame: Frame) -> u64 {
        let generation = self.mailbox.publish(frame);
        if let Some(listener) = &self.listener {
            listener(&self.mailbox.latest());
        }
        generation
    }

    /// Run one refresh. Returns the generation of the published frame, or
    /// `None` when nothing was published this tick.
    pub fn tick(&mut self, cancel: &CancelToken) -> Option<u64> {
        if !self.engine.power_status() {
            if self.showing_engine_off {
                return None;
            }
            self.showing_engine_off = true;
            let frame = Frame::filled(self.config.width, self.config.height, ENGINE_OFF_COLOR);
            return Some(self.publish(frame));
        }
        self.showing_engine_off = false;

        if self.config.frame_swap {
            match read_status(self.engine.as_ref(), &self.config) {
                Ok(status) if status.ack => {}
                Ok(_) => return None,
                Err(e) => {
                    log::debug!("Skipping frame, status read failed: {}", e);
                    return None;
                }
            }
        }

        match compose_cancellable(self.engine.as_ref(), &self.config, self.config.base_address, cancel) {
            Ok(frame) => {
                let generation = self.publish(frame);
                if self.config.frame_swap {
                    self.engine.raise_interrupt(self.config.irq_line);
                }
                Some(generation)
            }
            Err(ScreenError::Cancelled) => None,
            Err(e) => {
                log::debug!("Skipping frame: {}", e);
                None
            }
        }
    }
}

/// The screen peripheral view.
pub struct Screen {
    engine: Arc<dyn Engine>,
    config: ScreenConfig,
    mailbox: Arc<FrameMailbox>,
    listener: Option<FrameListener>,
    worker: Option<RepeatingTask>,
}

impl Screen {
    /// Create a powered-off screen showing the idle color.
    pub fn new(engine: Arc<dyn Engine>, config: ScreenConfig) -> Self {
        let mailbox = Arc::new(FrameMailbox::new(Frame::filled(config.width, config.height, IDLE_COLOR)));
        Self {
            engine,
            config,
            mailbox,
            listener: None,
            worker: None,
        }
    }

    pub const fn config(&self) -> &ScreenConfig {
        &self.config
    }

    /// Install a callback for published frames. Takes effect at the next
    /// power-on.
    pub fn set_listener(&mut self, listener: FrameListener) {
        self.listener = Some(listener);
    }

    /// Point the screen at a new engine, restarting the worker if running.
    pub fn set_engine(&mut self, engine: Arc<dyn Engine>) {
        let powered = self.is_powered();
        self.power_off();
        self.engine = engine;
        if powered {
            self.power_on();
        }
    }

    pub const fn is_powered(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the refresh worker. Does nothing if it is already running.
    pub fn power_on(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let mut worker = ScreenWorker::new(
            Arc::clone(&self.engine),
            self.config.clone(),
            Arc::clone(&self.mailbox),
            self.listener.clone(),
        );
        log::info!(
            "Screen on: {}x{} at 0x{:06X}{}",
            self.config.width,
            self.config.height,
            self.config.base_address,
            if self.config.frame_swap { " (frame swap)" } else { "" }
        );
        self.worker = Some(RepeatingTask::spawn("screen", self.config.frame_interval(), move |cancel| {
            worker.tick(cancel);
            ControlFlow::Continue(())
        }));
    }

    /// Stop the worker, waiting for it to exit, and show the idle color.
    pub fn power_off(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            log::info!("Screen off");
        }
        self.mailbox.publish(Frame::filled(self.config.width, self.config.height, IDLE_COLOR));
    }

    /// Returns the new power state.
    pub fn toggle_power(&mut self) -> bool {
        if self.is_powered() {
            self.power_off();
        } else {
            self.power_on();
        }
        self.is_powered()
    }

    /// Most recently published frame.
    pub fn latest_frame(&self) -> Arc<Frame> {
        self.mailbox.latest()
    }

    /// Shared handle for readers polling the latest frame.
    pub fn mailbox(&self) -> Arc<FrameMailbox> {
        Arc::clone(&self.mailbox)
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
