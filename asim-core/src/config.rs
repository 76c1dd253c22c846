//! Session configuration.
//!
//! Every field has a default so a partial JSON file only overrides what it
//! names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Load address used when an image carries no start record.
pub const DEFAULT_BASE: u32 = 0x8000;
/// Initial supervisor stack pointer.
pub const DEFAULT_STACK: u32 = 0x9200;

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one debugging session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub base_address: u32,
    pub stack_address: u32,
    /// Interval of the run-time refresh poll.
    pub poll_interval_ms: u64,
    pub screen: ScreenConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE,
            stack_address: DEFAULT_STACK,
            poll_interval_ms: 100,
            screen: ScreenConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.screen.validate()?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }
}

/// Layout and timing of the memory-mapped screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub base_address: u32,
    pub width: u32,
    pub height: u32,
    pub frame_swap: bool,
    pub refresh_rate_hz: u32,
    /// Interrupt line raised after a frame is consumed in frame-swap mode.
    pub irq_line: u8,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            base_address: crate::screen::DEFAULT_ADDRESS,
            width: 256,
            height: 256,
            frame_swap: false,
            refresh_rate_hz: 1,
            irq_line: 1,
        }
    }
}

impl ScreenConfig {
    /// Number of pixels in one frame.
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of one frame buffer, `None` if it overflows `u32`.
    pub const fn frame_len(&self) -> Option<u32> {
        self.width.checked_mul(self.height)
    }

    /// Reject layouts whose frame buffer runs past the end of the address
    /// space.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.frame_len().and_then(|len| self.base_address.checked_add(len)) {
            Some(_) => Ok(()),
            None => Err(ConfigError::Invalid(format!(
                "{}x{} screen at 0x{:08X} does not fit in the address space",
                self.width, self.height, self.base_address
            ))),
        }
    }

    /// Period between frames; a zero rate is treated as 1 Hz.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000 / u64::from(self.refresh_rate_hz.max(1)))
    }
}
