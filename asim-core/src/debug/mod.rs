//! Debug control module.
//!
//! Handles execution control against the engine: step, run, shutdown and
//! status queries.

pub mod breakpoint;

pub use breakpoint::{Breakpoint, BreakpointManager};

use crate::engine::{Engine, EngineError, Registers};
use serde::{Deserialize, Serialize};

/// Execution status as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreStatus {
    Off,
    Halted,
    Running,
}

/// Manager for debug operations.
pub struct DebugManager;

impl DebugManager {
    pub fn new() -> Self {
        Self
    }

    /// Step the engine by one instruction and return the registers after it.
    pub fn step(&self, engine: &dyn Engine) -> Result<Registers, EngineError> {
        if !engine.power_status() {
            return Err(EngineError::NotPowered);
        }
        engine.step_one()?;
        Ok(engine.read_registers())
    }

    /// Start continuous execution.
    pub fn resume(&self, engine: &dyn Engine) -> Result<(), EngineError> {
        engine.run()
    }

    /// Power the engine down. Returns `false` when it was already down.
    pub fn shutdown(&self, engine: &dyn Engine) -> Result<bool, EngineError> {
        match engine.shutdown() {
            Ok(()) => Ok(true),
            Err(EngineError::AlreadyShutdown) => {
                log::debug!("Engine was already shut down");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Get the current status of the engine.
    pub fn status(&self, engine: &dyn Engine) -> CoreStatus {
        if !engine.power_status() {
            CoreStatus::Off
        } else if engine.is_running() {
            CoreStatus::Running
        } else {
            CoreStatus::Halted
        }
    }
}

impl Default for DebugManager {
    fn default() -> Self {
        Self::new()
    }
}
