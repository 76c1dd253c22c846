//! Execution engine seam.
//!
//! The instruction-execution engine is an external collaborator. Everything in
//! this crate talks to it through the [`Engine`] trait: target memory and the
//! register file live behind it, and the rest of the debugger only issues
//! requests.

pub mod mock;

pub use mock::MockEngine;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by an execution engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("address 0x{0:08X} is outside target memory")]
    InvalidAddress(u32),
    #[error("engine is not powered")]
    NotPowered,
    #[error("engine is already shut down")]
    AlreadyShutdown,
    #[error("breakpoint slot {0} is out of range")]
    InvalidBreakpointSlot(usize),
}

/// Function-code access mask attached to a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessMask(u8);

impl AccessMask {
    pub const USER_DATA: Self = Self(0x01);
    pub const USER_PROGRAM: Self = Self(0x02);
    pub const SUPER_DATA: Self = Self(0x04);
    pub const SUPER_PROGRAM: Self = Self(0x08);
    /// User data and program.
    pub const USER: Self = Self(0x03);
    /// Supervisor data and program.
    pub const SUPERVISOR: Self = Self(0x0C);
    pub const ALL: Self = Self(0x0F);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Snapshot of the 68000 register file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Data registers D0-D7.
    pub d: [u32; 8],
    /// Address registers A0-A7; A7 is the active stack pointer.
    pub a: [u32; 8],
    pub pc: u32,
    pub sr: u16,
}

const SR_TEMPLATE: &[u8; 16] = b"T?S??210???XNZVC";

impl Registers {
    /// Active stack pointer (A7).
    pub const fn sp(&self) -> u32 {
        self.a[7]
    }

    /// Render the status register as a flag string, most significant bit
    /// first, with `-` for every clear bit.
    pub fn sr_flags(&self) -> String {
        SR_TEMPLATE
            .iter()
            .enumerate()
            .map(|(i, &flag)| {
                if self.sr & (0x8000 >> i) != 0 {
                    flag as char
                } else {
                    '-'
                }
            })
            .collect()
    }
}

/// Accessor interface of the execution engine.
///
/// Implementations own target memory and the register file and must be safe
/// to call from several threads at once: the debug session, its poller and
/// the screen worker all hold the same handle while `run` executes on the
/// engine's own thread.
///
/// `read_block` must return all requested bytes from a single consistent view
/// of memory (one guard shared with the write path), so multi-byte values are
/// never torn by a concurrent write.
pub trait Engine: Send + Sync {
    /// Power the engine up and start execution state at `entry` with the
    /// supervisor stack pointer set to `stack`.
    fn reset(&self, entry: u32, stack: u32) -> Result<(), EngineError>;

    /// Execute exactly one instruction.
    fn step_one(&self) -> Result<(), EngineError>;

    /// Start continuous execution on the engine's own thread and return
    /// immediately.
    fn run(&self) -> Result<(), EngineError>;

    fn read_byte(&self, address: u32) -> Result<u8, EngineError>;

    fn write_byte(&self, address: u32, value: u8) -> Result<(), EngineError>;

    /// Read `len` consecutive bytes.
    fn read_block(&self, address: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        (0..len)
            .map(|offset| {
                let addr = address
                    .checked_add(offset as u32)
                    .ok_or(EngineError::InvalidAddress(address))?;
                self.read_byte(addr)
            })
            .collect()
    }

    /// Write `data` contiguously starting at `address`.
    fn write_block(&self, address: u32, data: &[u8]) -> Result<(), EngineError> {
        for (offset, &byte) in data.iter().enumerate() {
            let addr = address
                .checked_add(offset as u32)
                .ok_or(EngineError::InvalidAddress(address))?;
            self.write_byte(addr, byte)?;
        }
        Ok(())
    }

    fn read_registers(&self) -> Registers;

    /// Whether the engine is powered and able to execute.
    fn power_status(&self) -> bool;

    /// Whether `run` is currently executing.
    fn is_running(&self) -> bool;

    fn set_breakpoint(&self, slot: usize, address: u32, mask: AccessMask)
        -> Result<(), EngineError>;

    fn clear_breakpoints(&self);

    /// Assert an interrupt request line towards the target.
    fn raise_interrupt(&self, line: u8);

    /// Stop execution and power the engine down. Fails with
    /// [`EngineError::AlreadyShutdown`] when it is already down.
    fn shutdown(&self) -> Result<(), EngineError>;
}

/// Builds fresh engine instances; a session asks for a new one on reset.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Engine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Arc<dyn Engine> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Engine> {
        self()
    }
}
