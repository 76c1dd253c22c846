//! ASIM Core - debugging runtime for the simulated 68000.
//!
//! This crate loads S-record images into an execution engine, maps addresses
//! back to assembler listing lines, decodes watched memory, drives the debug
//! session and emulates the memory-mapped screen.

pub mod config;
pub mod debug;
pub mod engine;
pub mod listing;
pub mod memory;
pub mod poll;
pub mod screen;
pub mod session;
pub mod srec;

// Re-export commonly used types
pub use config::{ScreenConfig, SessionConfig};
pub use debug::{BreakpointManager, DebugManager};
pub use engine::{AccessMask, Engine, EngineError, EngineFactory, MockEngine, Registers};
pub use listing::Listing;
pub use memory::{Encoding, MemoryManager, WatchId, WatchList, WatchedVariable};
pub use poll::{CancelToken, RepeatingTask};
pub use screen::{Frame, FrameMailbox, Rgb, Screen};
pub use session::{DebugEvent, ListingStatus, Session, SessionDelta, SessionError, SessionState};
pub use srec::{EntryPoint, LoadError};
