//! Breakpoint management module.

use crate::engine::{AccessMask, Engine, EngineError};
use serde::{Deserialize, Serialize};

/// A breakpoint configured on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub slot: usize,
    pub address: u32,
    pub access_mask: AccessMask,
}

/// Tracks which engine breakpoint slots are in use.
pub struct BreakpointManager {
    breakpoints: Vec<Breakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self { breakpoints: Vec::new() }
    }

    /// Lowest slot not holding a breakpoint.
    pub fn next_free_slot(&self) -> usize {
        (0..)
            .find(|slot| self.breakpoints.iter().all(|bp| bp.slot != *slot))
            .unwrap_or_default()
    }

    /// Set a breakpoint at the given address in the next free slot.
    pub fn set_breakpoint(
        &mut self,
        engine: &dyn Engine,
        address: u32,
        access_mask: AccessMask,
    ) -> Result<Breakpoint, EngineError> {
        let slot = self.next_free_slot();
        engine.set_breakpoint(slot, address, access_mask)?;
        let bp = Breakpoint { slot, address, access_mask };
        self.breakpoints.push(bp);
        log::debug!("Breakpoint {} set at 0x{:08X}", slot, address);
        Ok(bp)
    }

    /// Clear all breakpoints.
    pub fn clear_all(&mut self, engine: &dyn Engine) {
        engine.clear_breakpoints();
        self.breakpoints.clear();
    }

    /// Forget tracked breakpoints without touching the engine, for when the
    /// engine itself has been replaced.
    pub fn forget_all(&mut self) {
        self.breakpoints.clear();
    }

    /// List active breakpoints.
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.clone()
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[test]
    fn test_breakpoint_manager_tracking() {
        let engine = MockEngine::new();
        let mut mgr = BreakpointManager::new();
        assert!(mgr.list().is_empty());

        let first = mgr.set_breakpoint(&engine, 0x8000, AccessMask::SUPERVISOR).unwrap();
        let second = mgr.set_breakpoint(&engine, 0x8100, AccessMask::SUPERVISOR).unwrap();
        assert_eq!(first.slot, 0);
        assert_eq!(second.slot, 1);
        assert_eq!(engine.breakpoints().len(), 2);

        mgr.clear_all(&engine);
        assert!(mgr.list().is_empty());
        assert!(engine.breakpoints().is_empty());
        assert_eq!(mgr.next_free_slot(), 0);
    }
}
