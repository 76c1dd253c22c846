//! Memory-only engine.
//!
//! `MockEngine` owns a flat RAM and a register file but decodes no
//! instructions: a step advances the program counter by one 16-bit word.
//! It backs headless runs of the CLI and the test suite.

use super::{AccessMask, Engine, EngineError, Registers};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

/// Seven 64 KiB pages of RAM, 0x00000 to 0x6FFFF.
pub const DEFAULT_MEMORY_SIZE: usize = 0x70000;

/// Number of breakpoint slots the engine exposes.
pub const BREAKPOINT_SLOTS: usize = 16;

const RESET_SR: u16 = 0x2700;
const RUN_STEP_DELAY: Duration = Duration::from_millis(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MockState {
    memory: RwLock<Vec<u8>>,
    registers: Mutex<Registers>,
    breakpoints: Mutex<Vec<Option<(u32, AccessMask)>>>,
    interrupts: Mutex<Vec<u8>>,
    powered: AtomicBool,
    running: AtomicBool,
    steps: AtomicU64,
}

impl MockState {
    fn step(&self) -> Result<u32, EngineError> {
        if !self.powered.load(Ordering::SeqCst) {
            return Err(EngineError::NotPowered);
        }
        let size = self.memory.read().unwrap_or_else(PoisonError::into_inner).len();
        let mut regs = lock(&self.registers);
        let next = regs.pc.wrapping_add(2);
        if next as usize >= size {
            return Err(EngineError::InvalidAddress(next));
        }
        regs.pc = next;
        self.steps.fetch_add(1, Ordering::Relaxed);
        Ok(next)
    }

    fn hits_breakpoint(&self, pc: u32) -> bool {
        lock(&self.breakpoints)
            .iter()
            .flatten()
            .any(|&(address, mask)| address == pc && mask.contains(AccessMask::SUPER_PROGRAM))
    }
}

/// Flat-RAM engine without an instruction set.
pub struct MockEngine {
    state: Arc<MockState>,
    run_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MockEngine {
    /// Engine with [`DEFAULT_MEMORY_SIZE`] bytes of RAM, powered off.
    pub fn new() -> Self {
        Self::with_memory_size(DEFAULT_MEMORY_SIZE)
    }

    /// Engine with `size` bytes of RAM.
    pub fn with_memory_size(size: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                memory: RwLock::new(vec![0; size]),
                registers: Mutex::new(Registers::default()),
                breakpoints: Mutex::new(vec![None; BREAKPOINT_SLOTS]),
                interrupts: Mutex::new(Vec::new()),
                powered: AtomicBool::new(false),
                running: AtomicBool::new(false),
                steps: AtomicU64::new(0),
            }),
            run_thread: Mutex::new(None),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.state.memory.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Breakpoints currently configured, by slot.
    pub fn breakpoints(&self) -> Vec<(usize, u32, AccessMask)> {
        lock(&self.state.breakpoints)
            .iter()
            .enumerate()
            .filter_map(|(slot, bp)| bp.map(|(address, mask)| (slot, address, mask)))
            .collect()
    }

    /// Interrupt lines raised since the last call, oldest first.
    pub fn take_interrupts(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.state.interrupts))
    }

    /// Instructions executed since construction.
    pub fn step_count(&self) -> u64 {
        self.state.steps.load(Ordering::Relaxed)
    }

    pub fn set_registers(&self, registers: Registers) {
        *lock(&self.state.registers) = registers;
    }

    fn join_run_thread(&self) {
        if let Some(handle) = lock(&self.run_thread).take() {
            if handle.join().is_err() {
                log::error!("Mock engine run thread panicked");
            }
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn reset(&self, entry: u32, stack: u32) -> Result<(), EngineError> {
        self.state.running.store(false, Ordering::SeqCst);
        self.join_run_thread();

        let mut regs = Registers { pc: entry, sr: RESET_SR, ..Default::default() };
        regs.a[7] = stack;
        *lock(&self.state.registers) = regs;
        lock(&self.state.interrupts).clear();
        self.state.powered.store(true, Ordering::SeqCst);
        log::debug!("Mock engine reset: pc=0x{:08X} sp=0x{:08X}", entry, stack);
        Ok(())
    }

    fn step_one(&self) -> Result<(), EngineError> {
        self.state.step().map(|_| ())
    }

    fn run(&self) -> Result<(), EngineError> {
        if !self.power_status() {
            return Err(EngineError::NotPowered);
        }
        if self.is_running() {
            return Ok(());
        }
        self.join_run_thread();
        self.state.running.store(true, Ordering::SeqCst);

        let state = Arc::clone(&self.state);
        let handle = thread::spawn(move || {
            while state.running.load(Ordering::SeqCst) {
                match state.step() {
                    Ok(pc) if state.hits_breakpoint(pc) => {
                        log::info!("Breakpoint hit at 0x{:08X}", pc);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Mock engine stopped: {}", e);
                        break;
                    }
                }
                thread::sleep(RUN_STEP_DELAY);
            }
            state.running.store(false, Ordering::SeqCst);
        });
        *lock(&self.run_thread) = Some(handle);
        Ok(())
    }

    fn read_byte(&self, address: u32) -> Result<u8, EngineError> {
        let memory = self.state.memory.read().unwrap_or_else(PoisonError::into_inner);
        memory
            .get(address as usize)
            .copied()
            .ok_or(EngineError::InvalidAddress(address))
    }

    fn write_byte(&self, address: u32, value: u8) -> Result<(), EngineError> {
        let mut memory = self.state.memory.write().unwrap_or_else(PoisonError::into_inner);
        let byte = memory
            .get_mut(address as usize)
            .ok_or(EngineError::InvalidAddress(address))?;
        *byte = value;
        Ok(())
    }

    fn read_block(&self, address: u32, len: usize) -> Result<Vec<u8>, EngineError> {
        let memory = self.state.memory.read().unwrap_or_else(PoisonError::into_inner);
        let start = address as usize;
        start
            .checked_add(len)
            .and_then(|end| memory.get(start..end))
            .map(<[u8]>::to_vec)
            .ok_or(EngineError::InvalidAddress(address))
    }

    fn write_block(&self, address: u32, data: &[u8]) -> Result<(), EngineError> {
        let mut memory = self.state.memory.write().unwrap_or_else(PoisonError::into_inner);
        let start = address as usize;
        let target = start
            .checked_add(data.len())
            .and_then(|end| memory.get_mut(start..end))
            .ok_or(EngineError::InvalidAddress(address))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_registers(&self) -> Registers {
        *lock(&self.state.registers)
    }

    fn power_status(&self) -> bool {
        self.state.powered.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn set_breakpoint(&self, slot: usize, address: u32, mask: AccessMask) -> Result<(), EngineError> {
        let mut breakpoints = lock(&self.state.breakpoints);
        let entry = breakpoints
            .get_mut(slot)
            .ok_or(EngineError::InvalidBreakpointSlot(slot))?;
        *entry = Some((address, mask));
        Ok(())
    }

    fn clear_breakpoints(&self) {
        lock(&self.state.breakpoints).iter_mut().for_each(|bp| *bp = None);
    }

    fn raise_interrupt(&self, line: u8) {
        log::debug!("IRQ {} raised", line);
        lock(&self.state.interrupts).push(line);
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        if !self.state.powered.swap(false, Ordering::SeqCst) {
            return Err(EngineError::AlreadyShutdown);
        }
        self.state.running.store(false, Ordering::SeqCst);
        self.join_run_thread();
        log::info!("Mock engine shut down after {} steps", self.step_count());
        Ok(())
    }
}
