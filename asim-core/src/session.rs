//! Session management module.
//!
//! A [`Session`] owns the engine handle and drives it through the debugging
//! life cycle: load, step, run, stop, power off and reset. Observers follow
//! along through a broadcast stream of [`DebugEvent`]s.

use crate::config::SessionConfig;
use crate::debug::{Breakpoint, BreakpointManager, DebugManager};
use crate::engine::{AccessMask, Engine, EngineError, EngineFactory, Registers};
use crate::listing::Listing;
use crate::memory::{DumpLine, Encoding, MemoryManager, WatchId, WatchList, WatchedVariable};
use crate::poll::RepeatingTask;
use crate::srec::{self, EntryPoint, LoadError};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 100;
const LISTING_EXTENSIONS: [&str; 2] = ["lst", "LIS"];
const IMAGE_EXTENSIONS: [&str; 2] = ["h68", "H68"];

/// Where the session is in the debugging life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No program loaded.
    Unloaded,
    /// Program loaded, engine reset to the entry point.
    Loaded,
    /// Halted after a single step.
    Stepping,
    /// Executing freely with the refresh poll active.
    Running,
    /// Stopped by the user or by a breakpoint.
    Halted,
    PoweredOff,
}

/// Failure of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("engine is not powered")]
    NotPowered,
    #[error("engine is running")]
    Running,
    #[error("no binary image next to {0}")]
    MissingImage(PathBuf),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result of attaching a listing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Attached { lines: usize, symbols: usize },
    /// The file could not be read; line highlighting is disabled.
    Missing,
}

/// Everything the front end redraws after the engine moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDelta {
    pub registers: Registers,
    pub sr_flags: String,
    pub watches: Vec<WatchedVariable>,
    pub current_line: Option<u32>,
    /// Zero-based row of `current_line`.
    pub highlighted_row: Option<u32>,
}

impl SessionDelta {
    pub fn current_line_label(&self) -> String {
        self.current_line
            .map_or_else(|| "unknown".to_string(), |line| line.to_string())
    }
}

/// Event published to subscribers of a session.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    Loaded { entry: u32 },
    ListingAttached(ListingStatus),
    StateChanged(SessionState),
    Refreshed(SessionDelta),
    Error(String),
}

/// Compute the display state for the current engine position. The watch
/// list is left untouched.
pub fn refresh(engine: &dyn Engine, listing: Option<&Listing>, watches: &WatchList) -> SessionDelta {
    delta(engine, listing, watches.evaluate(engine, &MemoryManager::new()))
}

/// Like [`refresh`], but also stores the decoded values in the watch list.
fn refresh_stored(engine: &dyn Engine, listing: Option<&Listing>, watches: &mut WatchList) -> SessionDelta {
    delta(engine, listing, watches.refresh_all(engine, &MemoryManager::new()))
}

fn delta(engine: &dyn Engine, listing: Option<&Listing>, watches: Vec<WatchedVariable>) -> SessionDelta {
    let registers = engine.read_registers();
    let current_line = listing.and_then(|l| l.line_for(registers.pc));
    SessionDelta {
        registers,
        sr_flags: registers.sr_flags(),
        watches,
        current_line,
        highlighted_row: current_line.map(|line| line.saturating_sub(1)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn companion(source: &Path, extensions: &[&str]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| source.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// A debugging session over one engine.
pub struct Session {
    factory: Box<dyn EngineFactory>,
    config: SessionConfig,
    engine: Arc<dyn Engine>,
    state: Arc<Mutex<SessionState>>,
    debug_manager: DebugManager,
    memory_manager: MemoryManager,
    breakpoints: BreakpointManager,
    watches: Arc<Mutex<WatchList>>,
    listing: Arc<RwLock<Option<Listing>>>,
    poller: Option<RepeatingTask>,
    event_tx: broadcast::Sender<DebugEvent>,
}

impl Session {
    /// Create a session with an engine built by `factory`. The factory is
    /// called again on every reset.
    pub fn new<F: EngineFactory + 'static>(factory: F, config: SessionConfig) -> Self {
        let engine = factory.create();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory: Box::new(factory),
            config,
            engine,
            state: Arc::new(Mutex::new(SessionState::Unloaded)),
            debug_manager: DebugManager::new(),
            memory_manager: MemoryManager::new(),
            breakpoints: BreakpointManager::new(),
            watches: Arc::new(Mutex::new(WatchList::new())),
            listing: Arc::new(RwLock::new(None)),
            poller: None,
            event_tx,
        }
    }

    /// Subscribe to debug events
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.event_tx.subscribe()
    }

    /// Current life-cycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list()
    }

    /// Break when supervisor code reaches `address`.
    pub fn add_breakpoint(&mut self, address: u32) -> Result<Breakpoint, SessionError> {
        let result = self
            .breakpoints
            .set_breakpoint(self.engine.as_ref(), address, AccessMask::SUPERVISOR);
        self.report(result).map_err(SessionError::from)
    }

    pub fn listing(&self) -> Option<Listing> {
        self.listing.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn emit(&self, event: DebugEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous != state {
            log::debug!("Session state {:?} -> {:?}", previous, state);
            self.emit(DebugEvent::StateChanged(state));
        }
    }

    fn clear_maps(&self) {
        *self.listing.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn stop_polling(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }

    fn report<T, E: std::fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            log::warn!("{}", e);
            self.emit(DebugEvent::Error(e.to_string()));
        }
        result
    }

    /// Load an S-record image. A previously loaded program is reset away
    /// first.
    pub fn load_binary(&mut self, path: &Path) -> Result<EntryPoint, SessionError> {
        if self.state() != SessionState::Unloaded {
            self.reset()?;
        }
        let result = srec::load_file(path, self.engine.as_ref(), &mut self.breakpoints, &self.config);
        let entry = self.report(result)?;
        self.clear_maps();
        log::info!("Loaded {} (entry 0x{:08X})", path.display(), entry.address);
        self.emit(DebugEvent::Loaded { entry: entry.address });
        self.set_state(SessionState::Loaded);
        Ok(entry)
    }

    /// Attach a listing for line highlighting and, optionally, watch every
    /// symbol it defines.
    pub fn attach_listing(&mut self, path: &Path, import_symbols: bool) -> ListingStatus {
        let status = match Listing::from_file(path) {
            Ok(listing) => {
                let status = ListingStatus::Attached {
                    lines: listing.line_map.len(),
                    symbols: listing.symbols.len(),
                };
                if import_symbols {
                    let mut watches = lock(&self.watches);
                    for (name, address) in &listing.symbols {
                        watches.watch_symbol(name, *address);
                    }
                }
                *self.listing.write().unwrap_or_else(PoisonError::into_inner) = Some(listing);
                status
            }
            Err(e) => {
                log::warn!("No listing at {} ({}); line highlighting disabled", path.display(), e);
                self.clear_maps();
                ListingStatus::Missing
            }
        };
        self.emit(DebugEvent::ListingAttached(status));
        status
    }

    /// Open an assembler source: load the companion `.h68` image and attach
    /// the companion `.lst` listing when there is one.
    pub fn open_program(
        &mut self,
        source: &Path,
        import_symbols: bool,
    ) -> Result<(EntryPoint, ListingStatus), SessionError> {
        let image = companion(source, &IMAGE_EXTENSIONS)
            .ok_or_else(|| SessionError::MissingImage(source.to_path_buf()));
        let image = self.report(image)?;
        let entry = self.load_binary(&image)?;

        let status = match companion(source, &LISTING_EXTENSIONS) {
            Some(listing) => self.attach_listing(&listing, import_symbols),
            None => self.attach_listing(&source.with_extension(LISTING_EXTENSIONS[0]), import_symbols),
        };
        Ok((entry, status))
    }

    /// Execute exactly one instruction.
    pub fn step(&mut self) -> Result<SessionDelta, SessionError> {
        if !self.engine.power_status() {
            return self.report(Err(SessionError::NotPowered));
        }
        if self.engine.is_running() {
            return self.report(Err(SessionError::Running));
        }
        let result = self.debug_manager.step(self.engine.as_ref());
        self.report(result)?;
        self.set_state(SessionState::Stepping);
        let listing = self.listing.read().unwrap_or_else(PoisonError::into_inner);
        Ok(refresh_stored(self.engine.as_ref(), listing.as_ref(), &mut lock(&self.watches)))
    }

    /// Start continuous execution and the periodic refresh poll. The poll
    /// ends on its own when the engine halts.
    pub fn run(&mut self) -> Result<(), SessionError> {
        if !self.engine.power_status() {
            return self.report(Err(SessionError::NotPowered));
        }
        if self.poller.as_ref().is_some_and(RepeatingTask::is_active) {
            return Ok(());
        }
        let result = self.debug_manager.resume(self.engine.as_ref());
        self.report(result)?;
        self.set_state(SessionState::Running);

        let engine = Arc::clone(&self.engine);
        let watches = Arc::clone(&self.watches);
        let listing = Arc::clone(&self.listing);
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        self.poller = Some(RepeatingTask::spawn("session-poll", interval, move |_| {
            let delta = {
                let listing = listing.read().unwrap_or_else(PoisonError::into_inner);
                refresh_stored(engine.as_ref(), listing.as_ref(), &mut lock(&watches))
            };
            let _ = event_tx.send(DebugEvent::Refreshed(delta));

            if engine.is_running() {
                return ControlFlow::Continue(());
            }
            let mut state = lock(&state);
            if *state == SessionState::Running {
                *state = SessionState::Halted;
                log::info!("Engine halted at 0x{:08X}", engine.read_registers().pc);
                let _ = event_tx.send(DebugEvent::StateChanged(SessionState::Halted));
            }
            ControlFlow::Break(())
        }));
        Ok(())
    }

    fn halt_engine(&mut self) -> Result<(), SessionError> {
        self.stop_polling();
        let result = self.debug_manager.shutdown(self.engine.as_ref());
        self.report(result)?;
        Ok(())
    }

    /// Stop execution. The engine is shut down.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.halt_engine()?;
        self.set_state(SessionState::Halted);
        Ok(())
    }

    /// Power the engine off. Repeated calls are no-ops.
    pub fn poweroff(&mut self) -> Result<(), SessionError> {
        self.halt_engine()?;
        self.set_state(SessionState::PoweredOff);
        Ok(())
    }

    /// Power off and start over with a fresh engine. Breakpoints and the
    /// listing are dropped; watched variables are kept.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.halt_engine()?;
        self.engine = self.factory.create();
        self.breakpoints.forget_all();
        self.clear_maps();
        log::info!("Session reset");
        self.set_state(SessionState::Unloaded);
        Ok(())
    }

    /// Current registers, watch values and source line.
    pub fn refresh(&self) -> SessionDelta {
        let listing = self.listing.read().unwrap_or_else(PoisonError::into_inner);
        refresh(self.engine.as_ref(), listing.as_ref(), &lock(&self.watches))
    }

    /// Memory rows around `center`, marking the row holding the stack pointer.
    pub fn dump(&self, center: u32, rows: usize) -> Vec<DumpLine> {
        let sp = self.engine.read_registers().sp();
        self.memory_manager.dump(self.engine.as_ref(), center, rows, sp)
    }

    /// Watch `address` with the given encoding.
    pub fn add_watch(&self, address: u32, name: Option<String>, encoding: Encoding) -> WatchId {
        lock(&self.watches).add_with_encoding(address, name, encoding)
    }

    /// Returns whether the watch existed.
    pub fn remove_watch(&self, id: WatchId) -> bool {
        lock(&self.watches).remove(id)
    }

    pub fn clear_watches(&self) {
        lock(&self.watches).clear();
    }

    pub fn set_watch_encoding(&self, id: WatchId, encoding: Encoding) -> bool {
        lock(&self.watches).set_encoding(id, encoding)
    }

    /// Re-decode every watched variable and return the updated list.
    pub fn watches(&self) -> Vec<WatchedVariable> {
        lock(&self.watches).refresh_all(self.engine.as_ref(), &self.memory_manager)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_polling();
        let _ = self.debug_manager.shutdown(self.engine.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // move.w #5,d0 / subq.w #1,d0 / bne.s loop / nop / rts, entry 0x8000
    const PROGRAM: &str = "S10D8000303C0005534066FC4E714D\nS90380007C\n";

    fn mock_factory() -> impl Fn() -> Arc<dyn Engine> + Send + Sync {
        || Arc::new(MockEngine::new()) as Arc<dyn Engine>
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn loaded_session() -> (Session, NamedTempFile) {
        let image = write_temp(PROGRAM);
        let mut session = Session::new(mock_factory(), SessionConfig::default());
        session.load_binary(image.path()).unwrap();
        (session, image)
    }

    #[test]
    fn test_load_moves_to_loaded() {
        let (session, _image) = loaded_session();
        assert_eq!(session.state(), SessionState::Loaded);
        assert_eq!(session.engine().read_registers().pc, 0x8000);
        assert_eq!(session.breakpoints().len(), 1);
    }

    #[test]
    fn test_step_before_load_is_not_powered() {
        let mut session = Session::new(mock_factory(), SessionConfig::default());
        assert!(matches!(session.step(), Err(SessionError::NotPowered)));
        assert_eq!(session.state(), SessionState::Unloaded);
    }

    #[test]
    fn test_step_highlights_listing_row() {
        let (mut session, _image) = loaded_session();
        let listing = write_temp("00:00008002 4E71 12:\n");
        assert_eq!(
            session.attach_listing(listing.path(), false),
            ListingStatus::Attached { lines: 1, symbols: 0 }
        );

        let delta = session.step().unwrap();
        assert_eq!(delta.registers.pc, 0x8002);
        assert_eq!(delta.current_line, Some(12));
        assert_eq!(delta.highlighted_row, Some(11));
        assert_eq!(session.state(), SessionState::Stepping);

        let delta = session.step().unwrap();
        assert_eq!(delta.current_line, None);
        assert_eq!(delta.current_line_label(), "unknown");
    }

    #[test]
    fn test_missing_listing_degrades() {
        let (mut session, _image) = loaded_session();
        let status = session.attach_listing(Path::new("/nonexistent/prog.lst"), true);
        assert_eq!(status, ListingStatus::Missing);
        assert!(session.step().is_ok());
    }

    #[test]
    fn test_symbol_import_creates_watches() {
        let (mut session, _image) = loaded_session();
        let listing = write_temp("Symbols by name:\ncount   A:00008000\nloop    A:00008004\n");
        session.attach_listing(listing.path(), true);

        let watches = session.watches();
        assert_eq!(watches.len(), 2);
        assert_eq!(watches[0].name, "count");
        assert_eq!(watches[0].encoding, Encoding::UnsignedByte);
        assert_eq!(watches[0].last_value, "48");
    }

    #[test]
    fn test_reattaching_listing_keeps_one_watch_per_symbol() {
        let (mut session, _image) = loaded_session();
        let listing = write_temp("Symbols by name:\ncount   A:00008000\n");
        session.attach_listing(listing.path(), true);
        session.attach_listing(listing.path(), true);
        assert_eq!(session.watches().len(), 1);

        let rebuilt = write_temp("Symbols by name:\ncount   A:00008002\n");
        session.attach_listing(rebuilt.path(), true);
        let watches = session.watches();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].address, 0x8002);
    }

    #[test]
    fn test_step_updates_stored_watch_values() {
        let (mut session, _image) = loaded_session();
        let id = session.add_watch(0x9000, None, Encoding::UnsignedByte);
        let engine = session.engine();

        engine.write_byte(0x9000, 7).unwrap();
        let delta = session.step().unwrap();
        assert_eq!(delta.watches[0].last_value, "7");

        engine.write_byte(0x9000, 8).unwrap();
        assert_eq!(session.refresh().watches[0].last_value, "8");
        assert_eq!(session.watches().iter().find(|v| v.id == id).map(|v| v.last_value.as_str()), Some("8"));
    }

    #[test]
    fn test_poweroff_twice_is_noop() {
        let (mut session, _image) = loaded_session();
        session.poweroff().unwrap();
        assert_eq!(session.state(), SessionState::PoweredOff);
        session.poweroff().unwrap();
        assert_eq!(session.state(), SessionState::PoweredOff);
        assert!(matches!(session.step(), Err(SessionError::NotPowered)));
    }

    #[test]
    fn test_reset_keeps_watches() {
        let (mut session, _image) = loaded_session();
        session.add_watch(0x8000, Some("opcode".to_string()), Encoding::HexWord);
        session.reset().unwrap();

        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(session.breakpoints().is_empty());
        assert!(session.listing().is_none());
        assert_eq!(session.watches().len(), 1);
        assert!(!session.engine().power_status());
    }

    #[test]
    fn test_reload_resets_first() {
        let (mut session, image) = loaded_session();
        session.step().unwrap();
        session.load_binary(image.path()).unwrap();
        assert_eq!(session.state(), SessionState::Loaded);
        assert_eq!(session.engine().read_registers().pc, 0x8000);
    }

    #[test]
    fn test_refresh_is_pure() {
        let (session, _image) = loaded_session();
        session.add_watch(0x8000, None, Encoding::HexLong);
        assert_eq!(session.refresh(), session.refresh());
    }

    #[test]
    fn test_open_program_finds_companions() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hello.a68");
        std::fs::write(&source, "").unwrap();
        std::fs::write(dir.path().join("hello.H68"), PROGRAM).unwrap();
        std::fs::write(dir.path().join("hello.lst"), "00:00008000 303C0005 2:\n").unwrap();

        let mut session = Session::new(mock_factory(), SessionConfig::default());
        let (entry, status) = session.open_program(&source, false).unwrap();
        assert_eq!(entry.address, 0x8000);
        assert_eq!(status, ListingStatus::Attached { lines: 1, symbols: 0 });
        assert_eq!(session.refresh().current_line, Some(2));
    }

    #[test]
    fn test_open_program_without_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("lonely.a68");
        let mut session = Session::new(mock_factory(), SessionConfig::default());
        assert!(matches!(session.open_program(&source, false), Err(SessionError::MissingImage(_))));
    }
}
