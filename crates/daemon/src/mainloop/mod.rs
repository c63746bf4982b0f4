//! The single-threaded cooperative event loop (§4.B).
//!
//! Everything the daemon reacts to — timers, socket accepts, client frames,
//! D-Bus calls, watchdog pings, plugin broadcasts — is driven from one
//! `tokio::select!` running on a `current_thread` runtime inside a
//! `LocalSet`. There is no `tokio::spawn`: only `spawn_local`, scoped to the
//! lifetime of a single loop iteration, is used, so the "currently running
//! plugin" bookkeeping in `crate::plugins` can stay a plain `Vec` rather
//! than needing synchronization.

mod timer;

use thiserror::Error;

pub use timer::{TimerHandle, TimerService};

#[derive(Debug, Error)]
pub enum MainLoopError {
    #[error("timer {0} not found")]
    UnknownTimer(u64),

    #[error("runtime build failed: {0}")]
    RuntimeBuild(std::io::Error),
}

/// Reason the loop exited, surfaced to `main` for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Requested,
    WatchdogFailure,
    Fatal,
}

/// Cooperative quit flag. Any component (socket handler, watchdog, signal
/// handler) can request the loop stop after the current iteration; the
/// loop itself decides when it's safe to actually break.
pub struct QuitFlag {
    reason: std::cell::Cell<Option<ExitReason>>,
}

impl QuitFlag {
    pub fn new() -> Self {
        QuitFlag { reason: std::cell::Cell::new(None) }
    }

    pub fn request(&self, reason: ExitReason) {
        if self.reason.get().is_none() {
            self.reason.set(Some(reason));
        }
    }

    pub fn requested(&self) -> Option<ExitReason> {
        self.reason.get()
    }
}

impl Default for QuitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// `NOT_STARTED -> RUNNING -> STOPPED` (§4.B "States"). `STOPPED` is
/// terminal: once reached, `run` has returned and the loop cannot restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Stopped,
}

/// Owns the primitives every source the daemon's `tokio::select!` loop
/// polls shares: the timer arena, the cooperative quit flag, and the exit
/// code accumulator (§4.B: "`exit_code()` returns the highest exit code
/// ever set"). The `select!` body itself lives in `crate::lifecycle`,
/// which is the one place that also owns the bus, plugin manager, socket
/// server, and D-Bus proxy it has to poll alongside these.
pub struct MainLoop {
    quit: QuitFlag,
    timers: TimerService,
    state: std::cell::Cell<RunState>,
    highest_exit_code: std::cell::Cell<i32>,
}

impl MainLoop {
    pub fn new() -> Self {
        MainLoop {
            quit: QuitFlag::new(),
            timers: TimerService::new(),
            state: std::cell::Cell::new(RunState::NotStarted),
            highest_exit_code: std::cell::Cell::new(0),
        }
    }

    pub fn quit_flag(&self) -> &QuitFlag {
        &self.quit
    }

    pub fn timers(&mut self) -> &mut TimerService {
        &mut self.timers
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Transitions `NOT_STARTED -> RUNNING`. Panics if called twice; the
    /// loop is not restartable (§4.B).
    pub fn mark_running(&self) {
        assert_eq!(self.state.get(), RunState::NotStarted, "main loop already started");
        self.state.set(RunState::Running);
    }

    pub fn mark_stopped(&self) {
        self.state.set(RunState::Stopped);
    }

    /// `quit(exit_code)`: records the highest exit code ever requested and
    /// asks the loop to stop after the current iteration.
    pub fn quit(&self, exit_code: i32, reason: ExitReason) {
        if exit_code > self.highest_exit_code.get() {
            self.highest_exit_code.set(exit_code);
        }
        self.quit.request(reason);
    }

    pub fn exit_code(&self) -> i32 {
        self.highest_exit_code.get()
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_quit_reason_sticks() {
        let flag = QuitFlag::new();
        flag.request(ExitReason::Requested);
        flag.request(ExitReason::Fatal);
        assert_eq!(flag.requested(), Some(ExitReason::Requested));
    }

    #[test]
    fn exit_code_tracks_the_highest_value_requested() {
        let main_loop = MainLoop::new();
        main_loop.quit(1, ExitReason::Fatal);
        main_loop.quit(3, ExitReason::Fatal);
        main_loop.quit(2, ExitReason::Fatal);
        assert_eq!(main_loop.exit_code(), 3);
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn cannot_start_twice() {
        let main_loop = MainLoop::new();
        main_loop.mark_running();
        main_loop.mark_running();
    }

    #[test]
    fn states_progress_not_started_running_stopped() {
        let main_loop = MainLoop::new();
        assert_eq!(main_loop.state(), RunState::NotStarted);
        main_loop.mark_running();
        assert_eq!(main_loop.state(), RunState::Running);
        main_loop.mark_stopped();
        assert_eq!(main_loop.state(), RunState::Stopped);
    }
}
