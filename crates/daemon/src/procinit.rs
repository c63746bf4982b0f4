//! Process-wide setup that must happen before any secondary thread exists
//! (§5: "Daemon sets its oom-score adjustment to the 'protect' value before
//! any secondary thread is created. Real-time scheduling parameters are set
//! on startup."). Called from `main` before [`crate::logger::Logger::open`],
//! which spawns the writer thread.
//!
//! Neither failure here is fatal: the daemon may run unprivileged in test or
//! development contexts where these calls are refused, and losing OOM
//! protection or realtime scheduling is a degradation, not a reason to
//! refuse to start.

/// The "protect this process" value accepted by `/proc/<pid>/oom_score_adj`.
const OOM_SCORE_ADJ_MIN: i32 = -1000;

const REALTIME_PRIORITY: i32 = 1;

pub fn protect_oom_score() {
    if let Err(source) = std::fs::write("/proc/self/oom_score_adj", OOM_SCORE_ADJ_MIN.to_string()) {
        tracing::warn!(%source, "failed to set oom_score_adj, continuing without OOM protection");
    }
}

pub fn set_realtime_scheduling() {
    let param = libc::sched_param { sched_priority: REALTIME_PRIORITY };
    // SAFETY: `param` is a valid, fully-initialized `sched_param` for the
    // duration of this call; `0` targets the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        let source = std::io::Error::last_os_error();
        tracing::warn!(%source, "failed to set SCHED_FIFO, continuing with default scheduling");
    }
}
