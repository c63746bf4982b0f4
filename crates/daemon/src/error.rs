use thiserror::Error;

use crate::bus::BusError;
use crate::dbus::DbusError;
use crate::lifecycle::LifecycleError;
use crate::logger::LoggerError;
use crate::mainloop::MainLoopError;
use crate::plugins::PluginError;
use crate::socket::ProtocolError;

/// Top-level error type that reaches `main`. Per §7, only the *fatal* class
/// of error propagates this far — everything else is handled locally
/// (connection closed, message dropped, mount skipped) and only logged.
#[derive(Debug, Error)]
pub enum DsmeError {
    #[error(transparent)]
    Logger(#[from] LoggerError),

    #[error(transparent)]
    MainLoop(#[from] MainLoopError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Dbus(#[from] DbusError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("startup failed: {0}")]
    Startup(String),
}

impl DsmeError {
    /// Process exit code for this error, per §6: "nonzero on initialization
    /// failure or fatal runtime error".
    pub fn exit_code(&self) -> i32 {
        1
    }
}
