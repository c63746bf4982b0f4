//! Watchdog heartbeat relay (§4.H).
//!
//! When started under a supervising watchdog process (the `-s` flag,
//! §6), the daemon expects a single byte on stdin periodically and must
//! echo a byte back on stdout before the supervisor's own timeout elapses.
//! Losing stdin (EOF or a read error) means the supervisor is gone or the
//! pipe broke, which is fatal: the daemon requests a quit with
//! `ExitReason::WatchdogFailure` rather than free-running unsupervised.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::mainloop::{ExitReason, QuitFlag};

pub struct Watchdog {
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
    enabled: bool,
}

impl Watchdog {
    pub fn new(enabled: bool) -> Self {
        Watchdog { stdin: tokio::io::stdin(), stdout: tokio::io::stdout(), enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Waits for the next ping byte. Never resolves when the watchdog is
    /// disabled, so this is always safe to include in the main `select!`.
    pub async fn next_ping(&mut self) -> std::io::Result<()> {
        if !self.enabled {
            std::future::pending::<()>().await;
        }
        let mut byte = [0u8; 1];
        let n = self.stdin.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "watchdog stdin closed"));
        }
        Ok(())
    }

    pub async fn pong(&mut self) -> std::io::Result<()> {
        self.stdout.write_all(&[1u8]).await?;
        self.stdout.flush().await
    }

    /// Call from the main loop whenever `next_ping` resolves with an
    /// error: relays the failure into a quit request rather than panicking.
    pub fn on_failure(&self, quit: &QuitFlag) {
        quit.request(ExitReason::WatchdogFailure);
    }
}
