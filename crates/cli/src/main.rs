//! `dsmectl` — a thin diagnostic client over `dsmed`'s Unix domain socket.
//!
//! This is not a business-logic tool: it exists to exercise the wire
//! protocol the way an operator poking at the daemon from a shell would,
//! one frame at a time. Every subcommand opens a fresh connection, sends
//! exactly one frame, and exits — there is no persistent session state to
//! manage.

mod exit_error;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dsme_core::Message;
use exit_error::ExitError;
use tokio::net::UnixStream;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "dsmectl", version, about = "Diagnostic client for dsmed")]
struct Cli {
    /// Path to the daemon's listening socket.
    #[arg(long, env = "DSME_SOCKFILE", default_value = "/var/run/dsme.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the daemon and send a liveness ping.
    Ping,
    /// Set the daemon's logging verbosity, 3 (ERR) through 7 (DEBUG).
    Verbosity {
        #[arg(value_parser = clap::value_parser!(u8).range(3..=7))]
        level: u8,
    },
    /// Request an orderly shutdown.
    Shutdown,
    /// Request a reboot.
    Reboot,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("dsmectl: {err}");
            std::process::ExitCode::from(err.code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    let msg = match cli.command {
        Command::Ping => Message::Ping,
        Command::Verbosity { level } => Message::SetLoggingVerbosity { verbosity: level },
        Command::Shutdown => Message::ShutdownReq,
        Command::Reboot => Message::RebootReq,
    };
    send_one(&cli.socket, &msg).await?;
    println!("sent {:?}", msg);
    Ok(())
}

async fn send_one(socket: &std::path::Path, msg: &Message) -> Result<(), ExitError> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|source| ExitError::new(1, format!("failed to connect to {}: {source}", socket.display())))?;
    let (type_id, body, extra) = dsme_wire::encode_parts(msg);
    dsme_wire::write_frame(&mut stream, type_id, &body, extra.as_deref(), FRAME_TIMEOUT).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_requires_a_subcommand() {
        let err = Cli::try_parse_from(["dsmectl"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingSubcommand);
    }

    #[test]
    fn verbosity_out_of_range_is_rejected() {
        let err = Cli::try_parse_from(["dsmectl", "verbosity", "9"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn socket_defaults_when_env_unset() {
        std::env::remove_var("DSME_SOCKFILE");
        let cli = Cli::try_parse_from(["dsmectl", "ping"]).unwrap();
        assert_eq!(cli.socket, PathBuf::from("/var/run/dsme.sock"));
    }

    #[tokio::test]
    async fn send_one_reports_connection_failure_as_exit_error() {
        let err = send_one(std::path::Path::new("/nonexistent/dsme.sock"), &Message::Ping).await.unwrap_err();
        assert_eq!(err.code, 1);
    }
}
