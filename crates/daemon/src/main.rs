//! `dsmed` binary entry point. Builds a `current_thread` Tokio runtime with
//! a `LocalSet` (§4.B: the whole daemon runs cooperatively on one thread
//! except the logger's background writer), parses `-p`/`-v`/etc., and hands
//! off to `dsmed::lifecycle`.

use dsmed::cli::Cli;
use dsmed::{lifecycle, procinit};

fn main() -> std::process::ExitCode {
    let cli = match Cli::parse_or_exit() {
        Ok(cli) => cli,
        Err(code) => return code,
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    procinit::protect_oom_score();
    procinit::set_realtime_scheduling();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(source) => {
            tracing::error!(%source, "failed to build the tokio runtime");
            return std::process::ExitCode::from(1);
        }
    };

    let local = tokio::task::LocalSet::new();
    let exit_code = local.block_on(&runtime, async move {
        let daemon = match lifecycle::startup(cli).await {
            Ok(daemon) => daemon,
            Err(source) => {
                tracing::error!(%source, "startup failed");
                return 1;
            }
        };
        daemon.run().await
    });

    std::process::ExitCode::from(exit_code as u8)
}
