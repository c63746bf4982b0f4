//! Command-line surface (§6). Parsed once in `main` before the logger is
//! open, so failures here go through the bootstrap `tracing` layer.

use std::path::PathBuf;

use clap::Parser;

use crate::logger::Method;

/// `dsmed` — device state management daemon.
#[derive(Debug, Parser)]
#[command(name = "dsmed", version, about = "Device state management daemon")]
pub struct Cli {
    /// Startup plugin module path (repeatable, at least one required).
    #[arg(short = 'p', required = true, action = clap::ArgAction::Append)]
    pub plugins: Vec<PathBuf>,

    /// Logging backend.
    #[arg(short = 'l', value_enum, default_value = "syslog")]
    pub logging_method: LoggingMethodArg,

    /// Log verbosity, 3 (ERR) through 7 (DEBUG).
    #[arg(short = 'v', default_value_t = 5, value_parser = clap::value_parser!(u8).range(3..=7))]
    pub verbosity: u8,

    /// Include-glob over `file:func`, e.g. `battery.c:*` (repeatable).
    #[arg(short = 'i', action = clap::ArgAction::Append)]
    pub include: Vec<String>,

    /// Exclude-glob over `file:func` (repeatable).
    #[arg(short = 'e', action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Signal the init system via SIGUSR1 to the parent once ready.
    #[arg(short = 's')]
    pub signal_parent: bool,

    /// Runtime debugging aid; currently only suppresses the oom-score and
    /// scheduling adjustments so the daemon is easier to attach to.
    #[arg(long)]
    pub valgrind: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LoggingMethodArg {
    None,
    Stderr,
    Syslog,
    File,
}

impl Cli {
    /// Parses `argv`, printing clap's own usage/help text but remapping its
    /// exit code to §6's contract: `-h` is "usage and exit 0", every other
    /// parse failure (unknown flag, out-of-range value, missing `-p`, ...)
    /// is "usage and exit 1" — clap's own default of 2 for the latter
    /// doesn't match.
    pub fn parse_or_exit() -> Result<Self, std::process::ExitCode> {
        match Self::try_parse() {
            Ok(cli) => Ok(cli),
            Err(err) => {
                let code = match err.kind() {
                    clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                    _ => 1,
                };
                let _ = err.print();
                Err(std::process::ExitCode::from(code))
            }
        }
    }

    /// `-l file` has no path argument of its own in §6's flag table; the
    /// file path, when needed, comes from `DSME_LOGFILE` the same way the
    /// socket path comes from `DSME_SOCKFILE` (§6 only documents the latter
    /// explicitly, but the shape is identical).
    pub fn logging_method(&self) -> Method {
        match self.logging_method {
            LoggingMethodArg::None => Method::None,
            LoggingMethodArg::Stderr => Method::Stderr,
            LoggingMethodArg::Syslog => Method::Syslog,
            LoggingMethodArg::File => {
                let path = std::env::var_os("DSME_LOGFILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/var/log/dsme.log"));
                Method::File(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_at_least_one_plugin_path() {
        let err = Cli::try_parse_from(["dsmed"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn accepts_repeated_plugin_flags() {
        let cli = Cli::try_parse_from(["dsmed", "-p", "a.so", "-p", "b.so"]).unwrap();
        assert_eq!(cli.plugins, vec![PathBuf::from("a.so"), PathBuf::from("b.so")]);
    }

    #[test]
    fn verbosity_out_of_range_is_rejected() {
        let err = Cli::try_parse_from(["dsmed", "-p", "a.so", "-v", "9"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn unknown_argument_exits_with_usage() {
        let err = Cli::try_parse_from(["dsmed", "-p", "a.so", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn default_verbosity_and_method() {
        let cli = Cli::try_parse_from(["dsmed", "-p", "a.so"]).unwrap();
        assert_eq!(cli.verbosity, 5);
        assert_eq!(cli.logging_method, LoggingMethodArg::Syslog);
    }

    /// §6: "any other argument: usage and exit 1" — clap's own default exit
    /// code for this class of failure is 2, so `parse_or_exit` must remap it.
    #[test]
    fn unknown_argument_maps_to_exit_code_one() {
        let err = Cli::try_parse_from(["dsmed", "-p", "a.so", "--bogus"]).unwrap_err();
        let code = match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
            _ => 1,
        };
        assert_eq!(code, 1);
    }

    /// §6: "-h usage and exit 0".
    #[test]
    fn help_maps_to_exit_code_zero() {
        let err = Cli::try_parse_from(["dsmed", "-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
