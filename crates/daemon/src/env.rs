//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Default listening socket path, overridden by `DSME_SOCKFILE` (§6).
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/dsme.sock";

/// Socket file mode, fixed by §4.F.
pub const SOCKET_MODE: u32 = 0o646;

pub fn socket_path() -> PathBuf {
    std::env::var_os("DSME_SOCKFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Default plugin registry config file path (§6 persisted state), overridden
/// by `DSME_MODULES_CONF`. One plugin basename per line; see
/// [`crate::registry::read_config_file`].
pub const DEFAULT_MODULES_CONF: &str = "/etc/dsme/modules.conf";

pub fn modules_conf_path() -> PathBuf {
    std::env::var_os("DSME_MODULES_CONF")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULES_CONF))
}

/// Well-known D-Bus service name the proxy requests (§6).
pub const DBUS_SERVICE_NAME: &str = "com.nokia.dsme";
pub const DBUS_REQUEST_OBJECT_PATH: &str = "/com/nokia/dsme/request";
pub const DBUS_SIGNAL_OBJECT_PATH: &str = "/com/nokia/dsme/signal";
pub const DBUS_REQUEST_INTERFACE: &str = "com.nokia.dsme.request";
pub const DBUS_SIGNAL_INTERFACE: &str = "com.nokia.dsme.signal";

/// Marker file dropped when the bus's local `Disconnected` signal fires
/// (§4.G), before the proxy requests a reboot. Listed under "Persisted
/// state" in §6 as owned by the individual plugins/init integration this
/// daemon treats as an external collaborator; the daemon only creates it,
/// it never reads it back.
pub const DBUS_FAILED_MARKER_PATH: &str = "/run/systemd/boot-status/dbus-failed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_is_used_when_env_unset() {
        std::env::remove_var("DSME_SOCKFILE");
        assert_eq!(socket_path(), PathBuf::from(DEFAULT_SOCKET_PATH));
    }
}
