use crate::ids::{ClientId, PluginId};

/// Peer credentials captured at `accept()` time via `SO_PEERCRED`.
///
/// When credential capture fails the connection is still accepted, with
/// `pid == 0` and `uid == gid == u32::MAX` standing in for the POSIX `-1`
/// the spec describes (credentials are unsigned on the wire here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl PeerCredentials {
    pub const UNKNOWN: PeerCredentials = PeerCredentials { pid: 0, uid: u32::MAX, gid: u32::MAX };

    pub fn is_known(&self) -> bool {
        *self != Self::UNKNOWN
    }

    pub fn is_privileged(&self, privileged_uids: &[u32]) -> bool {
        self.uid == 0 || privileged_uids.contains(&self.uid)
    }
}

/// The origin of a message: the daemon itself, a loaded plugin, or a
/// socket-connected client carrying the credentials captured at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The daemon core — used for internally synthesized messages (timer
    /// fires, watchdog heartbeats) that have no single owning plugin.
    Core,
    Plugin(PluginId),
    Client(ClientId, PeerCredentials),
}

impl Endpoint {
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        match self {
            Endpoint::Client(_, creds) => Some(*creds),
            _ => None,
        }
    }

    pub fn plugin_id(&self) -> Option<PluginId> {
        match self {
            Endpoint::Plugin(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_credentials_are_not_privileged_by_default() {
        assert!(!PeerCredentials::UNKNOWN.is_privileged(&[]));
    }

    #[test]
    fn root_is_always_privileged() {
        let creds = PeerCredentials { pid: 42, uid: 0, gid: 0 };
        assert!(creds.is_privileged(&[]));
    }

    #[test]
    fn explicit_allowlist_grants_privilege() {
        let creds = PeerCredentials { pid: 42, uid: 1000, gid: 1000 };
        assert!(creds.is_privileged(&[1000]));
        assert!(!creds.is_privileged(&[1001]));
    }
}
