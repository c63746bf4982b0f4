//! Stable integer handles for arena-allocated resources.
//!
//! All of these are `slab`-index newtypes: the plugin manager, timer
//! service, D-Bus proxy, and socket server each own one `slab::Slab` and
//! hand these handles back to callers. None of them are valid across a
//! process restart — there is no durable storage in this daemon (§ Non-goals).

use std::fmt;

macro_rules! arena_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl From<usize> for $name {
            fn from(idx: usize) -> Self {
                Self(idx)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(PluginId, "Handle to a loaded plugin in the plugin manager's arena.");
arena_id!(TimerId, "Handle to a timer created by `TimerService::create`.");
arena_id!(DbusBindingId, "Handle to a D-Bus method or signal binding.");
arena_id!(ClientId, "Handle to a connected Unix/TCP-less socket client.");
arena_id!(SubscriptionId, "Handle to a socket broadcast subscription.");

/// Sentinel identifying the daemon core itself rather than a loaded plugin,
/// used as the "current plugin" when no plugin is executing and as the
/// owner of resources created before any plugin loads.
pub const CORE_PLUGIN: PluginId = PluginId(usize::MAX);
