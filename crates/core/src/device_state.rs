use std::fmt;

/// The device lifecycle state. The core only routes transitions between
/// these states (via `StateChangeInd` broadcasts); the policy deciding when
/// to move between them belongs to plugins external to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Boot,
    User,
    ActDead,
    Shutdown,
    Reboot,
    Malf,
    Test,
    Local,
    NotSet,
}

impl DeviceState {
    /// The string used on the D-Bus `state_change_ind` signal and in
    /// `get_state`'s reply, matching the wire-level spelling clients expect.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Boot => "BOOT",
            DeviceState::User => "USER",
            DeviceState::ActDead => "ACTDEAD",
            DeviceState::Shutdown => "SHUTDOWN",
            DeviceState::Reboot => "REBOOT",
            DeviceState::Malf => "MALF",
            DeviceState::Test => "TEST",
            DeviceState::Local => "LOCAL",
            DeviceState::NotSet => "NOT_SET",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "BOOT" => DeviceState::Boot,
            "USER" => DeviceState::User,
            "ACTDEAD" => DeviceState::ActDead,
            "SHUTDOWN" => DeviceState::Shutdown,
            "REBOOT" => DeviceState::Reboot,
            "MALF" => DeviceState::Malf,
            "TEST" => DeviceState::Test,
            "LOCAL" => DeviceState::Local,
            "NOT_SET" => DeviceState::NotSet,
            _ => return None,
        })
    }

    /// The single-byte discriminant used for `STATE_CHANGE_IND`'s wire body.
    /// Stable across releases — clients persist it, so variants are only
    /// ever appended, never renumbered.
    pub fn as_wire_byte(self) -> u8 {
        match self {
            DeviceState::Boot => 0,
            DeviceState::User => 1,
            DeviceState::ActDead => 2,
            DeviceState::Shutdown => 3,
            DeviceState::Reboot => 4,
            DeviceState::Malf => 5,
            DeviceState::Test => 6,
            DeviceState::Local => 7,
            DeviceState::NotSet => 8,
        }
    }

    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => DeviceState::Boot,
            1 => DeviceState::User,
            2 => DeviceState::ActDead,
            3 => DeviceState::Shutdown,
            4 => DeviceState::Reboot,
            5 => DeviceState::Malf,
            6 => DeviceState::Test,
            7 => DeviceState::Local,
            8 => DeviceState::NotSet,
            _ => return None,
        })
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::NotSet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        boot = { DeviceState::Boot },
        user = { DeviceState::User },
        act_dead = { DeviceState::ActDead },
        shutdown = { DeviceState::Shutdown },
        reboot = { DeviceState::Reboot },
        malf = { DeviceState::Malf },
        test = { DeviceState::Test },
        local = { DeviceState::Local },
        not_set = { DeviceState::NotSet },
    )]
    fn round_trips_through_str(state: DeviceState) {
        assert_eq!(DeviceState::from_str_opt(state.as_str()), Some(state));
    }

    #[test]
    fn unknown_string_is_none() {
        assert_eq!(DeviceState::from_str_opt("WAT"), None);
    }

    #[yare::parameterized(
        boot = { DeviceState::Boot },
        user = { DeviceState::User },
        act_dead = { DeviceState::ActDead },
        shutdown = { DeviceState::Shutdown },
        reboot = { DeviceState::Reboot },
        malf = { DeviceState::Malf },
        test = { DeviceState::Test },
        local = { DeviceState::Local },
        not_set = { DeviceState::NotSet },
    )]
    fn round_trips_through_wire_byte(state: DeviceState) {
        assert_eq!(DeviceState::from_wire_byte(state.as_wire_byte()), Some(state));
    }

    #[test]
    fn unknown_wire_byte_is_none() {
        assert_eq!(DeviceState::from_wire_byte(0xff), None);
    }
}
