use std::fmt;

/// Lifecycle of a connection engine.
///
/// States only move forward. Once an engine is `Disconnecting` the only
/// remaining move is to `Disconnected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// Not yet constructed.
    #[default]
    Unknown,
    /// Constructed, handlers bound, no socket yet.
    Initialized,
    /// Establishing the TCP connection.
    Connecting,
    /// Connected, waiting for the `INFO` exchange.
    Negotiating,
    /// Ready for operations.
    Connected,
    /// Running cleanup actions.
    Disconnecting,
    /// Torn down.
    Disconnected,
}

impl EngineState {
    /// Returns `true` once disposal has begun.
    #[must_use]
    pub const fn is_disposed(self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected)
    }

    /// Returns `true` when moving to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        (next as u8) > (self as u8)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Initialized => "Initialized",
            Self::Connecting => "Connecting",
            Self::Negotiating => "Negotiating",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::EngineState::{self, *};

    #[rstest]
    #[case(Unknown, Initialized, true)]
    #[case(Initialized, Connecting, true)]
    #[case(Initialized, Disconnecting, true)]
    #[case(Connected, Disconnecting, true)]
    #[case(Disconnecting, Disconnected, true)]
    #[case(Connected, Connected, false)]
    #[case(Connected, Negotiating, false)]
    #[case(Disconnected, Disconnecting, false)]
    #[case(Disconnecting, Connected, false)]
    fn transitions_only_move_forward(
        #[case] from: EngineState,
        #[case] to: EngineState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn disposal_states_are_terminal() {
        assert!(Disconnecting.is_disposed());
        assert!(Disconnected.is_disposed());
        assert!(!Connected.is_disposed());
    }
}
