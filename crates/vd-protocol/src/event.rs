//! Event names recognised on the publish/subscribe channel
//!
//! The server routes events by name. Handlers are registered against a
//! closed set of kinds; any other name arriving on the wire is rejected at
//! the dispatch boundary.

use std::fmt;

/// Known event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Agent record changed on the server (consumed by registration)
    AgentUpdated,
    /// Server asks the agent to open a new terminal session
    PtySessionStarted,
    /// Keystrokes for an open terminal session
    PtyInput,
    /// A deployment was created for this agent (consumed by the deployer)
    DeploymentCreated,
    /// Terminal output published by the agent
    PtyOutput,
    /// Session teardown notice published by the agent
    PtySessionEnded,
}

impl EventKind {
    /// Every known kind, in declaration order
    pub const ALL: [EventKind; 6] = [
        EventKind::AgentUpdated,
        EventKind::PtySessionStarted,
        EventKind::PtyInput,
        EventKind::DeploymentCreated,
        EventKind::PtyOutput,
        EventKind::PtySessionEnded,
    ];

    /// Wire name of this event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentUpdated => "agente:updated",
            Self::PtySessionStarted => "pty:session_started",
            Self::PtyInput => "pty:input",
            Self::DeploymentCreated => "implantacao:created",
            Self::PtyOutput => "pty:output",
            Self::PtySessionEnded => "pty:session_ended",
        }
    }

    /// Look up a kind by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        assert_eq!(EventKind::from_name("pty:resize"), None);
        assert_eq!(EventKind::from_name(""), None);
        assert_eq!(EventKind::from_name("PTY:INPUT"), None);
    }
}
