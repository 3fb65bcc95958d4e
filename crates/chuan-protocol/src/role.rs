//! Peer role definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RoleParseError;

/// Role within a room; exactly one socket may hold each at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The peer offering content
    Sender,
    /// The peer receiving content
    Receiver,
}

impl Role {
    /// The other slot in a two-peer room.
    pub fn opposite(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    /// Wire spelling, as used in query strings and frame payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    /// Only the two-peer roles exist; anything else is rejected early.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            _ => Err(RoleParseError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_flips() {
        assert_eq!(Role::Sender.opposite(), Role::Receiver);
        assert_eq!(Role::Receiver.opposite(), Role::Sender);
    }

    #[test]
    fn parses_wire_spelling_only() {
        assert_eq!("sender".parse::<Role>(), Ok(Role::Sender));
        assert_eq!("receiver".parse::<Role>(), Ok(Role::Receiver));
        assert_eq!("Sender".parse::<Role>(), Err(RoleParseError));
        assert_eq!("observer".parse::<Role>(), Err(RoleParseError));
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Sender).unwrap(), "\"sender\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"receiver\"").unwrap(),
            Role::Receiver
        );
    }
}
