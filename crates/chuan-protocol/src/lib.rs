//! chuan signaling wire types
//!
//! Defines the room-code format, the two peer roles, and the JSON
//! envelope exchanged over a room WebSocket. The server treats all but
//! a small reserved tag set as opaque; clients define the rest.

#![forbid(unsafe_code)]

pub mod code;
pub mod error;
pub mod frame;
pub mod role;

pub use error::{CodeError, RoleParseError};
pub use frame::Envelope;
pub use role::Role;
