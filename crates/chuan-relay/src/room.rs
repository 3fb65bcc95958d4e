//! Per-room state
//!
//! A room pairs one sender and one receiver. The room owns the two
//! peer sockets; its mutex protects only slot surgery and lifecycle
//! flags and is never held across socket I/O. Attach and detach
//! capture the opposite peer inside the lock and write to its queue
//! outside. That write races benignly with the peer's own detach: it
//! either lands in a still-open queue or is dropped by the queue's
//! closed-flag check.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chuan_protocol::Role;

use crate::socket::PeerSocket;

/// Rooms older than this are closed by the sweeper regardless of use.
pub const ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Rooms with no attached peers for this long are closed.
pub const IDLE_TTL: Duration = Duration::from_secs(10 * 60);

/// Occupancy snapshot used by admission control.
#[derive(Debug, Clone, Copy)]
pub struct RoomInfo {
    pub sender_online: bool,
    pub receiver_online: bool,
    /// Both slots have been occupied and not yet fully vacated.
    pub transferring: bool,
    /// Past [`ROOM_TTL`]; reported to clients before the sweep closes it.
    pub expired: bool,
}

struct RoomState {
    sender: Option<Arc<PeerSocket>>,
    receiver: Option<Arc<PeerSocket>>,
    created_at: Instant,
    last_activity: Instant,
    transferring: bool,
    closed: bool,
}

impl RoomState {
    fn slot(&mut self, role: Role) -> &mut Option<Arc<PeerSocket>> {
        match role {
            Role::Sender => &mut self.sender,
            Role::Receiver => &mut self.receiver,
        }
    }

    fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receiver.is_none()
    }
}

/// An ephemeral two-slot rendezvous keyed by a 6-character code.
pub struct Room {
    code: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(code: String) -> Self {
        let now = Instant::now();
        Room {
            code,
            state: Mutex::new(RoomState {
                sender: None,
                receiver: None,
                created_at: now,
                last_activity: now,
                transferring: false,
                closed: false,
            }),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Attach a socket to its role's slot.
    ///
    /// On success returns the opposite peer if it was already attached,
    /// captured under the lock; the caller announces `peer-joined` to
    /// both sides after releasing it.
    pub fn attach(
        &self,
        socket: Arc<PeerSocket>,
    ) -> Result<Option<Arc<PeerSocket>>, RoomError> {
        let mut st = self.state.lock().expect("room state poisoned");
        if st.closed {
            return Err(RoomError::Closed);
        }
        let role = socket.role();
        if st.slot(role).is_some() {
            return Err(RoomError::SlotTaken(role));
        }
        *st.slot(role) = Some(socket);
        st.last_activity = Instant::now();

        let opposite = st.slot(role.opposite()).clone();
        if opposite.is_some() {
            st.transferring = true;
        }
        Ok(opposite)
    }

    /// Clear the slot holding exactly this socket.
    ///
    /// Returns the still-attached opposite peer, if any, so the caller
    /// can send it a server-originated disconnection. The room stays
    /// open; a fresh peer may re-enter until the sweeper fires.
    pub fn detach(&self, socket: &Arc<PeerSocket>) -> Option<Arc<PeerSocket>> {
        let mut st = self.state.lock().expect("room state poisoned");
        let role = socket.role();
        let matched = st
            .slot(role)
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, socket));
        if !matched {
            return None;
        }
        *st.slot(role) = None;
        st.last_activity = Instant::now();
        if st.is_empty() {
            st.transferring = false;
        }
        st.slot(role.opposite()).clone()
    }

    /// The peer in the other slot, if attached.
    pub fn opposite(&self, role: Role) -> Option<Arc<PeerSocket>> {
        let mut st = self.state.lock().expect("room state poisoned");
        st.slot(role.opposite()).clone()
    }

    /// Record activity (frame relayed, socket attached or detached).
    pub fn touch(&self) {
        let mut st = self.state.lock().expect("room state poisoned");
        st.last_activity = Instant::now();
    }

    /// Mark terminal and vacate both slots.
    ///
    /// Returns the sockets that were still attached so the caller can
    /// close their queues outside the lock. Idempotent.
    pub fn close(&self) -> Vec<Arc<PeerSocket>> {
        let mut st = self.state.lock().expect("room state poisoned");
        st.closed = true;
        st.transferring = false;
        st.sender.take().into_iter().chain(st.receiver.take()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("room state poisoned").closed
    }

    /// Snapshot for admission control and `room-info`.
    pub fn info(&self) -> RoomInfo {
        let st = self.state.lock().expect("room state poisoned");
        RoomInfo {
            sender_online: st.sender.is_some(),
            receiver_online: st.receiver.is_some(),
            transferring: st.transferring,
            expired: st.created_at.elapsed() > ROOM_TTL,
        }
    }

    /// True when the sweeper should close and remove this room.
    pub fn sweepable(&self) -> bool {
        let st = self.state.lock().expect("room state poisoned");
        st.closed
            || st.created_at.elapsed() > ROOM_TTL
            || (st.is_empty() && st.last_activity.elapsed() > IDLE_TTL)
    }

    #[cfg(test)]
    pub fn backdate_created(&self, by: Duration) {
        let mut st = self.state.lock().unwrap();
        st.created_at -= by;
    }

    #[cfg(test)]
    pub fn backdate_activity(&self, by: Duration) {
        let mut st = self.state.lock().unwrap();
        st.last_activity -= by;
    }
}

/// Errors from room attachment
#[derive(Debug, PartialEq, Eq)]
pub enum RoomError {
    /// Room reached its terminal state; never re-opens
    Closed,
    /// The requested role already has a socket attached
    SlotTaken(Role),
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "room is closed"),
            Self::SlotTaken(role) => write!(f, "role '{}' is already taken", role),
        }
    }
}

impl std::error::Error for RoomError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sock(role: Role) -> Arc<PeerSocket> {
        Arc::new(PeerSocket::new(role))
    }

    #[test]
    fn attach_both_roles_latches_transferring() {
        let room = Room::new("A2B3C4".into());
        let sender = sock(Role::Sender);
        let receiver = sock(Role::Receiver);

        // First peer sees no opposite
        assert!(room.attach(Arc::clone(&sender)).unwrap().is_none());
        assert!(!room.info().transferring);

        // Second peer captures the first
        let opposite = room.attach(Arc::clone(&receiver)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&opposite, &sender));
        let info = room.info();
        assert!(info.transferring);
        assert!(info.sender_online && info.receiver_online);
    }

    #[test]
    fn second_socket_per_role_is_rejected() {
        let room = Room::new("A2B3C4".into());
        room.attach(sock(Role::Sender)).unwrap();
        assert!(matches!(
            room.attach(sock(Role::Sender)),
            Err(RoomError::SlotTaken(Role::Sender))
        ));
        // The other slot is still free
        assert!(room.attach(sock(Role::Receiver)).is_ok());
    }

    #[test]
    fn detach_returns_remaining_peer_and_allows_reentry() {
        let room = Room::new("A2B3C4".into());
        let sender = sock(Role::Sender);
        let receiver = sock(Role::Receiver);
        room.attach(Arc::clone(&sender)).unwrap();
        room.attach(Arc::clone(&receiver)).unwrap();

        let peer = room.detach(&sender).unwrap();
        assert!(Arc::ptr_eq(&peer, &receiver));
        // One peer still attached: transferring stays latched
        assert!(room.info().transferring);

        // A fresh sender can re-enter the vacated slot
        let sender2 = sock(Role::Sender);
        let opposite = room.attach(Arc::clone(&sender2)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&opposite, &receiver));
    }

    #[test]
    fn transferring_clears_when_both_leave() {
        let room = Room::new("A2B3C4".into());
        let sender = sock(Role::Sender);
        let receiver = sock(Role::Receiver);
        room.attach(Arc::clone(&sender)).unwrap();
        room.attach(Arc::clone(&receiver)).unwrap();

        room.detach(&sender);
        room.detach(&receiver);
        let info = room.info();
        assert!(!info.transferring);
        assert!(!info.sender_online && !info.receiver_online);
    }

    #[test]
    fn detach_of_stale_socket_is_a_noop() {
        let room = Room::new("A2B3C4".into());
        let sender = sock(Role::Sender);
        room.attach(Arc::clone(&sender)).unwrap();
        room.detach(&sender);
        // Second detach finds the slot already vacated
        assert!(room.detach(&sender).is_none());

        // A different socket object never matches the slot
        let sender2 = sock(Role::Sender);
        room.attach(Arc::clone(&sender2)).unwrap();
        assert!(room.detach(&sender).is_none());
        assert!(room.info().sender_online);
    }

    #[test]
    fn closed_room_rejects_attach() {
        let room = Room::new("A2B3C4".into());
        let sender = sock(Role::Sender);
        room.attach(Arc::clone(&sender)).unwrap();

        let evicted = room.close();
        assert_eq!(evicted.len(), 1);
        assert!(room.is_closed());
        assert!(matches!(
            room.attach(sock(Role::Receiver)),
            Err(RoomError::Closed)
        ));
    }

    #[test]
    fn sweep_thresholds() {
        let room = Room::new("A2B3C4".into());
        assert!(!room.sweepable());

        // Empty and idle past the threshold
        room.backdate_activity(IDLE_TTL + Duration::from_secs(1));
        assert!(room.sweepable());

        // Activity resets the idle clock
        room.touch();
        assert!(!room.sweepable());

        // Age closes the room even when occupied
        room.attach(sock(Role::Sender)).unwrap();
        room.backdate_created(ROOM_TTL + Duration::from_secs(1));
        assert!(room.sweepable());
    }

    #[test]
    fn occupied_room_is_not_idle_swept() {
        let room = Room::new("A2B3C4".into());
        room.attach(sock(Role::Sender)).unwrap();
        room.backdate_activity(IDLE_TTL + Duration::from_secs(1));
        // The idle rule requires both slots empty
        assert!(!room.sweepable());
    }
}
