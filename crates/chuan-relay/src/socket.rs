//! Peer socket handles and the bounded send queue
//!
//! Each attached WebSocket is represented by a [`PeerSocket`]: its
//! role, a bounded outbound queue drained by the socket's writer task,
//! and a one-shot detach guard. The queue is deliberately not a tokio
//! channel: overflow must drop the *oldest* frame so a slow peer never
//! stalls the fast peer's read loop, and a closed flag has to be
//! checked under the queue's own mutex so writes racing a detach land
//! nowhere instead of blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::warn;

use chuan_protocol::Role;

/// Outbound queue depth per socket.
pub const QUEUE_DEPTH: usize = 64;

/// A frame waiting in a peer's send queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text frame, forwarded byte-for-byte
    Text(String),
    /// Binary frame, forwarded byte-for-byte
    Binary(Bytes),
    /// Ask the writer to close the connection with this code
    Close(u16),
}

struct QueueState {
    buf: VecDeque<Outbound>,
    closed: bool,
}

/// Bounded drop-oldest queue feeding one socket's writer task.
pub struct SendQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SendQueue {
    pub fn new() -> Self {
        SendQueue {
            state: Mutex::new(QueueState {
                buf: VecDeque::with_capacity(QUEUE_DEPTH),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a frame. Returns false if the queue is already closed;
    /// the frame is dropped because the peer is gone or going away.
    pub fn push(&self, frame: Outbound) -> bool {
        {
            let mut st = self.state.lock().expect("send queue poisoned");
            if st.closed {
                return false;
            }
            if st.buf.len() >= QUEUE_DEPTH {
                st.buf.pop_front();
                warn!("send queue full, dropping oldest frame");
            }
            st.buf.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Dequeue the next frame, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let mut st = self.state.lock().expect("send queue poisoned");
                if let Some(frame) = st.buf.pop_front() {
                    return Some(frame);
                }
                if st.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Pending frames are still delivered; further
    /// pushes are dropped. Idempotent.
    pub fn close(&self) {
        {
            let mut st = self.state.lock().expect("send queue poisoned");
            st.closed = true;
        }
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("send queue poisoned").closed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().expect("send queue poisoned").buf.len()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle over one attached WebSocket.
///
/// The owning [`Room`](crate::room::Room) holds the socket until it is
/// detached; the read loop and the sweeper may both race to detach,
/// so the guard makes detach effects fire exactly once.
pub struct PeerSocket {
    role: Role,
    queue: SendQueue,
    detached: AtomicBool,
}

impl PeerSocket {
    pub fn new(role: Role) -> Self {
        PeerSocket {
            role,
            queue: SendQueue::new(),
            detached: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Claim the right to run detach effects. First caller wins.
    pub fn begin_detach(&self) -> bool {
        !self.detached.swap(true, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_preserves_fifo_order() {
        let q = SendQueue::new();
        q.push(Outbound::Text("a".into()));
        q.push(Outbound::Text("b".into()));
        q.push(Outbound::Binary(Bytes::from_static(b"\x00\x01")));

        assert_eq!(q.pop().await, Some(Outbound::Text("a".into())));
        assert_eq!(q.pop().await, Some(Outbound::Text("b".into())));
        assert_eq!(
            q.pop().await,
            Some(Outbound::Binary(Bytes::from_static(b"\x00\x01")))
        );
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let q = SendQueue::new();
        for i in 0..QUEUE_DEPTH + 3 {
            q.push(Outbound::Text(format!("f{i}")));
        }
        assert_eq!(q.len(), QUEUE_DEPTH);
        // The three oldest frames were dropped
        assert_eq!(q.pop().await, Some(Outbound::Text("f3".into())));
    }

    #[tokio::test]
    async fn closed_queue_rejects_pushes_but_drains() {
        let q = SendQueue::new();
        assert!(q.push(Outbound::Text("kept".into())));
        q.close();
        assert!(!q.push(Outbound::Text("dropped".into())));

        assert_eq!(q.pop().await, Some(Outbound::Text("kept".into())));
        assert_eq!(q.pop().await, None);
        // close is idempotent
        q.close();
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        use std::sync::Arc;
        let q = Arc::new(SendQueue::new());
        let q2 = Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(Outbound::Text("x".into()));
        assert_eq!(waiter.await.unwrap(), Some(Outbound::Text("x".into())));
    }

    #[test]
    fn detach_guard_fires_once() {
        let s = PeerSocket::new(Role::Sender);
        assert!(!s.is_detached());
        assert!(s.begin_detach());
        assert!(!s.begin_detach());
        assert!(s.is_detached());
    }
}
