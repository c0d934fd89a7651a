//! A fixed-size pool of reusable durable-bus channels for Hub-level
//! publishes, plus a "sticky" variant for board/room publish affinity.
//!
//! Grounded on the original connection pool: a buffered queue of channels
//! for round-robin reuse, and a parallel indexed array addressed by a
//! rolling hash of the publish key so that repeated publishes for the same
//! board or room tend to land on the same broker-side channel.

use std::collections::VecDeque;

use lapin::{Channel, Connection};
use tokio::sync::Mutex;

use crate::error::HubError;

/// `hash = hash * 31 + byte`, matching the original's rolling hash exactly
/// (including its wraparound behavior) so that a given key lands on the
/// same slot index across a redeploy.
fn sticky_hash(key: &str) -> u64 {
    let mut hash: u64 = 0;
    for b in key.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(*b as u64);
    }
    hash
}

async fn open_channel(conn: &Connection) -> Result<Channel, HubError> {
    conn.create_channel()
        .await
        .map_err(|e| HubError::Transient(format!("failed to open pooled channel: {e}")))
}

fn is_open(channel: &Channel) -> bool {
    channel.status().connected()
}

pub struct SharedChannelPool {
    connection: Connection,
    capacity: usize,
    queue: Mutex<VecDeque<Channel>>,
    sticky: Mutex<Vec<Option<Channel>>>,
}

impl SharedChannelPool {
    /// Pre-fill both the round-robin queue and the sticky array with
    /// `size` freshly opened channels.
    pub async fn new(connection: Connection, size: usize) -> Result<Self, HubError> {
        let mut queue = VecDeque::with_capacity(size);
        let mut sticky = Vec::with_capacity(size);
        for _ in 0..size {
            queue.push_back(open_channel(&connection).await?);
            sticky.push(Some(open_channel(&connection).await?));
        }
        Ok(Self {
            connection,
            capacity: size,
            queue: Mutex::new(queue),
            sticky: Mutex::new(sticky),
        })
    }

    /// Return a pooled channel. If the queue is momentarily empty, or the
    /// channel at its head is closed, a fresh channel is opened rather than
    /// blocking the caller.
    pub async fn get(&self) -> Result<Channel, HubError> {
        let popped = {
            let mut queue = self.queue.lock().await;
            queue.pop_front()
        };
        match popped {
            Some(ch) if is_open(&ch) => Ok(ch),
            _ => open_channel(&self.connection).await,
        }
    }

    /// Return a channel to the pool if it is still open and the queue has
    /// room; otherwise close it.
    pub async fn put(&self, channel: Channel) {
        if !is_open(&channel) {
            return;
        }
        let mut queue = self.queue.lock().await;
        if queue.len() < self.capacity {
            queue.push_back(channel);
        } else {
            drop(queue);
            let _ = channel.close(0, "pool full").await;
        }
    }

    /// Return the slot a given key is affine to, lazily replacing it if
    /// closed. Used for Hub-level publishes where broker-side batching
    /// benefits from affinity (repeated publishes for one board or room
    /// landing on the same channel).
    pub async fn get_sticky(&self, key: &str) -> Result<Channel, HubError> {
        let index = (sticky_hash(key) % self.capacity as u64) as usize;
        let mut sticky = self.sticky.lock().await;
        let channel = match sticky[index].take() {
            Some(ch) if is_open(&ch) => ch,
            _ => open_channel(&self.connection).await?,
        };
        let handle = channel.clone();
        sticky[index] = Some(channel);
        Ok(handle)
    }

    /// Close every channel the pool holds. Called during graceful shutdown.
    pub async fn close(&self) {
        let mut queue = self.queue.lock().await;
        while let Some(ch) = queue.pop_front() {
            let _ = ch.close(0, "shutdown").await;
        }
        let mut sticky = self.sticky.lock().await;
        for slot in sticky.iter_mut() {
            if let Some(ch) = slot.take() {
                let _ = ch.close(0, "shutdown").await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn sticky_hash_matches_rolling_multiply_by_31() {
        let mut expected: u64 = 0;
        for b in b"board:42" {
            expected = expected.wrapping_mul(31).wrapping_add(*b as u64);
        }
        assert_eq!(sticky_hash("board:42"), expected);
    }

    #[test]
    fn sticky_hash_is_stable_for_the_same_key() {
        assert_eq!(sticky_hash("room:7"), sticky_hash("room:7"));
        assert_ne!(sticky_hash("room:7"), sticky_hash("room:8"));
    }
}
