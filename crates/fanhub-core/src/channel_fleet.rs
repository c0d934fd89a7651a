//! Per-principal durable-bus channels: one dedicated `lapin::Channel` per
//! connected principal, so QoS prefetch and publish/receive counters are
//! isolated per user rather than shared across the whole fleet.
//!
//! Grounded on the original channel manager: a concurrent map keyed by
//! principal, a close-notification handler that evicts on abnormal close,
//! and a periodic sweeper that evicts anything idle past a configured
//! threshold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lapin::{Channel, Connection, options::BasicQosOptions};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;

#[derive(Debug, Clone, Copy)]
pub enum StatKind {
    Sent,
    Received,
}

struct MutableStats {
    last_activity: Instant,
    sent: u64,
    received: u64,
}

pub struct UserChannelEntry {
    pub principal: String,
    pub channel: Channel,
    pub created_at: Instant,
    stats: Mutex<MutableStats>,
}

/// A point-in-time, read-only view of one entry's counters, for the
/// monitoring endpoints.
#[derive(Debug, Clone)]
pub struct ChannelStatSnapshot {
    pub principal: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub sent: u64,
    pub received: u64,
}

pub struct UserChannelFleet {
    connection: Connection,
    prefetch: u16,
    entries: DashMap<String, Arc<UserChannelEntry>>,
}

impl UserChannelFleet {
    pub fn new(connection: Connection, prefetch: u16) -> Self {
        Self {
            connection,
            prefetch,
            entries: DashMap::new(),
        }
    }

    /// Return the principal's existing channel, or open and register a new
    /// one on first demand.
    pub async fn get_or_create(&self, principal: &str) -> Result<Arc<UserChannelEntry>, HubError> {
        if let Some(entry) = self.entries.get(principal) {
            return Ok(entry.clone());
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| HubError::Transient(format!("failed to open user channel: {e}")))?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| HubError::Transient(format!("failed to set channel QoS: {e}")))?;

        let entry = Arc::new(UserChannelEntry {
            principal: principal.to_string(),
            channel: channel.clone(),
            created_at: Instant::now(),
            stats: Mutex::new(MutableStats {
                last_activity: Instant::now(),
                sent: 0,
                received: 0,
            }),
        });

        self.entries.insert(principal.to_string(), entry.clone());
        self.monitor_close(principal.to_string(), channel);
        fanhub_metrics::set_user_channel_count(self.entries.len());

        Ok(entry)
    }

    /// Register the close-notification handler: on any abnormal close the
    /// entry is deleted, forcing the principal to re-handshake to acquire a
    /// fresh channel. `DashMap::clone` is a cheap shared-handle clone (its
    /// shards are `Arc`-backed), so the closure observes the same map.
    fn monitor_close(&self, principal: String, channel: Channel) {
        let entries = self.entries.clone();
        channel.on_error(move |_error| {
            entries.remove(&principal);
            fanhub_metrics::set_user_channel_count(entries.len());
        });
    }

    pub async fn update_stats(&self, principal: &str, kind: StatKind) {
        if let Some(entry) = self.entries.get(principal) {
            let mut stats = entry.stats.lock().await;
            stats.last_activity = Instant::now();
            match kind {
                StatKind::Sent => stats.sent += 1,
                StatKind::Received => stats.received += 1,
            }
        }
    }

    /// Close and remove a principal's channel on normal disconnect.
    pub async fn evict(&self, principal: &str) {
        if let Some((_, entry)) = self.entries.remove(principal) {
            let _ = entry.channel.close(0, "client disconnected").await;
            fanhub_metrics::set_user_channel_count(self.entries.len());
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }

    pub async fn stats(&self, principal: &str) -> Option<ChannelStatSnapshot> {
        let entry = self.entries.get(principal)?.clone();
        let stats = entry.stats.lock().await;
        Some(ChannelStatSnapshot {
            principal: entry.principal.clone(),
            created_at: entry.created_at,
            last_activity: stats.last_activity,
            sent: stats.sent,
            received: stats.received,
        })
    }

    pub async fn snapshot(&self) -> Vec<ChannelStatSnapshot> {
        let mut out = Vec::with_capacity(self.entries.len());
        for kv in self.entries.iter() {
            let entry = kv.value().clone();
            let stats = entry.stats.lock().await;
            out.push(ChannelStatSnapshot {
                principal: entry.principal.clone(),
                created_at: entry.created_at,
                last_activity: stats.last_activity,
                sent: stats.sent,
                received: stats.received,
            });
        }
        out
    }

    /// Evict any entry whose `last_activity` is older than `idle_timeout`.
    /// Returns the number of entries evicted, for logging.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut stale = Vec::new();
        for kv in self.entries.iter() {
            let stats = kv.value().stats.lock().await;
            if now.duration_since(stats.last_activity) > idle_timeout {
                stale.push(kv.key().clone());
            }
        }
        for principal in &stale {
            self.evict(principal).await;
        }
        stale.len()
    }

    /// Spawn the periodic idle-channel sweeper. Runs until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep_idle(idle_timeout).await;
                        if evicted > 0 {
                            tracing::info!(evicted, "idle channel sweep evicted entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dashmap_clone_shares_the_underlying_shards() {
        let map: DashMap<String, u32> = DashMap::new();
        let handle = map.clone();
        map.insert("alice".to_string(), 1);
        assert_eq!(handle.get("alice").map(|v| *v), Some(1));
        handle.remove("alice");
        assert!(map.get("alice").is_none());
    }
}
