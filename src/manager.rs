//! Source Manager: priority-ordered fallback across AIS sources,
//! cross-source deduplication, and the background poll loop.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::Position;
use crate::sources::{AisSource, PositionQueue, SourceStatus, Subscription, POSITION_QUEUE_CAPACITY};

const DEFAULT_FRESHNESS_SECS: i64 = 300;

pub struct SourceManager {
    /// Priority-ordered: index 0 is tried first.
    sources: Vec<Arc<dyn AisSource>>,
    dedup_cache: RwLock<HashMap<String, (Position, usize)>>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    /// Every position the dedup cache actually accepts (new or
    /// replacing) is re-queued here for the orchestrator to persist
    /// and evaluate alerts against.
    new_positions: Arc<PositionQueue>,
}

impl SourceManager {
    pub fn new(sources: Vec<Arc<dyn AisSource>>, poll_interval: Duration) -> Self {
        Self {
            sources,
            dedup_cache: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            poll_interval,
            new_positions: PositionQueue::new(POSITION_QUEUE_CAPACITY),
        }
    }

    pub fn primary(&self) -> Option<&Arc<dyn AisSource>> {
        self.sources.first()
    }

    /// Tries `connect()` on each source in priority order; any single
    /// success is sufficient for the manager to consider itself live.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut any_connected = false;
        for source in &self.sources {
            match source.connect().await {
                Ok(()) => {
                    info!(source = source.name(), "source connected");
                    any_connected = true;
                }
                Err(e) => {
                    debug!(source = source.name(), error = %e, "source failed to connect");
                }
            }
        }
        if !any_connected {
            return Err(anyhow::anyhow!("no source connected"));
        }

        self.running.store(true, Ordering::SeqCst);

        for (idx, source) in self.sources.iter().enumerate() {
            if let Some(queue) = source.position_queue() {
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.drain_source_queue(idx, queue).await;
                });
            }
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.poll_loop().await;
        });
        Ok(())
    }

    /// Pulls decoded positions off one streaming source's queue for
    /// as long as the manager is running, feeding each into the dedup
    /// cache under that source's priority index.
    async fn drain_source_queue(self: Arc<Self>, source_index: usize, queue: Arc<PositionQueue>) {
        while self.running.load(Ordering::SeqCst) {
            for position in queue.drain().await {
                self.ingest_streamed(position, source_index);
            }
        }
    }

    /// Idempotent; safe to call from a signal handler.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for source in &self.sources {
            source.disconnect().await;
        }
    }

    pub async fn subscribe(&self, subscription: Subscription) {
        for source in &self.sources {
            let _ = source.subscribe(subscription.clone()).await;
        }
    }

    /// Applies the insert-if-absent / replace-if-newer / prefer-higher-
    /// priority-on-tie dedup policy for one incoming position from the
    /// source at priority index `source_index`.
    fn update_cache(&self, position: Position, source_index: usize) {
        let mut cache = self.dedup_cache.write();
        let accepted = match cache.get(&position.mmsi) {
            None => true,
            Some((existing, existing_index)) => {
                position.timestamp > existing.timestamp
                    || (position.timestamp == existing.timestamp && source_index < *existing_index)
                // else: ties keep existing; older timestamps are dropped.
            }
        };
        if accepted {
            cache.insert(position.mmsi.clone(), (position.clone(), source_index));
            drop(cache);
            self.new_positions.push(position);
        }
    }

    fn is_fresh(position: &Position, freshness_secs: i64) -> bool {
        let age = (chrono::Utc::now() - position.timestamp).num_seconds();
        age <= freshness_secs
    }

    /// Serves from the dedup cache subject to freshness; missing
    /// MMSIs are fetched in priority order from REST adapters, each
    /// result re-entering the dedup path.
    pub async fn get_positions(&self, mmsis: &[String]) -> Vec<Position> {
        let mut out = Vec::with_capacity(mmsis.len());
        let mut missing: Vec<String> = Vec::new();

        {
            let cache = self.dedup_cache.read();
            for mmsi in mmsis {
                match cache.get(mmsi) {
                    Some((pos, _)) if Self::is_fresh(pos, DEFAULT_FRESHNESS_SECS) => {
                        out.push(pos.clone());
                    }
                    _ => missing.push(mmsi.clone()),
                }
            }
        }

        if missing.is_empty() {
            return out;
        }

        for (idx, source) in self.sources.iter().enumerate() {
            if missing.is_empty() {
                break;
            }
            let fetched = source.fetch_positions(&missing).await;
            for pos in fetched {
                if !pos.is_valid() {
                    continue;
                }
                missing.retain(|m| m != &pos.mmsi);
                self.update_cache(pos.clone(), idx);
                out.push(pos);
            }
        }

        out
    }

    /// Ingests a position delivered by a streaming adapter's
    /// callback/channel into the dedup cache directly.
    pub fn ingest_streamed(&self, position: Position, source_index: usize) {
        if position.is_valid() {
            self.update_cache(position, source_index);
        }
    }

    /// Blocks until at least one newly accepted position is available,
    /// then returns everything queued. This is the feed the orchestrator
    /// drives its persist-and-alert loop from.
    pub async fn drain_new_positions(&self) -> Vec<Position> {
        self.new_positions.drain().await
    }

    /// While the primary streaming adapter is CONNECTED, sleeps at
    /// `poll_interval`; otherwise actively polls REST adapters.
    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            let primary_connected = self
                .primary()
                .map(|p| p.status() == SourceStatus::Connected)
                .unwrap_or(false);

            if primary_connected {
                continue;
            }

            let subscribed: Vec<String> = self.dedup_cache.read().keys().cloned().collect();
            if subscribed.is_empty() {
                continue;
            }
            for (idx, source) in self.sources.iter().enumerate().skip(1) {
                let fetched = source.fetch_positions(&subscribed).await;
                for pos in fetched {
                    self.update_cache(pos, idx);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::VesselInfo;

    struct StubSource {
        name: String,
        status: SourceStatus,
    }

    #[async_trait]
    impl AisSource for StubSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn status(&self) -> SourceStatus {
            self.status
        }
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _s: Subscription) -> anyhow::Result<()> {
            Ok(())
        }
        async fn fetch_positions(&self, _mmsis: &[String]) -> Vec<Position> {
            vec![]
        }
        async fn fetch_vessel_info(&self, _mmsi: &str) -> Option<VesselInfo> {
            None
        }
        async fn disconnect(&self) {}
    }

    fn sample_position(mmsi: &str, secs_ago: i64) -> Position {
        Position {
            mmsi: mmsi.to_string(),
            lat: 31.0,
            lon: 121.0,
            timestamp: chrono::Utc::now() - chrono::Duration::seconds(secs_ago),
            speed_knots: None,
            course_deg: None,
            heading_deg: None,
            nav_status_code: None,
            source_id: "test".to_string(),
            source_received_at: chrono::Utc::now(),
        }
    }

    fn manager() -> SourceManager {
        let sources: Vec<Arc<dyn AisSource>> = vec![Arc::new(StubSource {
            name: "primary".to_string(),
            status: SourceStatus::Connected,
        })];
        SourceManager::new(sources, Duration::from_secs(60))
    }

    #[test]
    fn dedup_replaces_on_strictly_newer_timestamp() {
        let mgr = manager();
        mgr.ingest_streamed(sample_position("636012345", 100), 0);
        mgr.ingest_streamed(sample_position("636012345", 10), 0);
        let cache = mgr.dedup_cache.read();
        let (pos, _) = cache.get("636012345").unwrap();
        assert!(pos.timestamp > chrono::Utc::now() - chrono::Duration::seconds(20));
    }

    #[test]
    fn dedup_keeps_newer_regardless_of_arrival_order() {
        let mgr = manager();
        let older = sample_position("636012345", 100);
        let newer = sample_position("636012345", 10);
        mgr.ingest_streamed(newer.clone(), 0);
        mgr.ingest_streamed(older, 0);
        let cache = mgr.dedup_cache.read();
        let (pos, _) = cache.get("636012345").unwrap();
        assert_eq!(pos.timestamp, newer.timestamp);
    }

    #[test]
    fn dedup_prefers_higher_priority_source_on_tie() {
        let mgr = manager();
        let mut pos_a = sample_position("636012345", 50);
        let pos_b = pos_a.clone();
        pos_a.source_id = "low_priority".to_string();
        mgr.ingest_streamed(pos_a, 2);
        mgr.ingest_streamed(pos_b.clone(), 0);
        let cache = mgr.dedup_cache.read();
        let (_, idx) = cache.get("636012345").unwrap();
        assert_eq!(*idx, 0);
    }
}
