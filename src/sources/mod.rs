//! Uniform capability contract shared by every AIS source adapter,
//! modeled as a trait rather than a class hierarchy.

pub mod enrichment;
pub mod rest;
pub mod streaming;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

use crate::geo::BoundingBox;
use crate::models::{BehaviorEvent, Position, SarDetection, VesselInfo};

pub const POSITION_QUEUE_CAPACITY: usize = 1000;

/// Bounded hand-off queue from a streaming adapter's worker task to
/// the Source Manager. A plain `tokio::sync::mpsc` channel only
/// supports drop-newest-on-full; this carries the same async
/// wait-for-data contract but drops the oldest buffered frame on
/// overflow instead, counting how many were lost.
pub struct PositionQueue {
    buffer: Mutex<VecDeque<Position>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl PositionQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn push(&self, position: Position) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(total, capacity = self.capacity, "position queue full, dropped oldest frame");
        }
        buffer.push_back(position);
        drop(buffer);
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits for at least one buffered position, then drains everything
    /// currently queued.
    pub async fn drain(&self) -> Vec<Position> {
        loop {
            {
                let mut buffer = self.buffer.lock();
                if !buffer.is_empty() {
                    return buffer.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Disconnected,
    Connecting,
    Connected,
    RateLimited,
    Error,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub mmsis: HashSet<String>,
    pub bounding_boxes: Vec<BoundingBox>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            mmsis: HashSet::new(),
            bounding_boxes: vec![BoundingBox::GLOBAL],
        }
    }
}

/// The shared surface every source adapter — streaming, REST, or
/// enrichment-only — implements. REST adapters accept `subscribe` and
/// store the filter for use by `fetch_positions` rather than rejecting
/// it as unsupported.
#[async_trait]
pub trait AisSource: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> SourceStatus;

    async fn connect(&self) -> anyhow::Result<()>;

    async fn subscribe(&self, subscription: Subscription) -> anyhow::Result<()>;

    async fn fetch_positions(&self, mmsis: &[String]) -> Vec<Position>;

    async fn fetch_vessel_info(&self, mmsi: &str) -> Option<VesselInfo>;

    async fn disconnect(&self);

    /// Streaming sources expose the queue their worker task pushes
    /// decoded positions onto; polled sources have none and the
    /// manager's poll loop pulls from them directly instead.
    fn position_queue(&self) -> Option<Arc<PositionQueue>> {
        None
    }
}

/// Capability of the enrichment-only adapter: no real-time positions,
/// only historical behavior events and SAR presence.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    async fn fetch_events(&self, mmsi: &str, days: u32) -> Vec<BehaviorEvent>;

    async fn fetch_sar_detections(&self, bbox: BoundingBox, window_minutes: u32) -> Vec<SarDetection>;
}
