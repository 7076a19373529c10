//! Orchestrator: wires the Source Manager, Track Store, and
//! Alert Engine into the long-lived ingest loop, with graceful
//! shutdown on Ctrl+C via `tokio::select!` task fan-in.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::alerts;
use crate::config::Config;
use crate::geo::BoundingBox;
use crate::manager::SourceManager;
use crate::sanctions::{SanctionsIndex, ZoneIndex};
use crate::sources::{AisSource, Subscription};
use crate::sources::rest::{AisHubSource, MarinesiaSource};
use crate::sources::streaming::StreamingAisSource;
use crate::store::TrackStore;

pub struct Orchestrator {
    manager: Arc<SourceManager>,
    store: TrackStore,
    sanctions: Arc<SanctionsIndex>,
    zones: Arc<ZoneIndex>,
    dark_period_hours: i64,
}

impl Orchestrator {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = TrackStore::open(&config.db_path)?;
        let mut sources: Vec<Arc<dyn AisSource>> = Vec::new();

        for name in &config.priority {
            let Some(source_cfg) = config.sources.get(name) else {
                warn!(source = %name, "priority entry has no matching source config, skipping");
                continue;
            };
            if !source_cfg.enabled {
                continue;
            }
            match name.as_str() {
                "aisstream" => {
                    if let Some(key) = &source_cfg.api_key {
                        let source = StreamingAisSource::spawn(
                            "aisstream",
                            "wss://stream.aisstream.io/v0/stream",
                            key.as_str(),
                        );
                        sources.push(source as Arc<dyn AisSource>);
                    }
                }
                "aishub" => {
                    if let Some(user) = &source_cfg.username {
                        let source = AisHubSource::new("https://data.aishub.net/ws.php", user.as_str())?;
                        sources.push(source as Arc<dyn AisSource>);
                    }
                }
                "marinesia" => {
                    if let Some(key) = &source_cfg.api_key {
                        let source = MarinesiaSource::new("https://api.marinesia.com/v1", key.as_str())?;
                        sources.push(source as Arc<dyn AisSource>);
                    }
                }
                other => warn!(source = %other, "unrecognized source name in config, skipping"),
            }
        }

        if sources.is_empty() {
            return Err(anyhow::anyhow!("no enabled sources resolved from config"));
        }

        let manager = Arc::new(SourceManager::new(sources, Duration::from_secs(config.poll_interval)));

        Ok(Self {
            manager,
            store,
            sanctions: Arc::new(SanctionsIndex::new()),
            zones: Arc::new(ZoneIndex::new(vec![])),
            dark_period_hours: config.dark_period_hours as i64,
        })
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Starts ingest and blocks until Ctrl+C, the Source Manager
    /// irrecoverably fails, or a repeated persistence failure demotes
    /// the orchestrator to degraded mode.
    pub async fn run(&self, bbox: BoundingBox) -> anyhow::Result<()> {
        self.manager.start().await?;
        self.manager
            .subscribe(Subscription {
                mmsis: Default::default(),
                bounding_boxes: vec![bbox],
            })
            .await;

        let manager = self.manager.clone();
        let store = self.store.clone();
        let sanctions = self.sanctions.clone();
        let zones = self.zones.clone();
        let dark_period_hours = self.dark_period_hours;

        let ingest_task = tokio::spawn(async move {
            let mut write_failures = 0u32;
            loop {
                for position in manager.drain_new_positions().await {
                    let prior = store.history(&position.mmsi, chrono::Utc::now() - chrono::Duration::days(1), chrono::Utc::now()).await.unwrap_or_default();
                    match store.append(&position).await {
                        Ok(()) => {
                            write_failures = 0;
                            if let Err(e) = alerts::evaluate(&store, &sanctions, &zones, &position, &prior, None, None, dark_period_hours).await {
                                error!(error = %e, "alert evaluation failed");
                            }
                        }
                        Err(e) => {
                            write_failures += 1;
                            error!(error = %e, failures = write_failures, "track store write failed");
                            if write_failures >= 5 {
                                error!("persistence degraded: entering read-only mode");
                            }
                        }
                    }
                }
            }
        });

        tokio::select! {
            _ = ingest_task => {
                info!("ingest task exited");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
            }
        }

        self.manager.stop().await;
        Ok(())
    }
}
