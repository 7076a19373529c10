//! `ais-fusion` CLI entry point.
//!
//! Usage:
//!   ais-fusion stream --lat-min .. --lon-min .. --lat-max .. --lon-max ..
//!   ais-fusion sar-import <file> [--time ISO] [--no-correlate]
//!   ais-fusion score <vessel_id> [--days N] [--save]
//!   ais-fusion assess <vessel_id>

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};

use ais_fusion_core::config::Config;
use ais_fusion_core::geo::BoundingBox;
use ais_fusion_core::identifiers::validate_mmsi;
use ais_fusion_core::orchestrator::Orchestrator;
use ais_fusion_core::sar;
use ais_fusion_core::store::TrackStore;

/// Distinguishes a malformed invocation (bad vessel id, missing file)
/// from a runtime failure (I/O, network, persistence), so `main` can
/// exit 1 vs 2 rather than collapsing both to one code.
enum CliError {
    User(String),
    System(anyhow::Error),
}

impl<E: Into<anyhow::Error>> From<E> for CliError {
    fn from(e: E) -> Self {
        CliError::System(e.into())
    }
}

#[derive(Parser, Debug)]
#[command(name = "ais-fusion")]
#[command(about = "Maritime dark-fleet intelligence fusion")]
struct Cli {
    #[arg(long, env = "AIS_FUSION_CONFIG", default_value = "./config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the streaming ingest loop over a bounding box.
    Stream {
        #[arg(long = "lat-min", allow_hyphen_values = true)]
        lat_min: f64,
        #[arg(long = "lon-min", allow_hyphen_values = true)]
        lon_min: f64,
        #[arg(long = "lat-max", allow_hyphen_values = true)]
        lat_max: f64,
        #[arg(long = "lon-max", allow_hyphen_values = true)]
        lon_max: f64,
        #[arg(long = "update-interval", default_value_t = 60)]
        update_interval: u64,
    },
    /// Parse and correlate SAR detections from a CSV or XML file.
    SarImport {
        file: String,
        #[arg(long)]
        time: Option<String>,
        #[arg(long = "no-correlate", default_value_t = false)]
        no_correlate: bool,
        #[arg(long, default_value = "./ais_fusion.db")]
        db: String,
    },
    /// Recompute confidence for a vessel.
    Score {
        vessel_id: String,
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long, default_value_t = false)]
        save: bool,
        #[arg(long, default_value = "./ais_fusion.db")]
        db: String,
    },
    /// Emit the full intelligence assessment for a vessel as JSON.
    Assess {
        vessel_id: String,
        #[arg(long, default_value = "./ais_fusion.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(CliError::User(msg)) => {
            error!(%msg, "invalid invocation");
            ExitCode::from(1)
        }
        Err(CliError::System(e)) => {
            error!(error = %e, "fatal error");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Stream { lat_min, lon_min, lat_max, lon_max, update_interval } => {
            let mut config = Config::load_from_path(std::path::Path::new(&cli.config))
                .unwrap_or_else(|e| {
                    info!(error = %e, "no usable config file, using defaults");
                    default_config()
                });
            config.poll_interval = update_interval;

            let orchestrator = Orchestrator::from_config(&config)?;
            let bbox = BoundingBox::new(lat_min, lon_min, lat_max, lon_max);
            orchestrator.run(bbox).await?;
            Ok(())
        }
        Command::SarImport { file, time, no_correlate, db } => {
            let contents = std::fs::read_to_string(&file)
                .map_err(|e| CliError::User(format!("reading {file}: {e}")))?;
            let acquisition_time = time
                .map(|t| ais_fusion_core::geo::parse_timestamp(&t).when)
                .unwrap_or_else(chrono::Utc::now);

            let mut detections = sar::parse_detections(&file, &contents, acquisition_time);
            println!("Parsed {} SAR detection(s) from {file}", detections.len());

            if !no_correlate {
                let store = TrackStore::open(&db)?;
                detections = sar::correlate_with_ais(
                    &store,
                    detections,
                    sar::DEFAULT_TIME_WINDOW_MINUTES,
                    sar::DEFAULT_DISTANCE_THRESHOLD_KM,
                )
                .await?;
                for detection in &detections {
                    store.append_sar(detection).await?;
                    if detection.is_dark_vessel() {
                        store
                            .append_event(
                                None,
                                "DARK_VESSEL_DETECTED",
                                "high",
                                "Dark vessel detected",
                                "SAR detection did not correlate to any tracked AIS position",
                                Some(detection.lat),
                                Some(detection.lon),
                                "sar_correlator",
                                &sar::dark_vessel_event(detection),
                            )
                            .await?;
                    }
                }
                let dark = detections.iter().filter(|d| d.is_dark_vessel()).count();
                println!("Matched {} vessel(s); {dark} dark-vessel detection(s)", detections.len() - dark);
            }
            Ok(())
        }
        Command::Score { vessel_id, days, save, db } => {
            if !validate_mmsi(&vessel_id) {
                return Err(CliError::User(format!("{vessel_id} is not a well-formed MMSI")));
            }
            let store = TrackStore::open(&db)?;
            let score = ais_fusion_core::confidence::score_vessel(&store, &vessel_id, days).await?;
            println!("{}", serde_json::to_string_pretty(&score)?);
            println!("overall = {:.3} ({:?})", score.overall(), score.level());
            if save {
                store
                    .append_event(
                        Some(&vessel_id),
                        "confidence_scored",
                        "info",
                        "Confidence recomputed",
                        "",
                        None,
                        None,
                        "cli",
                        &serde_json::to_value(&score)?,
                    )
                    .await?;
            }
            Ok(())
        }
        Command::Assess { vessel_id, db } => {
            if !validate_mmsi(&vessel_id) {
                return Err(CliError::User(format!("{vessel_id} is not a well-formed MMSI")));
            }
            let store = TrackStore::open(&db)?;
            let sanctions = ais_fusion_core::sanctions::SanctionsIndex::new();
            let zones = ais_fusion_core::sanctions::ZoneIndex::new(vec![]);
            let dark_fleet_input = ais_fusion_core::confidence::DarkFleetRiskInput {
                flag_state: None,
                year_built: None,
                owner: None,
                ais_gap_count: 0,
                spoofing_count: 0,
                loitering_count: 0,
                sts_count: 0,
                is_tanker: false,
            };
            let assessment = ais_fusion_core::intelligence::assemble(
                &store,
                &sanctions,
                &zones,
                &vessel_id,
                None,
                None,
                &dark_fleet_input,
                30,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
            Ok(())
        }
    }
}

fn default_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "sources": {},
        "priority": [],
        "poll_interval": 60,
        "dark_period_hours": 24
    }))
    .expect("default config literal is well-formed")
}
