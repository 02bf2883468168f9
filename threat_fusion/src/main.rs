// Example runner for the `threat_fusion` library.
//
// Reads sensor readings as JSON lines on stdin (one object per line, e.g.
// `{"sensor_id":"radar-1","threat_id":2,"x":10.0,"y":12.5,"level":6,"confidence":0.9,"timestamp":0}`)
// and writes confirmed detections as JSON lines on stdout. Configuration comes
// from `TF_CONFIG` / `TF_*` variables, log filtering from `RUST_LOG`.

use anyhow::Context;
use futures::stream;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use threat_fusion::{ConfirmedThreat, FusionConfig, FusionService, SensorReading};

/// Wire shape of a confirmed detection on stdout.
#[derive(Serialize)]
struct ThreatMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    threat: &'a ConfirmedThreat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = FusionConfig::load().context("loading fusion configuration")?;
    info!(
        radius = config.cluster_radius,
        min_sensors = config.min_sensors,
        "threat fusion starting"
    );

    let (service, receiver) = FusionService::new(config)?;
    let sweeper = service.spawn_expiry_sweeper();
    let relay = FusionService::spawn_relay(receiver, |threat: ConfirmedThreat| {
        info!(
            id = threat.id,
            x = threat.x,
            y = threat.y,
            level = threat.level,
            sensors = threat.sensor_count,
            "CONFIRMED"
        );
        let message = ThreatMessage {
            kind: "threat_update",
            threat: &threat,
        };
        match serde_json::to_string(&message) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to encode detection"),
        }
    });

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let readings = stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<SensorReading>(&line) {
                    Ok(reading) => return Some((Ok(reading), lines)),
                    Err(err) => warn!(error = %err, "skipping unparseable line"),
                },
                Ok(None) => return None,
                Err(err) => return Some((Err(err), lines)),
            }
        }
    });

    let summary = service.spawn_sensor_stream("stdin", readings).await?;
    info!(accepted = summary.accepted, rejected = summary.rejected, "input drained");

    let stats = service.coordinator().stats();
    sweeper.abort();
    let _ = sweeper.await;
    drop(service);
    let delivered = relay.await?;
    info!(
        delivered,
        published = stats.published,
        dropped = stats.dropped,
        "threat fusion stopped"
    );
    Ok(())
}
