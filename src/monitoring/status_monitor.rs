use crate::data_structures::Timestamp;
use crate::error::{EngineError, EngineResult};
use crate::global_variables::QUEUE_SIGNAL_STATUS;
use crate::monitoring::decision_log::write_csv;
use crate::monitoring::status::SystemSnapshot;
use amiquip::{Connection, ConsumerMessage, ConsumerOptions, QueueDeclareOptions};
use log::{info, warn};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Appends the snapshot's decisions newer than `last_seen` to the CSV at `path`,
/// writing the header only when the file is new. Returns the newest timestamp seen.
pub fn append_new_decisions(
    path: impl AsRef<Path>,
    snapshot: &SystemSnapshot,
    last_seen: Option<Timestamp>,
) -> EngineResult<Option<Timestamp>> {
    let fresh: Vec<_> = snapshot
        .recent_decisions
        .iter()
        .filter(|d| last_seen.map_or(true, |seen| d.timestamp > seen))
        .cloned()
        .collect();
    if fresh.is_empty() {
        return Ok(last_seen);
    }
    let path = path.as_ref();
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    write_csv(&fresh, file, !file_exists)?;
    Ok(fresh.iter().map(|d| d.timestamp).max().max(last_seen))
}

/// Consumes `signal_status` and keeps the decision CSV up to date.
pub async fn listen_signal_status(amqp_url: String, csv_path: PathBuf) -> EngineResult<()> {
    tokio::task::spawn_blocking(move || -> EngineResult<()> {
        let mut connection = Connection::insecure_open(&amqp_url)?;
        let channel = connection.open_channel(None)?;
        let queue = channel.queue_declare(QUEUE_SIGNAL_STATUS, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        info!("Listening for signal status on {}", QUEUE_SIGNAL_STATUS);

        let mut last_seen = None;
        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    match serde_json::from_slice::<SystemSnapshot>(&delivery.body) {
                        Ok(snapshot) => {
                            info!(
                                "{} ambulances active, {} signals locked, {} suppressed",
                                snapshot.active_ambulance_ids.len(),
                                snapshot.locked_resources.len(),
                                snapshot.suppressed_ambulance_ids.len()
                            );
                            match append_new_decisions(&csv_path, &snapshot, last_seen) {
                                Ok(seen) => last_seen = seen,
                                Err(e) => warn!("Could not append decisions: {}", e),
                            }
                        }
                        Err(e) => warn!("Dropping malformed status message: {}", e),
                    }
                    consumer.ack(delivery)?;
                }
                other => {
                    info!("Signal status consumer ended: {:?}", other);
                    break;
                }
            }
        }
        connection.close()?;
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::arbitration::ArbitrationReason;
    use crate::data_structures::{AmbulanceId, SignalId};
    use crate::monitoring::decision_log::DecisionLogEntry;
    use std::collections::BTreeMap;

    fn snapshot(stamps: &[Timestamp]) -> SystemSnapshot {
        SystemSnapshot {
            active_ambulance_ids: vec![],
            locked_resources: BTreeMap::new(),
            suppressed_ambulance_ids: vec![],
            recent_decisions: stamps
                .iter()
                .map(|&timestamp| DecisionLogEntry {
                    resource: SignalId::new("S1"),
                    winner: AmbulanceId::new("A"),
                    losers: vec![],
                    reason: ArbitrationReason::CleanGrant,
                    timestamp,
                })
                .collect(),
            generated_at: 0,
        }
    }

    #[test]
    fn only_new_decisions_are_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decision_log.csv");

        let seen = append_new_decisions(&path, &snapshot(&[1, 2]), None).unwrap();
        assert_eq!(seen, Some(2));
        // overlapping tail from the next snapshot
        let seen = append_new_decisions(&path, &snapshot(&[2, 3]), seen).unwrap();
        assert_eq!(seen, Some(3));
        let seen = append_new_decisions(&path, &snapshot(&[3]), seen).unwrap();
        assert_eq!(seen, Some(3));

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let stamps: Vec<u64> = rdr
            .records()
            .map(|r| r.unwrap()[0].parse().unwrap())
            .collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }
}
