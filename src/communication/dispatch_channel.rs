// dispatch_channel.rs
//
// RabbitMQ transport around the engine. Updates come in on `ambulance_updates`;
// after each one the tick report goes to `control_decisions` and a fresh system
// snapshot to `signal_status`.

use crate::control_system::preemption_engine::{PreemptionEngine, TickReport};
use crate::error::{EngineError, EngineResult};
use crate::global_variables::{QUEUE_AMBULANCE_UPDATES, QUEUE_CONTROL_DECISIONS, QUEUE_SIGNAL_STATUS};
use crate::monitoring::status::SystemSnapshot;
use crate::shared_data::AmbulanceUpdate;
use amiquip::{Channel, Connection, ConsumerMessage, ConsumerOptions, Exchange, Publish, QueueDeclareOptions};
use log::{info, warn};
use std::sync::Arc;

/// Decodes and processes one `ambulance_updates` payload.
pub fn handle_update_message(engine: &PreemptionEngine, body: &[u8]) -> EngineResult<(TickReport, SystemSnapshot)> {
    let update: AmbulanceUpdate = serde_json::from_slice(body)?;
    let report = engine.process_update(&update)?;
    Ok((report, engine.system_snapshot()))
}

fn declare_queues(channel: &Channel) -> EngineResult<()> {
    for name in [QUEUE_AMBULANCE_UPDATES, QUEUE_SIGNAL_STATUS, QUEUE_CONTROL_DECISIONS] {
        channel.queue_declare(name, QueueDeclareOptions::default())?;
    }
    Ok(())
}

/// Runs the engine behind RabbitMQ until the consumer is cancelled.
pub async fn run_preemption_service(engine: Arc<PreemptionEngine>, amqp_url: String) -> EngineResult<()> {
    tokio::task::spawn_blocking(move || -> EngineResult<()> {
        let mut connection = Connection::insecure_open(&amqp_url)?;
        let channel = connection.open_channel(None)?;
        let exchange = Exchange::direct(&channel);
        declare_queues(&channel)?;
        let queue = channel.queue_declare(QUEUE_AMBULANCE_UPDATES, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        info!("Waiting for ambulance updates on '{}'", QUEUE_AMBULANCE_UPDATES);

        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    match handle_update_message(&engine, &delivery.body) {
                        Ok((report, snapshot)) => {
                            let report_json = serde_json::to_vec(&report)?;
                            exchange.publish(Publish::new(&report_json, QUEUE_CONTROL_DECISIONS))?;
                            let snapshot_json = serde_json::to_vec(&snapshot)?;
                            exchange.publish(Publish::new(&snapshot_json, QUEUE_SIGNAL_STATUS))?;
                            info!(
                                "Processed update for {}: {} active signals, {} released",
                                report.ambulance_id,
                                report.active_corridor.len(),
                                report.released.len()
                            );
                        }
                        // bad input never stops the consumer
                        Err(e) => warn!("Dropping ambulance update: {}", e),
                    }
                    consumer.ack(delivery)?;
                }
                other => {
                    info!("Ambulance update consumer ended: {:?}", other);
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

/// Publisher half used by the dispatch simulator.
pub struct UpdatePublisher {
    connection: Connection,
    channel: Channel,
}

impl UpdatePublisher {
    pub fn connect(amqp_url: &str) -> EngineResult<Self> {
        let mut connection = Connection::insecure_open(amqp_url)?;
        let channel = connection.open_channel(None)?;
        declare_queues(&channel)?;
        Ok(Self { connection, channel })
    }

    pub fn publish(&self, update: &AmbulanceUpdate) -> EngineResult<()> {
        let payload = serde_json::to_vec(update)?;
        Exchange::direct(&self.channel).publish(Publish::new(&payload, QUEUE_AMBULANCE_UPDATES))?;
        Ok(())
    }

    pub fn close(self) -> EngineResult<()> {
        self.channel.close()?;
        self.connection.close()?;
        Ok(())
    }
}
