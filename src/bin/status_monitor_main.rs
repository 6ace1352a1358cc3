// status_monitor_main.rs
use green_corridor::global_variables::{amqp_url, DECISION_LOG_CSV};
use green_corridor::monitoring::status_monitor::listen_signal_status;
use log::error;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = listen_signal_status(amqp_url(), PathBuf::from(DECISION_LOG_CSV)).await {
        error!("Status monitor stopped: {}", e);
    }
}
