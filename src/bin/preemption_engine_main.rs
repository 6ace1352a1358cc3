// preemption_engine_main.rs
use green_corridor::communication::dispatch_channel::run_preemption_service;
use green_corridor::config::EngineConfig;
use green_corridor::control_system::preemption_engine::PreemptionEngine;
use green_corridor::global_variables::amqp_url;
use green_corridor::route_engine::signals::SignalRegistry;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let engine = match EngineConfig::from_env()
        .and_then(|config| PreemptionEngine::new(config, SignalRegistry::from_env()?))
    {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Could not start the preemption engine: {}", e);
            std::process::exit(1);
        }
    };
    info!("Starting preemption engine with {} signals", engine.registry().len());

    // Timers run on their own task; the consumer blocks on the broker.
    tokio::spawn(PreemptionEngine::run_timer_loop(Arc::clone(&engine)));

    if let Err(e) = run_preemption_service(engine, amqp_url()).await {
        error!("Preemption service stopped: {}", e);
    }
}
