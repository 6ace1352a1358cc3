// dispatch_simulator_main.rs
use green_corridor::communication::dispatch_channel::UpdatePublisher;
use green_corridor::global_variables::amqp_url;
use green_corridor::route_engine::signals::SignalRegistry;
use green_corridor::simulation_engine::ambulance_simulation::run_dispatch_simulation;
use log::error;
use tokio::time::Duration;

const FLEET_SIZE: usize = 4;

#[tokio::main]
async fn main() {
    env_logger::init();

    let registry = match SignalRegistry::from_env() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Could not load signals: {}", e);
            std::process::exit(1);
        }
    };
    let publisher = match UpdatePublisher::connect(&amqp_url()) {
        Ok(publisher) => publisher,
        Err(e) => {
            error!("Could not connect to the broker: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_dispatch_simulation(registry, publisher, FLEET_SIZE, Duration::from_secs(1)).await {
        error!("Dispatch simulation stopped: {}", e);
    }
}
