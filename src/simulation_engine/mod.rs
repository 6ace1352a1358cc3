// simulation_engine/mod.rs
pub mod ambulance_simulation;
