pub mod clock;
pub mod communication;
pub mod config;
pub mod control_system;
pub mod data_structures;
pub mod error;
pub mod global_variables;
pub mod monitoring;
pub mod route_engine;
pub mod shared_data;
pub mod simulation_engine;
