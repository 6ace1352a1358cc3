pub mod decision_log;
pub mod status;
pub mod status_monitor;
