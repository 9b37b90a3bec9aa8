mod alert;
mod controller;
mod loop_worker;

pub use alert::{AlertHandle, AlertMachine, AlertState, AlertStatus};
pub use controller::{BackgroundServices, MonitorController};
pub use loop_worker::MonitorLoop;
