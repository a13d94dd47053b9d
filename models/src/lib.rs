pub mod compute;
pub mod constants;
pub mod node;
pub mod telemetry;
