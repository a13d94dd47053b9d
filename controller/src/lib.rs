mod controller;

pub mod config;
pub mod deadline;
pub mod discovery;
pub mod error;
pub mod statemachine;
pub mod waiter;

pub use crate::controller::{CycleSummary, DrainController, NodeOutcome};
