//! Cordon and drain of the Kubernetes nodes backed by preemptible instances.
//!
//! On GKE a node's name matches the name of its compute instance, so the drain controller addresses
//! nodes by instance name.
mod client;
pub mod drain;
mod error;

pub use self::client::*;
pub use self::error::Error as NodeClientError;

#[cfg(feature = "mockall")]
pub use self::client::MockNodeClient;
