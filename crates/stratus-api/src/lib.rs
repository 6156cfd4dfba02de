// stratus-api: Async Rust client for the Stratus compute control plane.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::ComputeClient;
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
