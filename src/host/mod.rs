//! Streaming-host integration: control client, process launch, stream
//! monitoring

pub mod client;
pub mod launch;
pub mod protocol;
pub mod restart;

pub use client::{HostClient, HostEvent};
pub use restart::StreamMonitor;
