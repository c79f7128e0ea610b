//! Identify admission
//!
//! Every shard in the process funnels its connection attempts through one [`IdentifyGate`], which
//! spaces them out and honors the daily identify quota tracked by [`IdentifyMetric`].

mod gate;
mod metric;

pub use gate::IdentifyGate;
pub use metric::IdentifyMetric;
