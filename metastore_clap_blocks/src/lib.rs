//! Building blocks for [`clap`]-driven configuration of the metastore client.

pub mod partition;
pub mod tokio;
