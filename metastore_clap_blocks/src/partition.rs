//! Config for partition retrieval against the remote catalog.

use std::num::NonZeroUsize;

use crate::tokio::TokioWorkerConfig;

/// Default number of segments a parallel partition scan is split into.
pub const DEFAULT_NUM_PARTITION_SEGMENTS: usize = 5;

/// Strategy used to construct the worker pool that runs catalog requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ExecutorKind {
    /// Build a dedicated tokio runtime from the catalog runtime settings.
    #[default]
    Dedicated,

    /// Spawn onto the tokio runtime the client is created on.
    Current,
}

/// CLI config for listing partitions from the remote catalog.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct PartitionFetchConfig {
    /// Catalog id attached to every remote request.
    ///
    /// When unset the service's default catalog for the caller is used.
    #[clap(long = "catalog-id", env = "METASTORE_CATALOG_ID", action)]
    pub catalog_id: Option<String>,

    /// Number of disjoint segments a large partition listing is split into.
    ///
    /// Each segment is scanned concurrently. The catalog service accepts at most 10 segments;
    /// larger values are rejected when the client is built.
    #[clap(
        long = "partition-num-segments",
        env = "METASTORE_PARTITION_NUM_SEGMENTS",
        default_value_t = DEFAULT_NUM_PARTITION_SEGMENTS,
        action
    )]
    pub num_segments: usize,

    /// Maximum number of catalog requests in flight across all callers of one client.
    #[clap(
        long = "partition-max-concurrent-requests",
        env = "METASTORE_PARTITION_MAX_CONCURRENT_REQUESTS",
        default_value = "20",
        action
    )]
    pub max_concurrent_requests: NonZeroUsize,

    /// How the worker pool for catalog requests is constructed.
    #[clap(
        long = "executor-factory",
        env = "METASTORE_EXECUTOR_FACTORY",
        default_value_t = ExecutorKind::default(),
        value_enum,
        action
    )]
    pub executor: ExecutorKind,

    #[clap(flatten)]
    pub worker: TokioWorkerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use std::ffi::OsString;

    #[test]
    fn test_defaults() {
        let config = PartitionFetchConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(config.catalog_id, None);
        assert_eq!(config.num_segments, DEFAULT_NUM_PARTITION_SEGMENTS);
        assert_eq!(config.max_concurrent_requests.get(), 20);
        assert_eq!(config.executor, ExecutorKind::Dedicated);
        assert_eq!(config.worker.num_threads, None);
    }

    #[test]
    fn test_parse_flags() {
        let config = PartitionFetchConfig::parse_from([
            "prog",
            "--catalog-id",
            "123456789012",
            "--partition-num-segments",
            "8",
            "--partition-max-concurrent-requests",
            "4",
            "--executor-factory",
            "current",
            "--num-catalog-threads",
            "2",
        ]);
        assert_eq!(config.catalog_id.as_deref(), Some("123456789012"));
        assert_eq!(config.num_segments, 8);
        assert_eq!(config.max_concurrent_requests.get(), 4);
        assert_eq!(config.executor, ExecutorKind::Current);
        assert_eq!(config.worker.num_threads.map(|n| n.get()), Some(2));
    }

    #[test]
    fn test_segment_count_is_not_clamped() {
        // range checks belong to the client so misconfiguration fails loudly there
        let config = PartitionFetchConfig::parse_from(["prog", "--partition-num-segments", "11"]);
        assert_eq!(config.num_segments, 11);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let res = PartitionFetchConfig::try_parse_from([
            "prog",
            "--partition-max-concurrent-requests",
            "0",
        ]);
        assert!(res.is_err());
    }
}
