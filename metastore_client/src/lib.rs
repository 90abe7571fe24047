//! Client for a remote metadata catalog of databases, tables, partitions and user defined
//! functions.
//!
//! Most calls are thin pass-throughs to a [`CatalogApi`]. Partition retrieval is where the
//! client does real work:
//!
//! * [`MetastoreClient::list_partitions`] walks small bounded listings serially and splits large
//!   or unbounded ones into segments scanned concurrently on a bounded [`WorkerPool`], truncating
//!   the merged result to the caller's maximum.
//! * [`MetastoreClient::list_partitions_by_keys`] and
//!   [`MetastoreClient::batch_get_partitions_with_errors`] resolve explicit keys in batches the
//!   catalog accepts, issued concurrently on the same pool.
//!
//! ```no_run
//! # async fn example() -> metastore_client::Result<()> {
//! use std::{num::NonZeroUsize, sync::Arc};
//!
//! use metastore_client::{
//!     MetastoreClient, mem::MemCatalogApi, pool::{CurrentRuntimeFactory, ExecutorFactory},
//! };
//!
//! let pool = CurrentRuntimeFactory::new(NonZeroUsize::new(20).unwrap()).worker_pool()?;
//! let client = MetastoreClient::new(Arc::new(MemCatalogApi::new()), pool, 5)?;
//! let partitions = client
//!     .list_partitions("sales", "orders", Some("year = '2024'"), -1)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod batch;
pub mod client;
pub mod error;
pub mod mem;
pub mod model;
pub mod parallel;
pub mod pool;
pub mod scan;
pub mod segment;

pub use api::CatalogApi;
pub use client::MetastoreClient;
pub use error::{Error, Result, ServiceError, ServiceErrorKind};
pub use pool::WorkerPool;
