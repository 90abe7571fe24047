//! Concurrent lookup of partitions by explicit key.

use std::sync::Arc;

use futures::{StreamExt, stream::FuturesUnordered};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    api::{BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE, BatchGetPartitionOutput, CatalogApi},
    error::{Error, Result},
    model::PartitionKey,
    pool::{WorkerPool, task_result},
};

/// The table a batch lookup is made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub catalog_id: Option<Arc<str>>,
    pub database: Arc<str>,
    pub table: Arc<str>,
}

/// Split `keys` into consecutive batches the catalog accepts in one request.
pub fn chunk_keys(keys: Vec<PartitionKey>) -> Vec<Vec<PartitionKey>> {
    let mut chunks =
        Vec::with_capacity(keys.len().div_ceil(BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE));
    let mut keys = keys.into_iter().peekable();
    while keys.peek().is_some() {
        chunks.push(
            keys.by_ref()
                .take(BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE)
                .collect(),
        );
    }
    chunks
}

/// Look up `keys` in batches issued concurrently on `pool`.
///
/// Keys the service could not serve are reported in the output's `errors` rather than failing
/// the call. A failed batch request fails the whole call with its original error. Batches are
/// merged in completion order.
pub async fn fetch_by_keys(
    pool: &WorkerPool,
    api: &Arc<dyn CatalogApi>,
    table: &TableRef,
    keys: Vec<PartitionKey>,
    shutdown: &CancellationToken,
) -> Result<BatchGetPartitionOutput> {
    let mut tasks: FuturesUnordered<_> = chunk_keys(keys)
        .into_iter()
        .map(|chunk| {
            let api = Arc::clone(api);
            let table = table.clone();
            pool.spawn(async move {
                api.batch_get_partition(
                    table.catalog_id.as_deref(),
                    &table.database,
                    &table.table,
                    chunk,
                )
                .await
            })
        })
        .collect();
    let batches = tasks.len();

    let mut output = BatchGetPartitionOutput::default();
    loop {
        let res = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(
                    database = %table.database,
                    table = %table.table,
                    "partition batch lookup interrupted"
                );
                return Err(Error::Interrupted);
            }
            res = tasks.next() => res,
        };
        let Some(res) = res else { break };
        output.extend(task_result(res)?);
    }

    debug!(
        database = %table.database,
        table = %table.table,
        batches,
        partitions = output.partitions.len(),
        errors = output.errors.len(),
        "fetched partitions by key"
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{ServiceError, ServiceErrorKind},
        mem::{Fault, MemCatalogApi},
        pool::{CurrentRuntimeFactory, ExecutorFactory},
    };
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    fn keys(n: usize) -> Vec<PartitionKey> {
        (0..n).map(|i| PartitionKey::new([format!("p{i:05}")])).collect()
    }

    proptest! {
        #[test]
        fn chunking_covers_every_key_once(n in 0usize..4500) {
            let input = keys(n);
            let chunks = chunk_keys(input.clone());

            prop_assert_eq!(chunks.len(), n.div_ceil(BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE));
            prop_assert!(chunks
                .iter()
                .all(|c| !c.is_empty() && c.len() <= BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE));
            prop_assert_eq!(chunks.concat(), input);
        }
    }

    struct Fixture {
        api: Arc<MemCatalogApi>,
        dyn_api: Arc<dyn CatalogApi>,
        pool: WorkerPool,
        table: TableRef,
    }

    fn fixture(partitions: usize) -> Fixture {
        let api = Arc::new(MemCatalogApi::new());
        api.seed_partitions("db", "t", partitions);
        Fixture {
            dyn_api: Arc::clone(&api) as _,
            api,
            pool: CurrentRuntimeFactory::new(NonZeroUsize::new(4).unwrap())
                .worker_pool()
                .unwrap(),
            table: TableRef {
                catalog_id: None,
                database: Arc::from("db"),
                table: Arc::from("t"),
            },
        }
    }

    #[test_log::test(tokio::test)]
    async fn missing_keys_are_reported_as_data() {
        let f = fixture(1500);
        let mut wanted = keys(1500);
        wanted[1200] = PartitionKey::new(["missing"]);

        let output =
            fetch_by_keys(&f.pool, &f.dyn_api, &f.table, wanted, &CancellationToken::new())
                .await
                .unwrap();

        assert_eq!(output.partitions.len(), 1499);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].key, PartitionKey::new(["missing"]));
        assert_eq!(output.errors[0].cause.kind(), ServiceErrorKind::EntityNotFound);

        let mut sizes = f.api.batch_request_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![500, 1000]);
    }

    #[tokio::test]
    async fn batch_count_matches_ceiling() {
        let f = fixture(10);
        fetch_by_keys(&f.pool, &f.dyn_api, &f.table, keys(2001), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.api.batch_request_sizes().len(), 3);
        assert_eq!(f.api.batch_request_sizes().iter().sum::<usize>(), 2001);
    }

    #[tokio::test]
    async fn no_keys_no_requests() {
        let f = fixture(10);
        let output = fetch_by_keys(&f.pool, &f.dyn_api, &f.table, vec![], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, BatchGetPartitionOutput::default());
        assert!(f.api.batch_request_sizes().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_fails_the_call() {
        let f = fixture(10);
        let cause = ServiceError::new(ServiceErrorKind::Throttling, "rate exceeded");
        f.api.inject_batch_fault(Fault::FailAfter(1, cause.clone()));

        let res = fetch_by_keys(
            &f.pool,
            &f.dyn_api,
            &f.table,
            keys(1500),
            &CancellationToken::new(),
        )
        .await;
        match res {
            Err(Error::Service(e)) => assert_eq!(e, cause),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_is_interrupted() {
        let f = fixture(10);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let res = fetch_by_keys(&f.pool, &f.dyn_api, &f.table, keys(5), &shutdown).await;
        assert!(matches!(res, Err(Error::Interrupted)));
    }
}
