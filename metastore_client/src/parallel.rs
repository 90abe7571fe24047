//! Segmented, concurrent partition listing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    model::Partition,
    pool::{WorkerPool, task_result},
    scan::{PartitionQuery, PartitionScanner},
    segment::{Budget, Segment},
};

/// Scan every segment concurrently and merge the results in segment order.
///
/// Every segment is scanned with the full `budget`. Results are awaited in submission order, so
/// the output is the concatenation of whole segments, with the segment that fills the budget
/// truncated. Once the budget is met, or on the first failure, the remaining scans are aborted.
///
/// If `shutdown` fires while waiting, the call fails with [`Error::Interrupted`] and the token
/// stays cancelled.
pub async fn fetch_parallel(
    pool: &WorkerPool,
    scanner: &PartitionScanner,
    query: Arc<PartitionQuery>,
    segments: Vec<Segment>,
    budget: Budget,
    shutdown: &CancellationToken,
) -> Result<Vec<Partition>> {
    let tasks: Vec<_> = segments
        .iter()
        .map(|&segment| {
            let scanner = scanner.clone();
            let query = Arc::clone(&query);
            pool.spawn(async move { scanner.scan(&query, Some(segment), budget).await })
        })
        .collect();

    let mut partitions = Vec::new();
    for (segment, task) in segments.iter().zip(tasks) {
        let res = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!(
                    database = %query.database,
                    table = %query.table,
                    "partition listing interrupted"
                );
                return Err(Error::Interrupted);
            }
            res = task => res,
        };

        let segment_partitions = task_result(res).inspect_err(|e| {
            warn!(
                database = %query.database,
                table = %query.table,
                segment = segment.index(),
                error = %e,
                "segment scan failed"
            );
        })?;

        if let Some(max) = budget.limit() {
            if partitions.len() + segment_partitions.len() >= max {
                let remaining = max - partitions.len();
                partitions.extend(segment_partitions.into_iter().take(remaining));
                debug!(
                    database = %query.database,
                    table = %query.table,
                    segment = segment.index(),
                    partitions = partitions.len(),
                    "partition budget satisfied"
                );
                break;
            }
        }
        partitions.extend(segment_partitions);
    }

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::CatalogApi,
        error::{ServiceError, ServiceErrorKind},
        mem::{Fault, MemCatalogApi},
        pool::{CurrentRuntimeFactory, ExecutorFactory},
        segment::SegmentPlanner,
    };
    use std::{num::NonZeroUsize, time::Duration};

    struct Fixture {
        api: Arc<MemCatalogApi>,
        pool: WorkerPool,
        scanner: PartitionScanner,
        planner: SegmentPlanner,
    }

    fn fixture(partitions: usize) -> Fixture {
        let api = Arc::new(MemCatalogApi::new().with_page_size(100));
        api.seed_partitions("db", "t", partitions);
        let pool = CurrentRuntimeFactory::new(NonZeroUsize::new(10).unwrap())
            .worker_pool()
            .unwrap();
        let scanner = PartitionScanner::new(Arc::clone(&api) as Arc<dyn CatalogApi>, None);
        Fixture {
            api,
            pool,
            scanner,
            planner: SegmentPlanner::try_new(5).unwrap(),
        }
    }

    async fn run(f: &Fixture, max: i64) -> Result<Vec<Partition>> {
        let query = Arc::new(PartitionQuery::new("db", "t").with_max_results(max));
        let budget = query.budget();
        fetch_parallel(
            &f.pool,
            &f.scanner,
            query,
            f.planner.segments(),
            budget,
            &CancellationToken::new(),
        )
        .await
    }

    fn segment_of(p: &Partition) -> usize {
        p.values[0][1..].parse::<usize>().unwrap() % 5
    }

    #[test_log::test(tokio::test)]
    async fn exact_budget_takes_every_segment_whole() {
        let f = fixture(2500);
        let partitions = run(&f, 2500).await.unwrap();
        assert_eq!(partitions.len(), 2500);
        for (i, chunk) in partitions.chunks(500).enumerate() {
            assert!(chunk.iter().all(|p| segment_of(p) == i));
        }
    }

    #[tokio::test]
    async fn budget_above_available_is_capped_by_data() {
        let f = fixture(2500);
        let partitions = run(&f, 2600).await.unwrap();
        assert_eq!(partitions.len(), 2500);
    }

    #[tokio::test]
    async fn budget_truncates_within_a_segment() {
        let f = fixture(2500);
        let partitions = run(&f, 1200).await.unwrap();
        assert_eq!(partitions.len(), 1200);
        assert!(partitions[..500].iter().all(|p| segment_of(p) == 0));
        assert!(partitions[500..1000].iter().all(|p| segment_of(p) == 1));
        assert!(partitions[1000..].iter().all(|p| segment_of(p) == 2));
    }

    #[tokio::test]
    async fn segment_scan_stops_requesting_at_budget() {
        let f = fixture(3000);
        let query = Arc::new(PartitionQuery::new("db", "t").with_max_results(1200));
        let budget = query.budget();

        let partitions = fetch_parallel(
            &f.pool,
            &f.scanner,
            query,
            SegmentPlanner::try_new(1).unwrap().segments(),
            budget,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(partitions.len(), 1200);
        // 1200 partitions at 100 per page, none of the remaining 18 pages are requested
        assert_eq!(f.api.page_requests(), 12);
    }

    #[tokio::test]
    async fn unbounded_exhausts_every_segment() {
        let f = fixture(2345);
        let partitions = run(&f, -1).await.unwrap();
        assert_eq!(partitions.len(), 2345);
        // 469 partitions per segment at 100 per page is 5 pages each
        assert_eq!(f.api.page_requests(), 25);
    }

    #[tokio::test]
    async fn merge_follows_submission_order() {
        let f = fixture(50);
        f.api
            .inject_segment_fault(0, Fault::Delay(Duration::from_millis(50)));
        let partitions = run(&f, -1).await.unwrap();
        assert_eq!(partitions.len(), 50);
        assert!(partitions[..10].iter().all(|p| segment_of(p) == 0));
        assert!(partitions[40..].iter().all(|p| segment_of(p) == 4));
    }

    #[tokio::test]
    async fn segment_failure_surfaces_original_error() {
        let f = fixture(2500);
        let cause = ServiceError::new(ServiceErrorKind::AccessDenied, "not authorized on t");
        f.api.inject_segment_fault(2, Fault::Fail(cause.clone()));

        match run(&f, -1).await {
            Err(Error::Service(e)) => assert_eq!(e, cause),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    #[should_panic(expected = "segment worker panicked")]
    async fn segment_panic_is_resumed() {
        let f = fixture(100);
        f.api
            .inject_segment_fault(1, Fault::Panic("segment worker panicked"));
        let _ = run(&f, -1).await;
    }

    #[tokio::test]
    async fn interruption_is_reported_and_preserved() {
        let f = fixture(100);
        f.api
            .inject_segment_fault(0, Fault::Delay(Duration::from_secs(30)));
        let shutdown = CancellationToken::new();

        let query = Arc::new(PartitionQuery::new("db", "t"));
        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                shutdown.cancel();
            })
        };
        let res = fetch_parallel(
            &f.pool,
            &f.scanner,
            query,
            f.planner.segments(),
            Budget::Unbounded,
            &shutdown,
        )
        .await;
        canceller.await.unwrap();

        assert!(matches!(res, Err(Error::Interrupted)));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn repeated_calls_are_identical() {
        let f = fixture(1234);
        let first = run(&f, 2000).await.unwrap();
        let second = run(&f, 2000).await.unwrap();
        assert_eq!(first.len(), 1234);
        assert_eq!(first, second);
    }
}
