//! Paginated walks over the catalog's listings.

use std::{future::Future, sync::Arc};

use tracing::debug;

use crate::{
    api::{CatalogApi, GetPartitionsRequest, Page, PageToken},
    error::ServiceError,
    model::Partition,
    segment::{Budget, Segment},
};

/// Follow continuation tokens from `fetch` until the listing is exhausted or `budget` items
/// have been collected.
///
/// The page that fills the budget is truncated and no further page is requested. Any error
/// aborts the walk; nothing collected so far is returned.
pub(crate) async fn collect_pages<T, F, Fut>(
    budget: Budget,
    mut fetch: F,
) -> Result<(Vec<T>, usize), ServiceError>
where
    F: FnMut(Option<PageToken>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ServiceError>>,
{
    let mut items = Vec::new();
    let mut next_token = None;
    let mut pages = 0;

    loop {
        let Page {
            items: page,
            next_token: token,
        } = fetch(next_token.take()).await?;
        pages += 1;

        if let Some(max) = budget.limit() {
            if items.len() + page.len() >= max {
                let remaining = max - items.len();
                items.extend(page.into_iter().take(remaining));
                break;
            }
        }
        items.extend(page);

        match token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    Ok((items, pages))
}

/// A partition listing requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionQuery {
    pub database: String,
    pub table: String,
    pub expression: Option<String>,
    /// Zero or negative for no limit.
    pub max_results: i64,
}

impl PartitionQuery {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            expression: None,
            max_results: -1,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_max_results(mut self, max_results: i64) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn budget(&self) -> Budget {
        Budget::from_max(self.max_results)
    }
}

/// Walks a table, or one segment of it, page by page.
#[derive(Debug, Clone)]
pub struct PartitionScanner {
    api: Arc<dyn CatalogApi>,
    catalog_id: Option<Arc<str>>,
}

impl PartitionScanner {
    pub fn new(api: Arc<dyn CatalogApi>, catalog_id: Option<Arc<str>>) -> Self {
        Self { api, catalog_id }
    }

    /// Collect up to `budget` partitions of `segment`, or of the whole table when `segment` is
    /// `None`.
    pub async fn scan(
        &self,
        query: &PartitionQuery,
        segment: Option<Segment>,
        budget: Budget,
    ) -> Result<Vec<Partition>, ServiceError> {
        let (partitions, pages) = collect_pages(budget, |next_token| {
            self.api.get_partitions(GetPartitionsRequest {
                catalog_id: self.catalog_id.as_deref().map(str::to_owned),
                database_name: query.database.clone(),
                table_name: query.table.clone(),
                expression: query.expression.clone(),
                segment,
                next_token,
            })
        })
        .await?;

        debug!(
            database = %query.database,
            table = %query.table,
            segment = ?segment.map(|s| s.index()),
            pages,
            partitions = partitions.len(),
            "scanned partitions"
        );

        Ok(partitions)
    }
}
