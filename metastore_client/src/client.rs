use std::sync::Arc;

use metastore_clap_blocks::partition::PartitionFetchConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    api::{BatchGetPartitionOutput, CatalogApi},
    batch::{TableRef, fetch_by_keys},
    error::Result,
    model::{
        Database, DatabaseInput, Partition, PartitionError, PartitionInput, PartitionKey, Table,
        TableInput, UserDefinedFunction, UserDefinedFunctionInput,
    },
    parallel::fetch_parallel,
    pool::{WorkerPool, executor_factory},
    scan::{PartitionQuery, PartitionScanner, collect_pages},
    segment::{Budget, ScanMode, SegmentPlanner},
};

/// Client for a remote metadata catalog.
///
/// Cloning is cheap and clones share the worker pool, so one client can serve many concurrent
/// callers.
#[derive(Debug, Clone)]
pub struct MetastoreClient {
    api: Arc<dyn CatalogApi>,
    catalog_id: Option<Arc<str>>,
    planner: SegmentPlanner,
    pool: WorkerPool,
    shutdown: CancellationToken,
}

impl MetastoreClient {
    /// Create a new [`MetastoreClient`]
    ///
    /// Fails if `segment_count` is zero or above the catalog's segment limit.
    pub fn new(api: Arc<dyn CatalogApi>, pool: WorkerPool, segment_count: usize) -> Result<Self> {
        Ok(Self {
            api,
            catalog_id: None,
            planner: SegmentPlanner::try_new(segment_count)?,
            pool,
            shutdown: CancellationToken::new(),
        })
    }

    /// Create a client from CLI configuration, building its worker pool with the configured
    /// [`ExecutorFactory`](crate::pool::ExecutorFactory).
    pub fn from_config(api: Arc<dyn CatalogApi>, config: &PartitionFetchConfig) -> Result<Self> {
        // validate before paying for a runtime
        let planner = SegmentPlanner::try_new(config.num_segments)?;
        let pool = executor_factory(config).worker_pool()?;
        let mut client = Self::new(api, pool, planner.segment_count())?;
        if let Some(catalog_id) = &config.catalog_id {
            client = client.with_catalog_id(catalog_id.as_str());
        }
        Ok(client)
    }

    /// Attach `catalog_id` to every request.
    pub fn with_catalog_id(mut self, catalog_id: impl Into<Arc<str>>) -> Self {
        self.catalog_id = Some(catalog_id.into());
        self
    }

    /// Fail waits on the worker pool with [`Error::Interrupted`](crate::Error::Interrupted) once
    /// `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn catalog_id(&self) -> Option<&str> {
        self.catalog_id.as_deref()
    }

    fn scanner(&self) -> PartitionScanner {
        PartitionScanner::new(Arc::clone(&self.api), self.catalog_id.clone())
    }

    fn table_ref(&self, database: &str, table: &str) -> TableRef {
        TableRef {
            catalog_id: self.catalog_id.clone(),
            database: Arc::from(database),
            table: Arc::from(table),
        }
    }

    // ======================= Partition =======================

    /// List up to `max` partitions of `database.table` matching `expression`.
    ///
    /// A `max` of zero or below lists every partition. Large and unbounded listings are split
    /// into segments scanned concurrently; the result is ordered by segment, then by page. No
    /// other order is guaranteed.
    pub async fn list_partitions(
        &self,
        database: &str,
        table: &str,
        expression: Option<&str>,
        max: i64,
    ) -> Result<Vec<Partition>> {
        let query = PartitionQuery {
            database: database.to_owned(),
            table: table.to_owned(),
            expression: expression.map(str::to_owned),
            max_results: max,
        };
        self.list_partitions_for(query).await
    }

    /// [`list_partitions`](Self::list_partitions) for a prepared [`PartitionQuery`].
    pub async fn list_partitions_for(&self, query: PartitionQuery) -> Result<Vec<Partition>> {
        let budget = query.budget();
        let mode = self.planner.plan(budget);
        debug!(
            database = %query.database,
            table = %query.table,
            max = query.max_results,
            ?mode,
            "listing partitions"
        );

        match mode {
            ScanMode::Serial => Ok(self.scanner().scan(&query, None, budget).await?),
            ScanMode::Parallel(_) => {
                fetch_parallel(
                    &self.pool,
                    &self.scanner(),
                    Arc::new(query),
                    self.planner.segments(),
                    budget,
                    &self.shutdown,
                )
                .await
            }
        }
    }

    /// Fetch the partitions identified by `keys`.
    ///
    /// Keys the catalog does not serve are left out of the result. Fails if any batch request
    /// fails.
    pub async fn list_partitions_by_keys(
        &self,
        database: &str,
        table: &str,
        keys: Vec<PartitionKey>,
    ) -> Result<Vec<Partition>> {
        let BatchGetPartitionOutput { partitions, errors } = self
            .batch_get_partitions_with_errors(database, table, keys)
            .await?;
        if !errors.is_empty() {
            debug!(
                database,
                table,
                skipped = errors.len(),
                "partition keys not served by the catalog"
            );
        }
        Ok(partitions)
    }

    /// Fetch the partitions identified by `keys`, reporting keys that could not be served
    /// alongside the partitions that were found.
    pub async fn batch_get_partitions_with_errors(
        &self,
        database: &str,
        table: &str,
        keys: Vec<PartitionKey>,
    ) -> Result<BatchGetPartitionOutput> {
        fetch_by_keys(
            &self.pool,
            &self.api,
            &self.table_ref(database, table),
            keys,
            &self.shutdown,
        )
        .await
    }

    pub async fn get_partition(
        &self,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<Partition> {
        Ok(self
            .api
            .get_partition(self.catalog_id(), database, table, key)
            .await?)
    }

    /// Create partitions, returning the inputs the catalog rejected.
    pub async fn create_partitions(
        &self,
        database: &str,
        table: &str,
        inputs: Vec<PartitionInput>,
    ) -> Result<Vec<PartitionError>> {
        Ok(self
            .api
            .batch_create_partition(self.catalog_id(), database, table, inputs)
            .await?)
    }

    pub async fn update_partition(
        &self,
        database: &str,
        table: &str,
        key: &PartitionKey,
        input: PartitionInput,
    ) -> Result<()> {
        Ok(self
            .api
            .update_partition(self.catalog_id(), database, table, key, input)
            .await?)
    }

    pub async fn delete_partition(
        &self,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<()> {
        Ok(self
            .api
            .delete_partition(self.catalog_id(), database, table, key)
            .await?)
    }

    // ======================= Database =======================

    pub async fn create_database(&self, input: DatabaseInput) -> Result<()> {
        Ok(self.api.create_database(self.catalog_id(), input).await?)
    }

    pub async fn get_database(&self, name: &str) -> Result<Database> {
        Ok(self.api.get_database(self.catalog_id(), name).await?)
    }

    pub async fn get_all_databases(&self) -> Result<Vec<Database>> {
        let (databases, _) = collect_pages(Budget::Unbounded, |next_token| {
            self.api.get_databases(self.catalog_id(), next_token)
        })
        .await?;
        Ok(databases)
    }

    pub async fn update_database(&self, name: &str, input: DatabaseInput) -> Result<()> {
        Ok(self
            .api
            .update_database(self.catalog_id(), name, input)
            .await?)
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        Ok(self.api.delete_database(self.catalog_id(), name).await?)
    }

    // ======================== Table ========================

    pub async fn create_table(&self, database: &str, input: TableInput) -> Result<()> {
        Ok(self
            .api
            .create_table(self.catalog_id(), database, input)
            .await?)
    }

    pub async fn get_table(&self, database: &str, name: &str) -> Result<Table> {
        Ok(self.api.get_table(self.catalog_id(), database, name).await?)
    }

    /// List every table of `database` whose name matches `pattern`.
    pub async fn get_tables(&self, database: &str, pattern: Option<&str>) -> Result<Vec<Table>> {
        let (tables, _) = collect_pages(Budget::Unbounded, |next_token| {
            self.api
                .get_tables(self.catalog_id(), database, pattern, next_token)
        })
        .await?;
        Ok(tables)
    }

    pub async fn update_table(&self, database: &str, input: TableInput) -> Result<()> {
        Ok(self
            .api
            .update_table(self.catalog_id(), database, input)
            .await?)
    }

    pub async fn delete_table(&self, database: &str, name: &str) -> Result<()> {
        Ok(self
            .api
            .delete_table(self.catalog_id(), database, name)
            .await?)
    }

    // ====================== User Defined Function ======================

    pub async fn create_user_defined_function(
        &self,
        database: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<()> {
        Ok(self
            .api
            .create_user_defined_function(self.catalog_id(), database, input)
            .await?)
    }

    pub async fn get_user_defined_function(
        &self,
        database: &str,
        name: &str,
    ) -> Result<UserDefinedFunction> {
        Ok(self
            .api
            .get_user_defined_function(self.catalog_id(), database, name)
            .await?)
    }

    /// List every function of `database` whose name matches `pattern`.
    pub async fn get_user_defined_functions(
        &self,
        database: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<UserDefinedFunction>> {
        let (functions, _) = collect_pages(Budget::Unbounded, |next_token| {
            self.api
                .get_user_defined_functions(self.catalog_id(), database, pattern, next_token)
        })
        .await?;
        Ok(functions)
    }

    pub async fn update_user_defined_function(
        &self,
        database: &str,
        name: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<()> {
        Ok(self
            .api
            .update_user_defined_function(self.catalog_id(), database, name, input)
            .await?)
    }

    pub async fn delete_user_defined_function(&self, database: &str, name: &str) -> Result<()> {
        Ok(self
            .api
            .delete_user_defined_function(self.catalog_id(), database, name)
            .await?)
    }
}
