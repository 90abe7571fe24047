//! The remote catalog API consumed by the client.
//!
//! Implementations issue exactly one request per call. Retries, authentication and the wire
//! format all live behind this trait.

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    model::{
        Database, DatabaseInput, Partition, PartitionError, PartitionInput, PartitionKey, Table,
        TableInput, UserDefinedFunction, UserDefinedFunctionInput,
    },
    segment::Segment,
};

/// Maximum number of keys the catalog accepts in one batch partition lookup.
pub const BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE: usize = 1000;

/// Opaque continuation cursor handed out by a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a paginated listing. A missing `next_token` marks the end of the data.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<PageToken>,
}

/// A single partition listing request against a table, or one segment of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetPartitionsRequest {
    pub catalog_id: Option<String>,
    pub database_name: String,
    pub table_name: String,
    pub expression: Option<String>,
    pub segment: Option<Segment>,
    pub next_token: Option<PageToken>,
}

/// The partitions found by a batch lookup alongside the keys that could not be served.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetPartitionOutput {
    pub partitions: Vec<Partition>,
    pub errors: Vec<PartitionError>,
}

impl BatchGetPartitionOutput {
    pub(crate) fn extend(&mut self, other: Self) {
        self.partitions.extend(other.partitions);
        self.errors.extend(other.errors);
    }
}

/// Requests understood by the remote catalog service.
#[async_trait]
pub trait CatalogApi: std::fmt::Debug + Send + Sync + 'static {
    async fn create_database(
        &self,
        catalog_id: Option<&str>,
        input: DatabaseInput,
    ) -> Result<(), ServiceError>;

    async fn get_database(
        &self,
        catalog_id: Option<&str>,
        name: &str,
    ) -> Result<Database, ServiceError>;

    async fn get_databases(
        &self,
        catalog_id: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<Database>, ServiceError>;

    async fn update_database(
        &self,
        catalog_id: Option<&str>,
        name: &str,
        input: DatabaseInput,
    ) -> Result<(), ServiceError>;

    async fn delete_database(&self, catalog_id: Option<&str>, name: &str)
    -> Result<(), ServiceError>;

    async fn create_table(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        input: TableInput,
    ) -> Result<(), ServiceError>;

    async fn get_table(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<Table, ServiceError>;

    /// List tables whose name matches `pattern`, or all tables when no pattern is given.
    async fn get_tables(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        pattern: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<Table>, ServiceError>;

    async fn update_table(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        input: TableInput,
    ) -> Result<(), ServiceError>;

    async fn delete_table(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<(), ServiceError>;

    async fn get_partition(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<Partition, ServiceError>;

    /// Fetch one page of partitions.
    async fn get_partitions(
        &self,
        request: GetPartitionsRequest,
    ) -> Result<Page<Partition>, ServiceError>;

    /// Look up at most [`BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE`] partitions by key.
    async fn batch_get_partition(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        table: &str,
        keys: Vec<PartitionKey>,
    ) -> Result<BatchGetPartitionOutput, ServiceError>;

    /// Create partitions, reporting the inputs that were rejected.
    async fn batch_create_partition(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        table: &str,
        inputs: Vec<PartitionInput>,
    ) -> Result<Vec<PartitionError>, ServiceError>;

    async fn update_partition(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
        input: PartitionInput,
    ) -> Result<(), ServiceError>;

    async fn delete_partition(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<(), ServiceError>;

    async fn create_user_defined_function(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<(), ServiceError>;

    async fn get_user_defined_function(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<UserDefinedFunction, ServiceError>;

    async fn get_user_defined_functions(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        pattern: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<UserDefinedFunction>, ServiceError>;

    async fn update_user_defined_function(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        name: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<(), ServiceError>;

    async fn delete_user_defined_function(
        &self,
        catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<(), ServiceError>;
}
