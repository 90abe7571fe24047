//! An in-memory implementation of the [`CatalogApi`]. It can be used for testing or for running
//! the client without a remote catalog service.
//!
//! Partitions of a table are kept in insertion order. When a listing is segmented, partition `i`
//! belongs to segment `i % total`, which keeps segments disjoint and collectively exhaustive.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use crate::{
    api::{
        BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE, BatchGetPartitionOutput, CatalogApi,
        GetPartitionsRequest, Page, PageToken,
    },
    error::ServiceError,
    model::{
        Database, DatabaseInput, Partition, PartitionError, PartitionInput, PartitionKey, Table,
        TableInput, UserDefinedFunction, UserDefinedFunctionInput,
    },
};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Misbehaviour injected into requests served by a [`MemCatalogApi`].
#[derive(Debug, Clone)]
pub enum Fault {
    /// Every request fails.
    Fail(ServiceError),
    /// The given number of requests succeed, every later one fails.
    FailAfter(usize, ServiceError),
    /// Requests are served after a delay.
    Delay(Duration),
    /// The request panics with the given message.
    Panic(&'static str),
}

#[derive(Debug, Default)]
struct MemCollections {
    databases: BTreeMap<String, Database>,
    tables: BTreeMap<(String, String), Table>,
    partitions: BTreeMap<(String, String), Vec<Partition>>,
    functions: BTreeMap<(String, String), UserDefinedFunction>,
}

impl MemCollections {
    fn require_database(&self, database: &str) -> Result<(), ServiceError> {
        if self.databases.contains_key(database) {
            Ok(())
        } else {
            Err(ServiceError::entity_not_found(format!(
                "database {database} not found"
            )))
        }
    }

    fn table_key(&self, database: &str, table: &str) -> Result<(String, String), ServiceError> {
        let key = (database.to_owned(), table.to_owned());
        if self.tables.contains_key(&key) {
            Ok(key)
        } else {
            Err(ServiceError::entity_not_found(format!(
                "table {database}.{table} not found"
            )))
        }
    }

    fn partitions(&self, database: &str, table: &str) -> Result<&[Partition], ServiceError> {
        let key = self.table_key(database, table)?;
        Ok(self.partitions.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    fn partitions_mut(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<&mut Vec<Partition>, ServiceError> {
        let key = self.table_key(database, table)?;
        Ok(self.partitions.entry(key).or_default())
    }

    fn drop_table(&mut self, key: &(String, String)) {
        self.tables.remove(key);
        self.partitions.remove(key);
    }
}

#[derive(Debug, Default)]
struct FaultState {
    segments: HashMap<u32, Fault>,
    serial: Option<Fault>,
    batch: Option<Fault>,
    segment_requests: HashMap<u32, usize>,
    serial_requests: usize,
    batch_requests: usize,
}

/// In-memory catalog with request accounting and fault injection.
#[derive(Debug)]
pub struct MemCatalogApi {
    page_size: usize,
    collections: Mutex<MemCollections>,
    faults: Mutex<FaultState>,
    page_requests: AtomicUsize,
    batch_request_sizes: Mutex<Vec<usize>>,
    last_get_partitions: Mutex<Option<GetPartitionsRequest>>,
}

impl Default for MemCatalogApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemCatalogApi {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            collections: Default::default(),
            faults: Default::default(),
            page_requests: AtomicUsize::new(0),
            batch_request_sizes: Default::default(),
            last_get_partitions: Default::default(),
        }
    }

    /// Serve listings in pages of `page_size` items.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create `count` partitions with values `["p00000"]`, `["p00001"]`, ... in `database.table`,
    /// creating the database and table if needed.
    pub fn seed_partitions(&self, database: &str, table: &str, count: usize) {
        let mut collections = self.collections.lock();
        collections
            .databases
            .entry(database.to_owned())
            .or_insert_with(|| Database {
                name: database.to_owned(),
                ..Default::default()
            });
        let key = (database.to_owned(), table.to_owned());
        collections
            .tables
            .entry(key.clone())
            .or_insert_with(|| Table {
                database_name: database.to_owned(),
                name: table.to_owned(),
                ..Default::default()
            });
        let partitions = collections.partitions.entry(key).or_default();
        let start = partitions.len();
        partitions.extend((start..start + count).map(|i| Partition {
            database_name: database.to_owned(),
            table_name: table.to_owned(),
            values: vec![format!("p{i:05}")],
            ..Default::default()
        }));
    }

    /// Apply `fault` to every partition page request for the segment with this index.
    pub fn inject_segment_fault(&self, segment_index: u32, fault: Fault) {
        self.faults.lock().segments.insert(segment_index, fault);
    }

    /// Apply `fault` to every unsegmented partition page request.
    pub fn inject_serial_fault(&self, fault: Fault) {
        self.faults.lock().serial = Some(fault);
    }

    /// Apply `fault` to every batch partition lookup.
    pub fn inject_batch_fault(&self, fault: Fault) {
        self.faults.lock().batch = Some(fault);
    }

    /// Number of partition page requests received, including failed ones.
    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Key count of every batch lookup received, in arrival order.
    pub fn batch_request_sizes(&self) -> Vec<usize> {
        self.batch_request_sizes.lock().clone()
    }

    pub fn last_get_partitions_request(&self) -> Option<GetPartitionsRequest> {
        self.last_get_partitions.lock().clone()
    }

    fn segment_fault(&self, segment_index: u32) -> Option<(Fault, usize)> {
        let mut faults = self.faults.lock();
        let served = faults.segment_requests.entry(segment_index).or_default();
        let seen = *served;
        *served += 1;
        faults.segments.get(&segment_index).cloned().map(|f| (f, seen))
    }

    fn serial_fault(&self) -> Option<(Fault, usize)> {
        let mut faults = self.faults.lock();
        let seen = faults.serial_requests;
        faults.serial_requests += 1;
        faults.serial.clone().map(|f| (f, seen))
    }

    fn batch_fault(&self) -> Option<(Fault, usize)> {
        let mut faults = self.faults.lock();
        let seen = faults.batch_requests;
        faults.batch_requests += 1;
        faults.batch.clone().map(|f| (f, seen))
    }

    fn page<T: Clone>(
        &self,
        items: &[T],
        token: Option<PageToken>,
    ) -> Result<Page<T>, ServiceError> {
        let start = match token {
            None => 0,
            Some(token) => token.as_str().parse::<usize>().map_err(|e| {
                ServiceError::invalid_input(format!("invalid continuation token {token}"))
                    .with_source(e)
            })?,
        };
        let end = start.saturating_add(self.page_size).min(items.len());
        let page = items.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < items.len()).then(|| PageToken::new(end.to_string()));
        Ok(Page {
            items: page,
            next_token,
        })
    }
}

async fn apply_fault(fault: Option<(Fault, usize)>) -> Result<(), ServiceError> {
    match fault {
        None => Ok(()),
        Some((Fault::Fail(e), _)) => Err(e),
        Some((Fault::FailAfter(n, e), seen)) if seen >= n => Err(e),
        Some((Fault::FailAfter(..), _)) => Ok(()),
        Some((Fault::Delay(d), _)) => {
            tokio::time::sleep(d).await;
            Ok(())
        }
        Some((Fault::Panic(msg), _)) => panic!("{msg}"),
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, ServiceError> {
    pattern
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                ServiceError::invalid_input(format!("invalid name pattern {p}")).with_source(e)
            })
        })
        .transpose()
}

fn matches(pattern: &Option<Regex>, name: &str) -> bool {
    pattern.as_ref().is_none_or(|re| re.is_match(name))
}

#[async_trait]
impl CatalogApi for MemCatalogApi {
    async fn create_database(
        &self,
        catalog_id: Option<&str>,
        input: DatabaseInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        if collections.databases.contains_key(&input.name) {
            return Err(ServiceError::already_exists(format!(
                "database {} already exists",
                input.name
            )));
        }
        collections.databases.insert(
            input.name.clone(),
            Database {
                catalog_id: catalog_id.map(str::to_owned),
                name: input.name,
                description: input.description,
                location_uri: input.location_uri,
                parameters: input.parameters,
            },
        );
        Ok(())
    }

    async fn get_database(
        &self,
        _catalog_id: Option<&str>,
        name: &str,
    ) -> Result<Database, ServiceError> {
        self.collections
            .lock()
            .databases
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::entity_not_found(format!("database {name} not found")))
    }

    async fn get_databases(
        &self,
        _catalog_id: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<Database>, ServiceError> {
        let databases: Vec<_> = self.collections.lock().databases.values().cloned().collect();
        self.page(&databases, next_token)
    }

    async fn update_database(
        &self,
        _catalog_id: Option<&str>,
        name: &str,
        input: DatabaseInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        let existing = collections
            .databases
            .remove(name)
            .ok_or_else(|| ServiceError::entity_not_found(format!("database {name} not found")))?;
        collections.databases.insert(
            input.name.clone(),
            Database {
                catalog_id: existing.catalog_id,
                name: input.name,
                description: input.description,
                location_uri: input.location_uri,
                parameters: input.parameters,
            },
        );
        Ok(())
    }

    async fn delete_database(
        &self,
        _catalog_id: Option<&str>,
        name: &str,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        collections
            .databases
            .remove(name)
            .ok_or_else(|| ServiceError::entity_not_found(format!("database {name} not found")))?;
        let tables: Vec<_> = collections
            .tables
            .keys()
            .filter(|(db, _)| db == name)
            .cloned()
            .collect();
        for key in &tables {
            collections.drop_table(key);
        }
        collections.functions.retain(|(db, _), _| db != name);
        Ok(())
    }

    async fn create_table(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        input: TableInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        collections.require_database(database)?;
        let key = (database.to_owned(), input.name.clone());
        if collections.tables.contains_key(&key) {
            return Err(ServiceError::already_exists(format!(
                "table {database}.{} already exists",
                input.name
            )));
        }
        collections.tables.insert(key, table_from_input(database, input));
        Ok(())
    }

    async fn get_table(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<Table, ServiceError> {
        let collections = self.collections.lock();
        let key = collections.table_key(database, name)?;
        Ok(collections.tables[&key].clone())
    }

    async fn get_tables(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        pattern: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<Table>, ServiceError> {
        let pattern = compile_pattern(pattern)?;
        let tables: Vec<_> = {
            let collections = self.collections.lock();
            collections.require_database(database)?;
            collections
                .tables
                .values()
                .filter(|t| t.database_name == database && matches(&pattern, &t.name))
                .cloned()
                .collect()
        };
        self.page(&tables, next_token)
    }

    async fn update_table(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        input: TableInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        let key = collections.table_key(database, &input.name)?;
        collections.tables.insert(key, table_from_input(database, input));
        Ok(())
    }

    async fn delete_table(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        let key = collections.table_key(database, name)?;
        collections.drop_table(&key);
        Ok(())
    }

    async fn get_partition(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<Partition, ServiceError> {
        let collections = self.collections.lock();
        collections
            .partitions(database, table)?
            .iter()
            .find(|p| p.values == key.values())
            .cloned()
            .ok_or_else(|| {
                ServiceError::entity_not_found(format!(
                    "partition {key} of {database}.{table} not found"
                ))
            })
    }

    async fn get_partitions(
        &self,
        request: GetPartitionsRequest,
    ) -> Result<Page<Partition>, ServiceError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        *self.last_get_partitions.lock() = Some(request.clone());

        let fault = match request.segment {
            Some(segment) => self.segment_fault(segment.index()),
            None => self.serial_fault(),
        };
        apply_fault(fault).await?;

        let partitions: Vec<_> = {
            let collections = self.collections.lock();
            let all = collections.partitions(&request.database_name, &request.table_name)?;
            match request.segment {
                None => all.to_vec(),
                Some(segment) => {
                    let total = segment.total() as usize;
                    let index = segment.index() as usize;
                    all.iter()
                        .enumerate()
                        .filter(|(i, _)| i % total == index)
                        .map(|(_, p)| p.clone())
                        .collect()
                }
            }
        };

        self.page(&partitions, request.next_token)
    }

    async fn batch_get_partition(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        table: &str,
        keys: Vec<PartitionKey>,
    ) -> Result<BatchGetPartitionOutput, ServiceError> {
        self.batch_request_sizes.lock().push(keys.len());
        if keys.len() > BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE {
            return Err(ServiceError::invalid_input(format!(
                "batch of {} keys exceeds the limit of {BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE}",
                keys.len()
            )));
        }

        let fault = self.batch_fault();
        apply_fault(fault).await?;

        let collections = self.collections.lock();
        let existing = collections.partitions(database, table)?;
        let mut output = BatchGetPartitionOutput::default();
        for key in keys {
            match existing.iter().find(|p| p.values == key.values()) {
                Some(p) => output.partitions.push(p.clone()),
                None => {
                    let cause = ServiceError::entity_not_found(format!(
                        "partition {key} of {database}.{table} not found"
                    ));
                    output.errors.push(PartitionError { key, cause });
                }
            }
        }
        Ok(output)
    }

    async fn batch_create_partition(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        table: &str,
        inputs: Vec<PartitionInput>,
    ) -> Result<Vec<PartitionError>, ServiceError> {
        let mut collections = self.collections.lock();
        let partitions = collections.partitions_mut(database, table)?;
        let mut errors = vec![];
        for input in inputs {
            if partitions.iter().any(|p| p.values == input.values) {
                let key = input.key();
                let cause = ServiceError::already_exists(format!("partition {key} already exists"));
                errors.push(PartitionError { key, cause });
                continue;
            }
            partitions.push(Partition {
                database_name: database.to_owned(),
                table_name: table.to_owned(),
                values: input.values,
                storage: input.storage,
                parameters: input.parameters,
            });
        }
        Ok(errors)
    }

    async fn update_partition(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
        input: PartitionInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        let partition = collections
            .partitions_mut(database, table)?
            .iter_mut()
            .find(|p| p.values == key.values())
            .ok_or_else(|| ServiceError::entity_not_found(format!("partition {key} not found")))?;
        partition.values = input.values;
        partition.storage = input.storage;
        partition.parameters = input.parameters;
        Ok(())
    }

    async fn delete_partition(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        table: &str,
        key: &PartitionKey,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        let partitions = collections.partitions_mut(database, table)?;
        let before = partitions.len();
        partitions.retain(|p| p.values != key.values());
        if partitions.len() == before {
            return Err(ServiceError::entity_not_found(format!(
                "partition {key} not found"
            )));
        }
        Ok(())
    }

    async fn create_user_defined_function(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        collections.require_database(database)?;
        let key = (database.to_owned(), input.name.clone());
        if collections.functions.contains_key(&key) {
            return Err(ServiceError::already_exists(format!(
                "function {database}.{} already exists",
                input.name
            )));
        }
        collections
            .functions
            .insert(key, function_from_input(database, input));
        Ok(())
    }

    async fn get_user_defined_function(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<UserDefinedFunction, ServiceError> {
        self.collections
            .lock()
            .functions
            .get(&(database.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| {
                ServiceError::entity_not_found(format!("function {database}.{name} not found"))
            })
    }

    async fn get_user_defined_functions(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        pattern: Option<&str>,
        next_token: Option<PageToken>,
    ) -> Result<Page<UserDefinedFunction>, ServiceError> {
        let pattern = compile_pattern(pattern)?;
        let functions: Vec<_> = {
            let collections = self.collections.lock();
            collections.require_database(database)?;
            collections
                .functions
                .values()
                .filter(|f| f.database_name == database && matches(&pattern, &f.name))
                .cloned()
                .collect()
        };
        self.page(&functions, next_token)
    }

    async fn update_user_defined_function(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        name: &str,
        input: UserDefinedFunctionInput,
    ) -> Result<(), ServiceError> {
        let mut collections = self.collections.lock();
        collections
            .functions
            .remove(&(database.to_owned(), name.to_owned()))
            .ok_or_else(|| {
                ServiceError::entity_not_found(format!("function {database}.{name} not found"))
            })?;
        collections.functions.insert(
            (database.to_owned(), input.name.clone()),
            function_from_input(database, input),
        );
        Ok(())
    }

    async fn delete_user_defined_function(
        &self,
        _catalog_id: Option<&str>,
        database: &str,
        name: &str,
    ) -> Result<(), ServiceError> {
        self.collections
            .lock()
            .functions
            .remove(&(database.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| {
                ServiceError::entity_not_found(format!("function {database}.{name} not found"))
            })
    }
}

fn table_from_input(database: &str, input: TableInput) -> Table {
    Table {
        database_name: database.to_owned(),
        name: input.name,
        owner: input.owner,
        table_type: input.table_type,
        partition_keys: input.partition_keys,
        storage: input.storage,
        parameters: input.parameters,
    }
}

fn function_from_input(database: &str, input: UserDefinedFunctionInput) -> UserDefinedFunction {
    UserDefinedFunction {
        database_name: database.to_owned(),
        name: input.name,
        class_name: input.class_name,
        owner: input.owner,
        resource_uris: input.resource_uris,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ServiceErrorKind, segment::Segment};

    fn request(segment: Option<Segment>, next_token: Option<PageToken>) -> GetPartitionsRequest {
        GetPartitionsRequest {
            database_name: "db".into(),
            table_name: "t".into(),
            segment,
            next_token,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pages_hand_out_tokens_until_exhausted() {
        let api = MemCatalogApi::new().with_page_size(4);
        api.seed_partitions("db", "t", 10);

        let first = api.get_partitions(request(None, None)).await.unwrap();
        assert_eq!(first.items.len(), 4);
        let second = api
            .get_partitions(request(None, first.next_token))
            .await
            .unwrap();
        assert_eq!(second.items[0].values, vec!["p00004".to_string()]);
        let third = api
            .get_partitions(request(None, second.next_token))
            .await
            .unwrap();
        assert_eq!(third.items.len(), 2);
        assert_eq!(third.next_token, None);
        assert_eq!(api.page_requests(), 3);
    }

    #[tokio::test]
    async fn segments_partition_the_table() {
        let api = MemCatalogApi::new();
        api.seed_partitions("db", "t", 10);

        let mut seen = vec![];
        for index in 0..3 {
            let segment = Segment::try_new(index, 3).unwrap();
            let page = api.get_partitions(request(Some(segment), None)).await.unwrap();
            seen.extend(page.items.into_iter().map(|p| p.values[0].clone()));
        }
        seen.sort();
        let expected: Vec<_> = (0..10).map(|i| format!("p{i:05}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn invalid_token_rejected() {
        let api = MemCatalogApi::new();
        api.seed_partitions("db", "t", 1);
        let err = api
            .get_partitions(request(None, Some(PageToken::new("bogus"))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn unknown_table_not_found() {
        let api = MemCatalogApi::new();
        let err = api.get_partitions(request(None, None)).await.unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::EntityNotFound);
    }

    #[tokio::test]
    async fn oversized_batch_rejected() {
        let api = MemCatalogApi::new();
        api.seed_partitions("db", "t", 1);
        let keys = vec![PartitionKey::new(["p00000"]); BATCH_GET_PARTITIONS_MAX_REQUEST_SIZE + 1];
        let err = api
            .batch_get_partition(None, "db", "t", keys)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::InvalidInput);
        assert_eq!(api.batch_request_sizes(), vec![1001]);
    }

    #[tokio::test]
    async fn fail_after_counts_per_segment() {
        let api = MemCatalogApi::new().with_page_size(1);
        api.seed_partitions("db", "t", 4);
        api.inject_segment_fault(
            1,
            Fault::FailAfter(1, ServiceError::new(ServiceErrorKind::Internal, "boom")),
        );

        let seg0 = Segment::try_new(0, 2).unwrap();
        let seg1 = Segment::try_new(1, 2).unwrap();
        let page = api.get_partitions(request(Some(seg1), None)).await.unwrap();
        api.get_partitions(request(Some(seg0), None)).await.unwrap();
        api.get_partitions(request(Some(seg0), None)).await.unwrap();
        let err = api
            .get_partitions(request(Some(seg1), page.next_token))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "boom");
    }
}
