//! Catalog entities exchanged with the remote service.
//!
//! These are passed through the client unchanged; the client never inspects anything beyond a
//! partition's values.

use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub catalog_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub location_uri: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInput {
    pub name: String,
    pub description: Option<String>,
    pub location_uri: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub comment: Option<String>,
}

/// Physical layout of a table or partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub location: Option<String>,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub database_name: String,
    pub name: String,
    pub owner: Option<String>,
    pub table_type: Option<String>,
    pub partition_keys: Vec<Column>,
    pub storage: Option<StorageDescriptor>,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInput {
    pub name: String,
    pub owner: Option<String>,
    pub table_type: Option<String>,
    pub partition_keys: Vec<Column>,
    pub storage: Option<StorageDescriptor>,
    pub parameters: BTreeMap<String, String>,
}

/// The ordered partition column values that identify one partition of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Vec<String>);

impl PartitionKey {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for PartitionKey {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub database_name: String,
    pub table_name: String,
    pub values: Vec<String>,
    pub storage: Option<StorageDescriptor>,
    pub parameters: BTreeMap<String, String>,
}

impl Partition {
    pub fn key(&self) -> PartitionKey {
        PartitionKey(self.values.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInput {
    pub values: Vec<String>,
    pub storage: Option<StorageDescriptor>,
    pub parameters: BTreeMap<String, String>,
}

impl PartitionInput {
    pub fn key(&self) -> PartitionKey {
        PartitionKey(self.values.clone())
    }
}

/// A single failed entry of a batch partition request.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionError {
    pub key: PartitionKey,
    pub cause: ServiceError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefinedFunction {
    pub database_name: String,
    pub name: String,
    pub class_name: String,
    pub owner: Option<String>,
    pub resource_uris: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDefinedFunctionInput {
    pub name: String,
    pub class_name: String,
    pub owner: Option<String>,
    pub resource_uris: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_display_and_serde() {
        let key = PartitionKey::new(["2024", "01", "us-east"]);
        assert_eq!(key.to_string(), "2024/01/us-east");
        assert_eq!(
            serde_json::to_string(&key).unwrap(),
            r#"["2024","01","us-east"]"#
        );
    }

    #[test]
    fn partition_key_matches_values() {
        let partition = Partition {
            database_name: "db".into(),
            table_name: "t".into(),
            values: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        assert_eq!(partition.key(), PartitionKey::new(["a", "b"]));
    }
}
