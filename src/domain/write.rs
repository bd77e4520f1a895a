//! Fast-ack write requests
//!
//! A [`WriteOperation`] is a single insert into one canonical relation as the
//! caller described it. [`WriteOperation::prepare`] checks it against the
//! canonical schema and yields a [`PreparedWrite`] carrying column types, so
//! every backend can bind values natively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::{validate_identifier, CanonicalSchema, ColumnType, SqlDialect};
use super::TenantId;

/// Bindable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WriteValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl From<serde_json::Value> for WriteValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => WriteValue::Null,
            serde_json::Value::Bool(b) => WriteValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => WriteValue::Integer(i),
                None => WriteValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => WriteValue::Text(s),
            other => WriteValue::Json(other),
        }
    }
}

/// Insert of one row into a canonical relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOperation {
    pub relation: String,
    pub values: Vec<(String, WriteValue)>,
}

impl WriteOperation {
    pub fn insert(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: WriteValue) -> Self {
        self.values.push((column.into(), value));
        self
    }

    /// Build from a JSON object of `column -> value`.
    pub fn from_json(
        relation: impl Into<String>,
        record: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            relation: relation.into(),
            values: record.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    /// Check the target relation and columns against the canonical schema.
    pub fn prepare(&self, schema: &CanonicalSchema) -> Result<PreparedWrite, String> {
        let relation = schema
            .relation(&self.relation)
            .ok_or_else(|| format!("unknown relation: {}", self.relation))?;
        if self.values.is_empty() {
            return Err("write has no values".to_string());
        }

        let mut columns = Vec::with_capacity(self.values.len());
        for (column, _) in &self.values {
            validate_identifier(column).map_err(|e| e.to_string())?;
            let spec = relation
                .column_spec(column)
                .ok_or_else(|| format!("unknown column {column} on {}", self.relation))?;
            if spec.column_type == ColumnType::Id {
                return Err(format!("{column} is assigned by the store"));
            }
            if columns.iter().any(|(c, _): &(String, ColumnType)| c == column) {
                return Err(format!("duplicate column {column}"));
            }
            columns.push((column.clone(), spec.column_type));
        }

        Ok(PreparedWrite {
            relation: relation.name.clone(),
            columns,
            values: self.values.iter().map(|(_, v)| v.clone()).collect(),
        })
    }
}

/// A schema-checked insert; `columns[i]` pairs with `values[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub relation: String,
    pub columns: Vec<(String, ColumnType)>,
    pub values: Vec<WriteValue>,
}

impl PreparedWrite {
    /// `INSERT` statement with dialect placeholders, in `values` order.
    ///
    /// Postgres placeholders carry an explicit cast to the column type so text
    /// and null parameters land in typed columns.
    pub fn insert_sql(&self, dialect: SqlDialect) -> String {
        let columns: Vec<&str> = self.columns.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, (_, ty))| match dialect {
                SqlDialect::Postgres => format!("{}::{}", dialect.placeholder(i + 1), ty.pg_cast()),
                SqlDialect::Sqlite => dialect.placeholder(i + 1),
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.relation,
            columns.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Submission to the fast-ack pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub tenant_id: TenantId,
    pub operation: WriteOperation,
}

/// Acknowledgment returned to the caller; says nothing about the write itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub task_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}
