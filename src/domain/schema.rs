//! Canonical tenant schema description
//!
//! A [`CanonicalSchema`] is the static, versioned shape every tenant store must
//! have. It is only ever compared against a store's catalog and rendered into
//! idempotent DDL (`CREATE ... IF NOT EXISTS`); it never changes at runtime.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// SQL dialect spoken by a tenant store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${index}"),
            SqlDialect::Sqlite => "?".to_string(),
        }
    }
}

/// Errors raised while building a canonical schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("duplicate relation: {0}")]
    DuplicateRelation(String),

    #[error("duplicate index: {0}")]
    DuplicateIndex(String),

    #[error("relation {relation} references unknown relation {target}")]
    UnknownDependency { relation: String, target: String },

    #[error("index {index} references unknown column {column} on {relation}")]
    UnknownIndexColumn {
        relation: String,
        index: String,
        column: String,
    },

    #[error("dependency cycle among relations: {0:?}")]
    DependencyCycle(Vec<String>),
}

/// Portable column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Auto-incrementing integer primary key
    Id,
    Text,
    BigInt,
    Numeric,
    Boolean,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Type name used to cast bound parameters in Postgres.
    pub fn pg_cast(&self) -> &'static str {
        match self {
            ColumnType::Id | ColumnType::BigInt => "BIGINT",
            ColumnType::Text => "TEXT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::Json => "JSONB",
        }
    }

    fn render(&self, dialect: SqlDialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Id, SqlDialect::Postgres) => "BIGSERIAL PRIMARY KEY",
            (ColumnType::Id, SqlDialect::Sqlite) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::BigInt, SqlDialect::Postgres) => "BIGINT",
            (ColumnType::BigInt, SqlDialect::Sqlite) => "INTEGER",
            (ColumnType::Numeric, SqlDialect::Postgres) => "NUMERIC(18,4)",
            (ColumnType::Numeric, SqlDialect::Sqlite) => "NUMERIC",
            (ColumnType::Boolean, SqlDialect::Postgres) => "BOOLEAN",
            (ColumnType::Boolean, SqlDialect::Sqlite) => "INTEGER",
            (ColumnType::Timestamp, SqlDialect::Postgres) => "TIMESTAMPTZ",
            (ColumnType::Timestamp, SqlDialect::Sqlite) => "TEXT",
            (ColumnType::Json, SqlDialect::Postgres) => "JSONB",
            (ColumnType::Json, SqlDialect::Sqlite) => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Foreign key target relation (always its `id` column)
    pub references: Option<String>,
    pub default_now: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            references: None,
            default_now: false,
        }
    }

    /// `id` primary key column.
    pub fn id() -> Self {
        Self::new("id", ColumnType::Id).not_null()
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn references(mut self, relation: impl Into<String>) -> Self {
        self.references = Some(relation.into());
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default_now = true;
        self
    }

    fn render(&self, dialect: SqlDialect) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.render(dialect));
        if !self.nullable && self.column_type != ColumnType::Id {
            sql.push_str(" NOT NULL");
        }
        if self.default_now {
            sql.push_str(match dialect {
                SqlDialect::Postgres => " DEFAULT now()",
                SqlDialect::Sqlite => " DEFAULT CURRENT_TIMESTAMP",
            });
        }
        if let Some(target) = &self.references {
            sql.push_str(&format!(" REFERENCES {target}(id)"));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One required relation (table) with its columns and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl RelationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_spec(name).is_some()
    }

    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Relations this one references through foreign keys (self-references excluded).
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref())
            .filter(|target| *target != self.name)
            .collect()
    }

    pub fn create_table_sql(&self, dialect: SqlDialect) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| c.render(dialect)).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            columns.join(", ")
        )
    }

    pub fn create_index_sql(index: &IndexSpec, relation: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            relation,
            index.columns.join(", ")
        )
    }
}

/// Validated, dependency-ordered set of required relations.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalSchema {
    version: u32,
    /// Relations in deterministic apply order
    relations: Vec<RelationSpec>,
}

impl CanonicalSchema {
    /// Validate and order `relations`.
    ///
    /// Order is topological over foreign keys; among relations whose
    /// dependencies are satisfied the earliest declared goes first.
    pub fn new(version: u32, relations: Vec<RelationSpec>) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        let mut index_names = HashSet::new();
        for relation in &relations {
            validate_identifier(&relation.name)?;
            if !names.insert(relation.name.as_str()) {
                return Err(SchemaError::DuplicateRelation(relation.name.clone()));
            }
            for column in &relation.columns {
                validate_identifier(&column.name)?;
            }
            for index in &relation.indexes {
                validate_identifier(&index.name)?;
                if !index_names.insert(index.name.as_str()) {
                    return Err(SchemaError::DuplicateIndex(index.name.clone()));
                }
                if let Some(column) = index.columns.iter().find(|c| !relation.has_column(c)) {
                    return Err(SchemaError::UnknownIndexColumn {
                        relation: relation.name.clone(),
                        index: index.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }
        for relation in &relations {
            if let Some(target) = relation
                .dependencies()
                .into_iter()
                .find(|target| !names.contains(target))
            {
                return Err(SchemaError::UnknownDependency {
                    relation: relation.name.clone(),
                    target: target.to_string(),
                });
            }
        }

        let ordered = dependency_order(relations)?;
        Ok(Self {
            version,
            relations: ordered,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Relations in apply order.
    pub fn ordered(&self) -> &[RelationSpec] {
        &self.relations
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relation_names(&self) -> BTreeSet<String> {
        self.relations.iter().map(|r| r.name.clone()).collect()
    }

    pub fn index_names(&self) -> BTreeSet<String> {
        self.relations
            .iter()
            .flat_map(|r| r.indexes.iter().map(|i| i.name.clone()))
            .collect()
    }
}

fn dependency_order(relations: Vec<RelationSpec>) -> Result<Vec<RelationSpec>, SchemaError> {
    let deps: Vec<BTreeSet<String>> = relations
        .iter()
        .map(|r| r.dependencies().into_iter().map(str::to_string).collect())
        .collect();

    let mut placed: HashSet<String> = HashSet::new();
    let mut order: Vec<usize> = Vec::with_capacity(relations.len());
    let mut remaining: Vec<usize> = (0..relations.len()).collect();

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|&i| deps[i].iter().all(|d| placed.contains(d)));
        match next {
            Some(pos) => {
                let idx = remaining.remove(pos);
                placed.insert(relations[idx].name.clone());
                order.push(idx);
            }
            None => {
                let cycle = remaining.iter().map(|&i| relations[i].name.clone()).collect();
                return Err(SchemaError::DependencyCycle(cycle));
            }
        }
    }

    let mut slots: HashMap<usize, RelationSpec> = relations.into_iter().enumerate().collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| slots.remove(&idx))
        .collect())
}

/// Lowercase SQL identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes.
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}
