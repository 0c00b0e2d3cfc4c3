//! Schema Description
//!
//! Structured view of a SQL Server catalog as handed to the prompt builder:
//! tables, columns, types and primary keys, plus the connection boundary types.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Schema assumed when a reference does not name one.
pub const DEFAULT_SCHEMA: &str = "dbo";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Wrap an identifier in brackets, escaping `]` as `]]`.
pub fn bracket(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

/// Target database name. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim().trim_start_matches('[').trim_end_matches(']').trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidRequest(
                "a target database name is required".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", alias = "dataType")]
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_primary_key: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default, alias = "fullName")]
    pub fully_qualified_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn new(
        database: &DatabaseName,
        schema: impl Into<String>,
        name: impl Into<String>,
        default_schema: &str,
    ) -> Self {
        let mut table = Self {
            name: name.into(),
            schema: schema.into(),
            fully_qualified_name: String::new(),
            display_name: String::new(),
            columns: Vec::new(),
        };
        table.qualify(database, default_schema);
        table
    }

    pub fn with_column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    /// Recompute the derived names against `database`.
    fn qualify(&mut self, database: &DatabaseName, default_schema: &str) {
        if self.schema.trim().is_empty() {
            self.schema = default_schema.to_string();
        }
        self.fully_qualified_name = format!(
            "{}.{}.{}",
            bracket(database.as_str()),
            bracket(&self.schema),
            bracket(&self.name)
        );
        self.display_name = if self.schema.eq_ignore_ascii_case(default_schema) {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        };
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }
}

/// One flat row of catalog metadata, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumnRow {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescription {
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_schema")]
    pub default_schema: String,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
}

impl SchemaDescription {
    pub fn new(database: &DatabaseName) -> Self {
        Self {
            database: database.as_str().to_string(),
            default_schema: default_schema(),
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: TableInfo) -> Self {
        self.tables.push(table);
        self
    }

    /// Group catalog rows into tables, keeping first-seen table order and
    /// column order within each table.
    pub fn from_metadata_rows(database: &DatabaseName, rows: Vec<SchemaColumnRow>) -> Self {
        let default_schema = pick_default_schema(&rows);
        let mut tables: Vec<TableInfo> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();

        for row in rows {
            let key = (row.schema.clone(), row.table.clone());
            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    tables.push(TableInfo::new(database, row.schema, row.table, &default_schema));
                    index.insert(key, tables.len() - 1);
                    tables.len() - 1
                }
            };
            tables[slot]
                .columns
                .push(ColumnInfo::new(row.column, row.data_type, row.is_primary_key));
        }

        Self {
            database: database.as_str().to_string(),
            default_schema,
            tables,
        }
    }

    /// Fill in schema and derived names the caller left blank, and force every
    /// fully qualified name onto `database`.
    pub fn qualified_for(mut self, database: &DatabaseName) -> Self {
        if self.default_schema.trim().is_empty() {
            self.default_schema = default_schema();
        }
        let default_schema = self.default_schema.clone();
        for table in &mut self.tables {
            table.qualify(database, &default_schema);
        }
        self.database = database.as_str().to_string();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

fn pick_default_schema(rows: &[SchemaColumnRow]) -> String {
    if rows.iter().any(|r| r.schema.eq_ignore_ascii_case(DEFAULT_SCHEMA)) {
        return default_schema();
    }
    rows.first()
        .map(|r| r.schema.clone())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(default_schema)
}

/// Connection settings for the external query executor.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub server: String,
    #[serde(default)]
    pub database: String,
    pub use_windows_auth: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ConnectionConfig {
    pub fn windows_auth(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            use_windows_auth: true,
            username: None,
            password: None,
        }
    }

    pub fn sql_auth(
        server: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            use_windows_auth: false,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Boundary check: SQL authentication needs both credentials.
    pub fn validate(&self) -> Result<DatabaseName> {
        if self.server.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("server is required".to_string()));
        }
        let database = DatabaseName::new(self.database.clone())?;
        if !self.use_windows_auth {
            let present = |v: &Option<String>| v.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
            if !present(&self.username) || !present(&self.password) {
                return Err(BridgeError::InvalidRequest(
                    "Missing username/password for SQL authentication.".to_string(),
                ));
            }
        }
        Ok(database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("use_windows_auth", &self.use_windows_auth)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
