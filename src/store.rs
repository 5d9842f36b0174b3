//! Observation loading from a SQLite table.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::slicer::Observation;
use crate::table::{ObservationSchema, ObservationTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub table: String,
    pub entity_column: String,
    pub timestamp_column: String,
    pub value_column: String,
}

impl Default for StoreQuery {
    fn default() -> Self {
        Self {
            table: "observations".to_string(),
            entity_column: "entity_id".to_string(),
            timestamp_column: "ts_ms_utc".to_string(),
            value_column: "value".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("unsupported entity id type in column {column}")]
    UnsupportedEntityType { column: String },
}

pub fn load_store_observations(
    store_path: &Path,
    query: &StoreQuery,
) -> Result<ObservationTable, StoreError> {
    for ident in [
        &query.table,
        &query.entity_column,
        &query.timestamp_column,
        &query.value_column,
    ] {
        validate_identifier(ident)?;
    }

    let conn = Connection::open_with_flags(store_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let passthrough_columns = extra_columns(&conn, query)?;

    let mut select = vec![
        query.entity_column.clone(),
        query.timestamp_column.clone(),
        query.value_column.clone(),
    ];
    select.extend(passthrough_columns.iter().map(|name| quote_identifier(name)));
    let sql = format!(
        "SELECT {columns} FROM {table} ORDER BY {entity} ASC, {ts} ASC",
        columns = select.join(", "),
        table = query.table,
        entity = query.entity_column,
        ts = query.timestamp_column
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;

    let mut observations = Vec::new();
    while let Some(row) = rows.next()? {
        let entity_id = match row.get_ref(0)? {
            ValueRef::Integer(id) => id.to_string(),
            ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
            _ => {
                return Err(StoreError::UnsupportedEntityType {
                    column: query.entity_column.clone(),
                })
            }
        };
        let mut passthrough = Vec::with_capacity(passthrough_columns.len());
        for idx in 0..passthrough_columns.len() {
            passthrough.push(field_text(row.get_ref(3 + idx)?));
        }
        observations.push(
            Observation::new(entity_id, row.get(1)?, row.get(2)?).with_passthrough(passthrough),
        );
    }

    info!(
        component = "store",
        event = "store.load.finish",
        store_path = %store_path.display(),
        table = %query.table,
        rows = observations.len(),
        passthrough_columns = passthrough_columns.len()
    );

    Ok(ObservationTable {
        schema: ObservationSchema {
            passthrough_columns,
            ..ObservationSchema::core(
                &query.entity_column,
                &query.timestamp_column,
                &query.value_column,
            )
        },
        observations,
    })
}

/// Table columns other than the entity, timestamp and value ones, in
/// declaration order.
fn extra_columns(conn: &Connection, query: &StoreQuery) -> Result<Vec<String>, StoreError> {
    let core = [
        &query.entity_column,
        &query.timestamp_column,
        &query.value_column,
    ];
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", query.table))?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        // sqlite column names are case-insensitive
        if !core.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            columns.push(name);
        }
    }
    Ok(columns)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Pass-through fields are carried as text. Blobs are hex encoded.
fn field_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => v.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(bytes) => hex::encode(bytes),
    }
}

fn validate_identifier(ident: &str) -> Result<(), StoreError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(ident.to_string()))
    }
}
