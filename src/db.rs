//! Optional relational row-map executor.
//!
//! Reports that enrich CRM data from the relational store go through
//! [`RowExecutor`]: parameterized SQL text plus positional bind values,
//! returning a sequence of row-maps. Driver-level failures are wrapped
//! into [`DbError::Driver`] and never leak raw to callers.

use crate::pipeline::Record;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Errors raised by the relational collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database driver failure: {0}")]
    Driver(String),

    #[error("unsupported bind value at position {0}")]
    UnsupportedBind(usize),
}

impl From<rusqlite::Error> for DbError {
    fn from(error: rusqlite::Error) -> Self {
        DbError::Driver(error.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Parameterized query execution returning row-maps.
pub trait RowExecutor: Send + Sync {
    fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>>;
}

/// SQLite-backed executor.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Run a statement that returns no rows (schema setup, seeds).
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DbError::Driver(e.to_string()))?;
        let mut statement = conn.prepare(sql)?;
        bind_params(&mut statement, params)?;
        Ok(statement.raw_execute()?)
    }
}

impl RowExecutor for SqliteExecutor {
    fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Record>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DbError::Driver(e.to_string()))?;
        let mut statement = conn.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        bind_params(&mut statement, params)?;

        let mut rows = statement.raw_query();
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), column_value(row.get_ref(index)?));
            }
            records.push(record);
        }

        Ok(records)
    }
}

fn bind_params(statement: &mut rusqlite::Statement<'_>, params: &[Value]) -> DbResult<()> {
    for (index, value) in params.iter().enumerate() {
        let position = index + 1;
        match value {
            Value::Null => statement.raw_bind_parameter(position, rusqlite::types::Null)?,
            Value::Bool(b) => statement.raw_bind_parameter(position, b)?,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    statement.raw_bind_parameter(position, i)?
                } else if let Some(f) = n.as_f64() {
                    statement.raw_bind_parameter(position, f)?
                } else {
                    return Err(DbError::UnsupportedBind(position));
                }
            }
            Value::String(s) => statement.raw_bind_parameter(position, s)?,
            Value::Array(_) | Value::Object(_) => {
                return Err(DbError::UnsupportedBind(position));
            }
        }
    }
    Ok(())
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> SqliteExecutor {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE blacklist (whatsapp TEXT NOT NULL, reason TEXT)",
            &[],
        )
        .unwrap();
        db.execute(
            "INSERT INTO blacklist (whatsapp, reason) VALUES (?1, ?2)",
            &[json!("5511999990000"), json!("opt-out")],
        )
        .unwrap();
        db.execute(
            "INSERT INTO blacklist (whatsapp, reason) VALUES (?1, ?2)",
            &[json!("5511888880000"), Value::Null],
        )
        .unwrap();
        db
    }

    #[test]
    fn query_returns_row_maps() {
        let db = seeded();
        let rows = db
            .query("SELECT whatsapp, reason FROM blacklist ORDER BY whatsapp", &[])
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["whatsapp"], json!("5511888880000"));
        assert_eq!(rows[0]["reason"], Value::Null);
        assert_eq!(rows[1]["reason"], json!("opt-out"));
    }

    #[test]
    fn parameters_bind_positionally() {
        let db = seeded();
        let rows = db
            .query(
                "SELECT reason FROM blacklist WHERE whatsapp = ?1",
                &[json!("5511999990000")],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["reason"], json!("opt-out"));
    }

    #[test]
    fn driver_errors_are_wrapped() {
        let db = seeded();
        let err = db.query("SELECT * FROM missing_table", &[]).unwrap_err();
        assert!(matches!(err, DbError::Driver(_)));
    }
}
