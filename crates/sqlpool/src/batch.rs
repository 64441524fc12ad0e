//! Chunked bulk writes.
//!
//! Inserts send one multi-row `INSERT ... VALUES (...), (...)` per chunk.
//! Updates send one `UPDATE ... WHERE key = ?` per record. Every statement
//! goes through the [`Executor`], so connectivity failures are retried per
//! statement. A failure stops the batch; chunks already sent stay committed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::executor::{Executor, OperationRequest};
use crate::value::Value;

/// Default number of records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Positional placeholder used in generated statements.
pub const PLACEHOLDER: &str = "?";

/// What a batch call sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    /// Statements issued.
    pub statements: usize,
    /// Sum of affected row counts reported by the server.
    pub rows_affected: u64,
}

/// Drives the [`Executor`] over large record sets.
#[derive(Debug)]
pub struct BatchRunner<'a, D: Driver> {
    executor: &'a Executor<D>,
}

impl<'a, D: Driver> BatchRunner<'a, D> {
    /// Create a runner over `executor`.
    #[must_use]
    pub fn new(executor: &'a Executor<D>) -> Self {
        Self { executor }
    }

    /// Insert `records` into `table`, `chunk_size` rows per statement.
    ///
    /// Each record must have one value per column.
    pub fn batch_insert(
        &self,
        table: &str,
        columns: &[&str],
        records: &[Vec<Value>],
        chunk_size: usize,
    ) -> Result<BatchSummary> {
        check_chunk_size(chunk_size)?;
        check_arity(records, columns.len())?;
        // Validates identifiers even when there is nothing to insert.
        insert_sql(table, columns, 1)?;

        let mut summary = BatchSummary::default();
        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let sql = insert_sql(table, columns, chunk.len())?;
            let request = OperationRequest::execute(sql).params(chunk.iter().flatten().cloned());

            tracing::trace!(table = table, chunk = index, rows = chunk.len(), "inserting chunk");
            summary.rows_affected +=
                self.executor.execute(&request)?.rows_affected().unwrap_or_default();
            summary.statements += 1;
        }

        tracing::debug!(
            table = table,
            records = records.len(),
            statements = summary.statements,
            "batch insert complete"
        );
        Ok(summary)
    }

    /// Update `records` in `table`, one statement per record.
    ///
    /// Each record holds one value per column followed by the key value,
    /// matching the parameter order `(columns..., key_column)`.
    pub fn batch_update(
        &self,
        table: &str,
        columns: &[&str],
        records: &[Vec<Value>],
        key_column: &str,
        chunk_size: usize,
    ) -> Result<BatchSummary> {
        check_chunk_size(chunk_size)?;
        check_arity(records, columns.len() + 1)?;
        let sql = update_sql(table, columns, key_column)?;

        let mut summary = BatchSummary::default();
        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            tracing::trace!(table = table, chunk = index, rows = chunk.len(), "updating chunk");
            for record in chunk {
                let request =
                    OperationRequest::execute(sql.as_str()).params(record.iter().cloned());
                summary.rows_affected +=
                    self.executor.execute(&request)?.rows_affected().unwrap_or_default();
                summary.statements += 1;
            }
        }

        tracing::debug!(
            table = table,
            records = records.len(),
            statements = summary.statements,
            "batch update complete"
        );
        Ok(summary)
    }
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidBatch("chunk size must be greater than 0".into()));
    }
    Ok(())
}

fn check_arity(records: &[Vec<Value>], expected: usize) -> Result<()> {
    match records.iter().position(|r| r.len() != expected) {
        Some(index) => Err(Error::InvalidBatch(format!(
            "record {index} has {} values, expected {expected}",
            records[index].len()
        ))),
        None => Ok(()),
    }
}

/// Build `INSERT INTO table (c1, c2) VALUES (?, ?), (?, ?)` for `rows` rows.
pub fn insert_sql(table: &str, columns: &[&str], rows: usize) -> Result<String> {
    validate_table(table)?;
    if columns.is_empty() {
        return Err(Error::InvalidBatch("at least one column is required".into()));
    }
    for column in columns {
        validate_identifier(column)?;
    }
    if rows == 0 {
        return Err(Error::InvalidBatch("at least one row is required".into()));
    }

    let tuple = format!("({})", vec![PLACEHOLDER; columns.len()].join(", "));
    let values = vec![tuple.as_str(); rows].join(", ");
    Ok(format!(
        "INSERT INTO {table} ({}) VALUES {values}",
        columns.join(", ")
    ))
}

/// Build `UPDATE table SET c1 = ?, c2 = ? WHERE key = ?`.
pub fn update_sql(table: &str, columns: &[&str], key_column: &str) -> Result<String> {
    validate_table(table)?;
    if columns.is_empty() {
        return Err(Error::InvalidBatch("at least one column is required".into()));
    }
    for column in columns {
        validate_identifier(column)?;
    }
    validate_identifier(key_column)?;

    let set = columns
        .iter()
        .map(|c| format!("{c} = {PLACEHOLDER}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("UPDATE {table} SET {set} WHERE {key_column} = {PLACEHOLDER}"))
}

/// Validate an identifier (column or table name) to prevent SQL injection.
pub fn validate_identifier(name: &str) -> Result<()> {
    #[allow(clippy::expect_used)]
    static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,63}$").expect("identifier pattern is valid")
    });

    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".into()));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': must start with letter/underscore, \
             contain only alphanumerics/_/$, and be 1-64 characters"
        )));
    }

    Ok(())
}

/// Validate a table name, optionally qualified as `schema.table`.
fn validate_table(name: &str) -> Result<()> {
    let mut parts = name.split('.');
    let first = parts.next().unwrap_or_default();
    validate_identifier(first)?;
    match (parts.next(), parts.next()) {
        (None, _) => Ok(()),
        (Some(table), None) => validate_identifier(table),
        (Some(_), Some(_)) => Err(Error::InvalidIdentifier(format!(
            "invalid table name '{name}': at most one schema qualifier allowed"
        ))),
    }
}
