//! Row serialization with row and byte caps.
//!
//! The serializer drains a driver row stream in delivery order, marshals each
//! row into transport values and stops as soon as either cap is reached.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, ResultDocument, TransportValue};
use futures_util::{Stream, StreamExt};
use std::io;
use tracing::warn;

/// A driver row that can describe its columns and marshal its cells.
pub trait MarshalRow {
    fn descriptors(&self) -> Vec<ColumnDescriptor>;
    fn marshal(&self) -> DbResult<Vec<TransportValue>>;
}

/// Counts the bytes serde_json would write without buffering them.
#[derive(Default)]
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serialized size of one row as it appears in the result document.
pub fn encoded_len(values: &[TransportValue]) -> DbResult<usize> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, values)
        .map_err(|e| DbError::internal(format!("failed to encode row: {}", e)))?;
    Ok(counter.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSerializer {
    row_cap: usize,
    byte_cap: usize,
}

impl RowSerializer {
    pub fn new(row_cap: usize, byte_cap: usize) -> Self {
        Self { row_cap, byte_cap }
    }

    /// Drain `rows` into a result document.
    ///
    /// A row that would push the running byte total past `byte_cap` is not
    /// emitted and the document is marked truncated. When not even the first
    /// row fits, the call fails with `RESULT_TOO_LARGE`.
    pub async fn collect<S, R>(&self, mut rows: S) -> DbResult<ResultDocument>
    where
        S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
        R: MarshalRow,
    {
        let mut columns: Option<Vec<ColumnDescriptor>> = None;
        let mut emitted: Vec<Vec<TransportValue>> = Vec::new();
        let mut total_bytes = 0usize;
        let mut truncated = false;

        while let Some(row) = rows.next().await {
            let row = row?;
            let width = columns.get_or_insert_with(|| row.descriptors()).len();

            if emitted.len() >= self.row_cap {
                truncated = true;
                break;
            }

            let values = row.marshal()?;
            if values.len() != width {
                return Err(DbError::internal(format!(
                    "row has {} values but result has {} columns",
                    values.len(),
                    width
                )));
            }

            let size = encoded_len(&values)?;
            if total_bytes.saturating_add(size) > self.byte_cap {
                if emitted.is_empty() {
                    return Err(DbError::result_too_large(self.byte_cap, size));
                }
                warn!(
                    byte_cap = self.byte_cap,
                    emitted_bytes = total_bytes,
                    "Result truncated at byte cap"
                );
                truncated = true;
                break;
            }

            total_bytes += size;
            emitted.push(values);
        }

        let row_count = emitted.len();
        Ok(ResultDocument {
            columns: columns.unwrap_or_default(),
            rows: emitted,
            row_count,
            truncated,
        })
    }
}
