//! Database access layer.
//!
//! - `pool`: the shared MySQL connection pool
//! - `scope`: per-call deadline and cancellation
//! - `executor`: statement execution
//! - `serializer`: row streaming under row and byte caps
//! - `types`: MySQL column to transport value mapping

pub mod executor;
pub mod params;
pub mod pool;
pub mod scope;
pub mod serializer;
pub mod types;

pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use scope::ExecutionScope;
pub use serializer::{MarshalRow, RowSerializer};
