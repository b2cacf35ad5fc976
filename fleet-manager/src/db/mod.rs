//! Database layer for data persistence and access.
//!
//! - [`handlers`]: repositories over `&mut PgConnection`
//! - [`models`]: database records
//! - [`errors`]: [`DbError`](errors::DbError), the error type repositories return
//!
//! Migrations live in `migrations/` and are applied at startup by [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
