//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction and returns domain models from [`crate::db::models`]:
//!
//! ```ignore
//! let mut conn = pool.acquire().await?;
//! let accepted = Kafkas::new(&mut conn).list(&KafkaFilter::by_status(&[KafkaStatus::Accepted])).await?;
//! ```
//!
//! The distributed lock table is not accessed through a repository; see [`crate::locks`].

pub mod kafkas;
pub mod repository;

pub use kafkas::{KafkaFilter, Kafkas};
pub use repository::Repository;
