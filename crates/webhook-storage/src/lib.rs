//! # Webhook Storage
//!
//! PostgreSQL and in-memory implementations of the `webhook-core`
//! repository traits.
//!
//! - [`postgres::PostgresStore`] implements every repository trait against
//!   a single `sqlx::PgPool`, using runtime-checked queries so the crate
//!   builds without a live database.
//! - `memory` provides `Arc<RwLock<..>>`-backed fakes for tests.

pub mod ingestion_repo;
pub mod memory;
pub mod postgres;

pub use self::postgres::PostgresStore;
