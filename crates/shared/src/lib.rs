//! Shared infrastructure for the Huurly backend workspace.
//!
//! Holds the database pool helpers, embedded migrations, and the handful of
//! domain types that more than one crate needs.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::UserRole;
