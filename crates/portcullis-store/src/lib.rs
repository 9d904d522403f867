//! # Portcullis Store
//!
//! Transactional storage for the portcullis authentication core.
//!
//! ## Overview
//!
//! Every login step reads and writes through a [`Transaction`] obtained from
//! a [`Store`]. A transaction is committed explicitly; dropping it without
//! committing rolls it back. Audit events are written through the same
//! transaction as the mutation they describe.
//!
//! ## Features
//!
//! - `memory` (default): in-memory store for single-process use and tests
//! - `postgres`: PostgreSQL store backed by sqlx
//!
//! ## Usage
//!
//! ```rust,no_run
//! use portcullis_model::Project;
//! use portcullis_store::{MemoryStore, Store};
//!
//! async fn example() -> portcullis_store::StoreResult<()> {
//!     let store = MemoryStore::new();
//!     let project = Project::new("Acme");
//!     store.insert_project(project.clone()).await;
//!
//!     let mut tx = store.begin().await?;
//!     let loaded = tx.get_project(project.id).await?;
//!     assert!(loaded.is_some());
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Schema
//!
//! The PostgreSQL schema lives in `schema/postgres.sql`.

pub mod error;
pub mod store;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{StoreError, StoreResult};
pub use store::{Store, Transaction};

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;
