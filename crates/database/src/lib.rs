//! # Autotrader Database Crate
//!
//! This crate is the durable store of the scheduler. Everything the engine
//! knows between ticks is re-read from here.
//!
//! ## Architectural Principles
//!
//! - **Capability, not tables:** The engine depends only on the `Repository`
//!   trait. `DbRepository` implements it on PostgreSQL, `MemoryRepository`
//!   in process memory for tests and dry runs.
//! - **Decode once:** Rows are converted into domain types at this boundary.
//!   Trigger conditions come out as sum types, never as loose columns or JSON.
//! - **Claims replace locks:** `claim_scheduled_*` is the only way to take
//!   ownership of a schedule for an execution attempt.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool setup and embedded migrations.
//! - `Repository`: the storage capability.
//! - `DbRepository`, `MemoryRepository`: its two implementations.
//! - `DbError`: the specific error types that can be returned from this crate.

pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod rows;

pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::MemoryRepository;
pub use postgres::DbRepository;
pub use repository::Repository;
