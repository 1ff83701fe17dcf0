//! BATON Store - Embedded SQL Persistence
//!
//! Single embedded SQLite database (write-ahead logging mandatory;
//! concurrent readers, single writer) holding the append-only event log
//! and the current-state tables. The store is the source of truth for
//! resumption after crash, shutdown, or months-long dormancy.
//!
//! # Contract
//!
//! - Every write is transactional; readers see consistent snapshots.
//! - Event sequences are allocated inside the insert transaction, so they
//!   are strictly monotonic per context.
//! - Locks are advisory and TTL-based; expired rows are reclaimed on the
//!   next acquisition attempt.
//! - On open, the file is integrity-checked; a corrupt database falls
//!   back to the previous known-good backup and the degradation is
//!   recorded.

mod migrations;
mod rows;
mod store;

pub use store::{ContextFilter, EventFilter, IdentityDocRecord, Store};
