//! clapper-store: the relational store (users/coupons/ledger/queue) and
//! the artifact store (on-disk job directories).
//!
//! Grounded on `magnetar`'s `JobStore`/`backends::sqlite` split: a trait
//! abstracting storage mode, backed by a conditional-UPDATE claim
//! algorithm for exactly-once task dispatch.

pub mod artifact_store;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{LocalStore, ReplicatedStore, Store};
