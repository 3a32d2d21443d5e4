//! HTTP handlers (spec.md §4.6): job lifecycle plus auth/billing.
//!
//! The teacher's admin/backends/estimates/files/stats handlers had no
//! counterpart in this spec's HTTP surface (no multi-backend file
//! transfers, no operator user-management UI) and were dropped.

pub mod auth;
pub mod jobs;
