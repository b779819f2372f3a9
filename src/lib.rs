//! Chit Ledger Library
//!
//! Month-by-month ledger for chit (rotating savings) schemes: auction
//! arithmetic, reconciliation of assignments, payouts and collections into
//! one row per month, and the staged inline-edit engine used to change them.

pub mod api;
pub mod auction;
pub mod edit;
pub mod ledger;
pub mod models;
pub mod session;
