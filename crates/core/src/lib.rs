//! Locker Pickup Core - Shared domain types.
//!
//! This crate provides the types shared by the pickup components:
//! - `engine` - Orchestration service (provider client, lifecycle, webhooks)
//! - `cli` - Migrations and operational jobs
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. The order lifecycle's transition table lives here
//! so every caller decides transitions the same way.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, contact details, prices, sizes, statuses and events

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
