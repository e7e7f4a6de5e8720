//! Locker Pickup Engine - fulfillment orchestration for locker pickup.
//!
//! The engine reserves locker compartments for commerce orders, follows each
//! parcel through drop-off and pickup from the provider's webhooks, and tells
//! the customer when to collect it.
//!
//! # Architecture
//!
//! - Axum HTTP API ([`routes`]) over shared application state ([`state`])
//! - `PostgreSQL` persistence behind the [`db::PickupStore`] trait
//! - Locker-network provider client with cached OAuth2 tokens ([`provider`])
//! - Business operations in [`services`]: allocation, lifecycle, ingestion,
//!   notifications and checkout rate quotes
//! - Shopify order annotations ([`shopify`])
//!
//! The `locker-pickup-engine` binary serves the API. Scheduled jobs (expiry
//! sweep, notification redelivery) run through `lp-cli`.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;

pub use config::EngineConfig;
pub use error::AppError;
pub use state::AppState;
