//! Core types for locker pickup fulfillment.
//!
//! This module provides type-safe wrappers for the pickup domain.

pub mod contact;
pub mod event;
pub mod id;
pub mod locker;
pub mod price;
pub mod status;

pub use contact::{ContactError, CustomerContact, Email, PhoneNumber};
pub use event::{EventDisposition, EventSource, EventType};
pub use id::*;
pub use locker::{Coordinates, CoordinatesError, SizeClass};
pub use price::{CurrencyCode, Price};
pub use status::*;
