//! Locker-network provider integration.
//!
//! # Architecture
//!
//! - OAuth2 client-credentials tokens, one [`CredentialCache`] per store
//! - REST/JSON location search and delivery creation ([`ProviderClient`])
//! - [`ProviderDirectory`] hands out one client per store, memoised
//! - Inbound webhooks are parsed and signature-checked in [`webhook`]
//!
//! The engine talks to the provider through the [`LockerProvider`] trait so
//! allocation can be exercised against fakes.

pub mod auth;
pub mod client;
pub mod directory;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use locker_pickup_core::{Coordinates, CustomerContact, SizeClass};

pub use auth::{ClientCredentialsExchange, CredentialCache, CredentialError, IssuedToken, TokenExchange, TokenProvider};
pub use client::ProviderClient;
pub use directory::{ProviderDirectory, ProviderResolver};

/// Errors from provider API calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No usable bearer token.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Network failure, timeout, 5xx or 429. Worth retrying.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("provider rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error text from the response body.
        message: String,
    },

    /// The response did not have the documented shape.
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Returns true for failures a later attempt may not see.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns true when the provider reported no free compartment.
    #[must_use]
    pub const fn is_capacity_exhausted(&self) -> bool {
        matches!(self, Self::Rejected { status: 409, .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Location search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationQuery {
    pub near: Coordinates,
    pub radius_m: u32,
    pub limit: u32,
}

/// Free compartments of one size at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentAvailability {
    pub size: SizeClass,
    pub available: u32,
}

/// A locker location returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Distance from the search centre in metres.
    pub distance_m: f64,
    #[serde(default)]
    pub compartments: Vec<CompartmentAvailability>,
}

impl ProviderLocation {
    /// Free compartments that hold a parcel of `required` size.
    #[must_use]
    pub fn available_for(&self, required: SizeClass) -> u32 {
        self.compartments
            .iter()
            .filter(|c| c.size.fits(required))
            .map(|c| c.available)
            .fold(0, u32::saturating_add)
    }
}

/// A drop-off delivery to create at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub location_id: String,
    /// Merchant-side reference (the commerce order id).
    pub reference: String,
    pub size: SizeClass,
    pub recipient: CustomerContact,
    /// Sent as `Idempotency-Key` so a retried create is not duplicated.
    pub idempotency_key: String,
}

/// The provider's answer to a delivery create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedDelivery {
    /// Delivery request id.
    pub id: String,
    /// Link the merchant uses to open the compartment.
    pub access_link: String,
    #[serde(default)]
    pub compartment_id: Option<String>,
}

/// Operations the engine needs from the locker provider.
#[async_trait]
pub trait LockerProvider: Send + Sync {
    /// Locations near a point, nearest first as the provider returns them.
    async fn search_locations(
        &self,
        query: &LocationQuery,
    ) -> Result<Vec<ProviderLocation>, ProviderError>;

    /// Create a drop-off delivery request.
    async fn create_delivery(
        &self,
        request: &DeliveryRequest,
    ) -> Result<CreatedDelivery, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_counts_larger_compartments() {
        let location = ProviderLocation {
            id: "loc".to_string(),
            name: "Tower".to_string(),
            address: String::new(),
            distance_m: 10.0,
            compartments: vec![
                CompartmentAvailability {
                    size: SizeClass::Small,
                    available: 7,
                },
                CompartmentAvailability {
                    size: SizeClass::Medium,
                    available: 2,
                },
                CompartmentAvailability {
                    size: SizeClass::ExtraLarge,
                    available: 1,
                },
            ],
        };
        assert_eq!(location.available_for(SizeClass::Small), 10);
        assert_eq!(location.available_for(SizeClass::Medium), 3);
        assert_eq!(location.available_for(SizeClass::Large), 1);
    }

    #[test]
    fn test_available_saturates_on_huge_counts() {
        let location = ProviderLocation {
            id: "loc".to_string(),
            name: "Tower".to_string(),
            address: String::new(),
            distance_m: 10.0,
            compartments: vec![
                CompartmentAvailability {
                    size: SizeClass::Medium,
                    available: u32::MAX,
                },
                CompartmentAvailability {
                    size: SizeClass::Large,
                    available: 1,
                },
            ],
        };
        assert_eq!(location.available_for(SizeClass::Small), u32::MAX);
    }

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::Unavailable("503".to_string()).is_retryable());
        assert!(!ProviderError::Credential(CredentialError::Rejected("bad".to_string())).is_retryable());
        let full = ProviderError::Rejected {
            status: 409,
            message: "no compartments".to_string(),
        };
        assert!(!full.is_retryable());
        assert!(full.is_capacity_exhausted());
    }
}
