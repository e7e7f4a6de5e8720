//! Locker compartment sizes and search coordinates.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compartment size class, ordered smallest to largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "size_class", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    #[default]
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl SizeClass {
    /// The smallest compartment that fits every item, or `Small` for an
    /// empty order.
    #[must_use]
    pub fn required_for<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        items.into_iter().max().unwrap_or_default()
    }

    /// Returns true if a compartment of this size holds an item of `required` size.
    #[must_use]
    pub fn fits(self, required: Self) -> bool {
        self >= required
    }

    /// Wire/database name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::ExtraLarge => "extra_large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" | "s" => Ok(Self::Small),
            "medium" | "m" => Ok(Self::Medium),
            "large" | "l" => Ok(Self::Large),
            "extra_large" | "xl" => Ok(Self::ExtraLarge),
            other => Err(format!("invalid size class: {other}")),
        }
    }
}

/// Errors from [`Coordinates::new`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum CoordinatesError {
    #[error("latitude {0} is outside -90..=90")]
    Latitude(f64),
    #[error("longitude {0} is outside -180..=180")]
    Longitude(f64),
}

/// A WGS84 point used as the centre of a locker search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    lat: f64,
    lon: f64,
}

impl Coordinates {
    /// Validate and build a coordinate pair.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinatesError`] for out-of-range or non-finite values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinatesError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinatesError::Latitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinatesError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_size_is_largest_item() {
        let items = [SizeClass::Small, SizeClass::Large, SizeClass::Medium];
        assert_eq!(SizeClass::required_for(items), SizeClass::Large);
        assert_eq!(SizeClass::required_for(std::iter::empty()), SizeClass::Small);
    }

    #[test]
    fn test_fits() {
        assert!(SizeClass::Large.fits(SizeClass::Medium));
        assert!(SizeClass::Medium.fits(SizeClass::Medium));
        assert!(!SizeClass::Small.fits(SizeClass::Medium));
    }

    #[test]
    fn test_size_parse() {
        assert_eq!("XL".parse::<SizeClass>(), Ok(SizeClass::ExtraLarge));
        assert_eq!("medium".parse::<SizeClass>(), Ok(SizeClass::Medium));
        assert!("huge".parse::<SizeClass>().is_err());
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(40.7, -74.0).is_ok());
        assert_eq!(
            Coordinates::new(91.0, 0.0),
            Err(CoordinatesError::Latitude(91.0))
        );
        assert!(Coordinates::new(0.0, f64::NAN).is_err());
    }
}
