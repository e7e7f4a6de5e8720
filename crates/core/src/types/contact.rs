//! Customer contact details used for pickup notifications.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing contact details.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContactError {
    /// The email address is empty.
    #[error("email cannot be empty")]
    EmptyEmail,
    /// The email address exceeds the RFC 5321 length limit.
    #[error("email must be at most {max} characters")]
    EmailTooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The email address is not of the form `local@domain`.
    #[error("email must have a local part and a domain separated by @")]
    MalformedEmail,
    /// The phone number is not in E.164 form.
    #[error("phone number must be in E.164 form (+ followed by 8-15 digits)")]
    MalformedPhone,
}

/// A customer email address.
///
/// Validation is structural only: exactly one `@`, non-empty local part and
/// domain, at most 254 characters.
///
/// ```
/// use locker_pickup_core::Email;
///
/// assert!(Email::parse("pat@example.com").is_ok());
/// assert!(Email::parse("pat@").is_err());
/// assert!(Email::parse("pat@a@b").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from a string, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns a [`ContactError`] if the address is empty, too long, or
    /// structurally malformed.
    pub fn parse(s: &str) -> Result<Self, ContactError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ContactError::EmptyEmail);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(ContactError::EmailTooLong {
                max: Self::MAX_LENGTH,
            });
        }

        match s.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self(s.to_owned()))
            }
            _ => Err(ContactError::MalformedEmail),
        }
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = ContactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

/// A customer phone number in E.164 form (e.g. `+14155550123`).
///
/// Common punctuation (spaces, dashes, dots, parentheses) is stripped before
/// validation so that numbers copied from checkout forms are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a phone number.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::MalformedPhone`] unless the normalized number
    /// is `+` followed by 8 to 15 digits.
    pub fn parse(s: &str) -> Result<Self, ContactError> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        let digits = normalized
            .strip_prefix('+')
            .ok_or(ContactError::MalformedPhone)?;

        if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ContactError::MalformedPhone);
        }

        Ok(Self(normalized))
    }

    /// Returns the number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = ContactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}

/// How to reach the customer about their pickup.
///
/// Either channel may be missing; the notification dispatcher uses whatever
/// is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CustomerContact {
    /// Customer display name.
    pub name: String,
    /// Email address for pickup emails.
    pub email: Option<Email>,
    /// Mobile number for pickup SMS.
    pub phone: Option<PhoneNumber>,
}

impl CustomerContact {
    /// Returns true if the customer can be reached on at least one channel.
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}
