//! Phone number normalization: raw user input to a WhatsApp address.
//!
//! Canonical rule: strip every non-digit, require 10–15 digits, then make
//! sure the default country calling code is present exactly once. A number
//! longer than the national length that already starts with the country
//! code is kept as is; anything else gets the code prepended. The result
//! must still fit E.164's 15 digits. No mobile-specific infix is ever added
//! or removed.

use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Digits in a national significant number.
const NATIONAL_LEN: usize = 10;
const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// Suffix WhatsApp Web uses for individual chats.
pub const USER_SUFFIX: &str = "@c.us";

/// A normalized destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhoneAddress {
    /// Digits only, country code included.
    pub number: String,
    /// Provider address (`<number>@c.us`).
    pub jid: String,
}

/// Normalizes phone numbers against a default country calling code.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
}

impl PhoneNormalizer {
    pub fn new(country_code: &str) -> Self {
        Self {
            country_code: country_code.chars().filter(|c| c.is_ascii_digit()).collect(),
        }
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Normalize raw input into a canonical address.
    pub fn normalize(&self, raw: &str) -> Result<PhoneAddress> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
            return Err(BridgeError::InvalidAddress(format!(
                "expected {}-{} digits, got {} in '{}'",
                MIN_DIGITS,
                MAX_DIGITS,
                digits.len(),
                raw.trim()
            )));
        }

        let number = if digits.len() > NATIONAL_LEN && digits.starts_with(&self.country_code) {
            digits
        } else {
            format!("{}{}", self.country_code, digits)
        };

        if number.len() > MAX_DIGITS {
            return Err(BridgeError::InvalidAddress(format!(
                "'{}' does not start with country code {} and prefixing it gives {} digits, over the E.164 maximum of {}",
                raw.trim(),
                self.country_code,
                number.len(),
                MAX_DIGITS
            )));
        }

        Ok(PhoneAddress {
            jid: format!("{}{}", number, USER_SUFFIX),
            number,
        })
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new("52")
    }
}
