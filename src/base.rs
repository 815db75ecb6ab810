// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Core identifier types for customers, offers and transactions.

use crate::error::TransactionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Country calling code prepended to local subscriber numbers.
pub const COUNTRY_CODE: &str = "254";

/// Unique identifier for a transaction.
///
/// Allocated monotonically by the [`TransactionStore`](crate::TransactionStore);
/// never reused, even after a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an offer in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OfferId(pub u32);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Customer identifier derived from a normalized phone number.
///
/// Two spellings of the same number (`0712345678`, `+254 712 345 678`)
/// map to the same id. Deserialization normalizes too, so every value holds
/// a 12-digit `254` number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomerId(String);

impl CustomerId {
    /// Derives the id from a raw phone number.
    ///
    /// Returns `None` when the input does not normalize to a 12-digit
    /// international number.
    pub fn from_phone(phone: &str) -> Option<Self> {
        normalize_phone(phone).map(CustomerId)
    }

    /// The normalized international form, e.g. `254712345678`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local dialing form, e.g. `0712345678`.
    pub fn local(&self) -> String {
        format!("0{}", &self.0[COUNTRY_CODE.len()..])
    }
}

impl TryFrom<String> for CustomerId {
    type Error = TransactionError;

    fn try_from(phone: String) -> Result<Self, Self::Error> {
        CustomerId::from_phone(&phone).ok_or(TransactionError::InvalidPhone(phone))
    }
}

impl From<CustomerId> for String {
    fn from(id: CustomerId) -> Self {
        id.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a phone number to `254XXXXXXXXX`.
///
/// Spaces, dashes and a leading `+` are ignored. A leading `0` is replaced by
/// the country code and a bare 9-digit subscriber number gets it prepended.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("{COUNTRY_CODE}{rest}")
    } else if digits.len() == 9 {
        format!("{COUNTRY_CODE}{digits}")
    } else {
        digits
    };

    (normalized.len() == 12 && normalized.starts_with(COUNTRY_CODE)).then_some(normalized)
}
