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

//! Priced USSD offers and the catalog that matches payments against them.

use crate::base::{CustomerId, OfferId};
use crate::error::TransactionError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Token in a USSD template replaced by the customer's local phone number.
pub const PHONE_PLACEHOLDER: &str = "PN";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OfferType {
    Data,
    Voice,
    Sms,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offer {
    pub id: OfferId,
    pub name: String,
    /// Template such as `*180*5*2*PN*1*1#`.
    pub ussd_code: String,
    pub price: i64,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    #[serde(default)]
    pub site_linked: bool,
}

impl Offer {
    /// Checks the price and USSD template.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::InvalidOffer`] if the price is not positive
    /// or the template does not start with `*`, end with `#` and contain the
    /// phone placeholder exactly once.
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.price <= 0 {
            return Err(TransactionError::InvalidOffer(format!(
                "price must be positive, got {}",
                self.price
            )));
        }
        let code = self.ussd_code.trim();
        if !code.starts_with('*') || !code.ends_with('#') {
            return Err(TransactionError::InvalidOffer(format!(
                "USSD code must start with '*' and end with '#': {code}"
            )));
        }
        if code.matches(PHONE_PLACEHOLDER).count() != 1 {
            return Err(TransactionError::InvalidOffer(format!(
                "USSD code must contain {PHONE_PLACEHOLDER} exactly once: {code}"
            )));
        }
        Ok(())
    }

    /// Fills the template for a given recipient.
    pub fn render_ussd(&self, recipient: &CustomerId) -> String {
        self.ussd_code
            .trim()
            .replacen(PHONE_PLACEHOLDER, &recipient.local(), 1)
    }
}

/// Concurrent offer catalog.
#[derive(Debug, Default)]
pub struct OfferCatalog {
    offers: DashMap<OfferId, Offer>,
}

impl OfferCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an offer.
    ///
    /// Transactions keep their own snapshot, so replacing an offer never
    /// changes the price recorded on historical transactions.
    pub fn upsert(&self, offer: Offer) -> Result<(), TransactionError> {
        offer.validate()?;
        self.offers.insert(offer.id, offer);
        Ok(())
    }

    pub fn remove(&self, id: OfferId) -> Result<Offer, TransactionError> {
        self.offers
            .remove(&id)
            .map(|(_, offer)| offer)
            .ok_or(TransactionError::OfferNotFound)
    }

    pub fn get(&self, id: OfferId) -> Option<Offer> {
        self.offers.get(&id).map(|offer| offer.value().clone())
    }

    /// Resolves a paid amount to an offer with exactly that price.
    ///
    /// With `site_linked_only`, offers not published on the storefront are
    /// ignored. Ties go to the lowest offer id.
    pub fn find_by_price(&self, price: i64, site_linked_only: bool) -> Option<Offer> {
        self.offers
            .iter()
            .filter(|offer| offer.price == price && (!site_linked_only || offer.site_linked))
            .min_by_key(|offer| offer.id)
            .map(|offer| offer.value().clone())
    }

    /// All offers ordered by id.
    pub fn list(&self) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self.offers.iter().map(|offer| offer.value().clone()).collect();
        offers.sort_by_key(|offer| offer.id);
        offers
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}
