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

//! Inbound payment SMS classification.
//!
//! Classification is a pure function of the sender and body. Recognised
//! formats:
//!
//! | Kind | Body |
//! |------|------|
//! | MPESA | `<CODE> Confirmed. Ksh<amount> received from <phone> <NAME> on <d/m/yy> at <h:mm AM>` |
//! | TILL | `<CODE> Confirmed. Ksh<amount> received from <NAME> <phone> on <d/m/yy> at <h:mm AM>` |
//! | SITE_LINK | `<CODE> Confirmed. Ksh<amount> paid by <phone> <NAME> via SiteLink on <d/m/yy> at <h:mm AM>` |
//!
//! A carrier "Recommendation ... timed out" notice short-circuits with
//! [`MessageError::RecommendationTimedOut`] whatever the sender.
//!
//! # Example
//!
//! ```
//! use hybrid_connect::{MessageClassifier, MessageKind};
//!
//! let classifier = MessageClassifier::default();
//! let message = classifier
//!     .classify(
//!         "MPESA",
//!         "QAB1X2Y3Z4 Confirmed. Ksh20.00 received from 0712345678 John Doe on 10/1/24 at 2:30 PM",
//!     )
//!     .unwrap();
//! assert_eq!(message.kind, MessageKind::Mpesa);
//! assert_eq!(message.amount, 20);
//! ```

use crate::error::MessageError;
use crate::transaction::TransactionType;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

lazy_static! {
    static ref RECOMMENDATION_TIMEOUT: Regex =
        Regex::new(r"(?is)\brecommendation\b.*\btimed\s+out\b").unwrap();

    /// Personal transfer: phone precedes the name
    static ref MPESA_RECEIVED: Regex = Regex::new(
        r"^(?P<code>[A-Z0-9]{10}) Confirmed\.\s*Ksh\s?(?P<amount>[\d,]+(?:\.\d{1,2})?) received from (?P<phone>(?:\+?254|0)\d{9}) (?P<name>.+?) on (?P<date>\d{1,2}/\d{1,2}/\d{2}) at (?P<time>\d{1,2}:\d{2})\s?(?P<meridiem>[AaPp][Mm])"
    )
    .unwrap();

    /// Till payment: name precedes the phone
    static ref TILL_RECEIVED: Regex = Regex::new(
        r"^(?P<code>[A-Z0-9]{10}) Confirmed\.\s*Ksh\s?(?P<amount>[\d,]+(?:\.\d{1,2})?) received from (?P<name>.+?) (?P<phone>(?:\+?254|0)\d{9}) on (?P<date>\d{1,2}/\d{1,2}/\d{2}) at (?P<time>\d{1,2}:\d{2})\s?(?P<meridiem>[AaPp][Mm])"
    )
    .unwrap();

    static ref SITE_LINK_PAID: Regex = Regex::new(
        r"^(?P<code>[A-Z0-9]{10}) Confirmed\.\s*Ksh\s?(?P<amount>[\d,]+(?:\.\d{1,2})?) paid by (?P<phone>(?:\+?254|0)\d{9}) (?P<name>.+?) via SiteLink on (?P<date>\d{1,2}/\d{1,2}/\d{2}) at (?P<time>\d{1,2}:\d{2})\s?(?P<meridiem>[AaPp][Mm])"
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Mpesa,
    Till,
    SiteLink,
}

impl MessageKind {
    pub fn transaction_type(self) -> TransactionType {
        match self {
            MessageKind::Mpesa => TransactionType::Mpesa,
            MessageKind::Till => TransactionType::Till,
            MessageKind::SiteLink => TransactionType::SiteLink,
        }
    }
}

/// Fields extracted from a payment SMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    pub kind: MessageKind,
    /// Carrier transaction code, e.g. `QAB1X2Y3Z4`.
    pub reference: String,
    pub phone: String,
    pub name: String,
    /// Whole currency units; any fractional part is dropped.
    pub amount: i64,
    pub time: DateTime<Utc>,
}

/// Matches SMS bodies against the known payment formats.
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    payment_senders: Vec<String>,
    site_link_senders: Vec<String>,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new(vec!["MPESA".to_string()], vec!["HYBRIDLINK".to_string()])
    }
}

impl MessageClassifier {
    /// Sender names are compared case-insensitively.
    pub fn new(payment_senders: Vec<String>, site_link_senders: Vec<String>) -> Self {
        Self {
            payment_senders,
            site_link_senders,
        }
    }

    /// Classifies an SMS body from `sender`.
    ///
    /// # Errors
    ///
    /// - [`MessageError::RecommendationTimedOut`] - Carrier timeout notice.
    /// - [`MessageError::InvalidSender`] - Sender is not configured.
    /// - [`MessageError::InvalidMessageFormat`] - Body matches no known format.
    pub fn classify(&self, sender: &str, body: &str) -> Result<ClassifiedMessage, MessageError> {
        let body = body.trim();
        if RECOMMENDATION_TIMEOUT.is_match(body) {
            return Err(MessageError::RecommendationTimedOut);
        }

        let sender = sender.trim();
        if Self::contains(&self.payment_senders, sender) {
            if let Some(caps) = MPESA_RECEIVED.captures(body) {
                return extract(MessageKind::Mpesa, &caps);
            }
            if let Some(caps) = TILL_RECEIVED.captures(body) {
                return extract(MessageKind::Till, &caps);
            }
            return Err(MessageError::InvalidMessageFormat);
        }
        if Self::contains(&self.site_link_senders, sender) {
            return SITE_LINK_PAID
                .captures(body)
                .ok_or(MessageError::InvalidMessageFormat)
                .and_then(|caps| extract(MessageKind::SiteLink, &caps));
        }

        Err(MessageError::InvalidSender(sender.to_string()))
    }

    fn contains(senders: &[String], sender: &str) -> bool {
        senders.iter().any(|s| s.eq_ignore_ascii_case(sender))
    }
}

fn extract(kind: MessageKind, caps: &Captures<'_>) -> Result<ClassifiedMessage, MessageError> {
    let amount = parse_amount(&caps["amount"])?;
    let time = parse_time(&caps["date"], &caps["time"], &caps["meridiem"])?;
    Ok(ClassifiedMessage {
        kind,
        reference: caps["code"].to_string(),
        phone: caps["phone"].to_string(),
        name: caps["name"].trim().to_string(),
        amount,
        time,
    })
}

fn parse_amount(raw: &str) -> Result<i64, MessageError> {
    let cleaned = raw.replace(',', "");
    let amount = Decimal::from_str(&cleaned)
        .map_err(|_| MessageError::InvalidMessageFormat)?
        .trunc()
        .to_i64()
        .ok_or(MessageError::InvalidMessageFormat)?;
    if amount <= 0 {
        return Err(MessageError::InvalidMessageFormat);
    }
    Ok(amount)
}

/// Parses `d/m/yy` plus `h:mm` and `AM|PM`. Message times are taken as UTC.
fn parse_time(date: &str, time: &str, meridiem: &str) -> Result<DateTime<Utc>, MessageError> {
    let stamp = format!("{date} {time} {}", meridiem.to_ascii_uppercase());
    NaiveDateTime::parse_from_str(&stamp, "%d/%m/%y %I:%M %p")
        .map(|naive| naive.and_utc())
        .map_err(|_| MessageError::InvalidMessageFormat)
}
