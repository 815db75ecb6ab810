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

//! Classification of carrier USSD responses.
//!
//! Checks run in order: insufficient balance, explicit failure, explicit
//! success. Anything unrecognised counts as a failure so the agent reviews
//! it rather than the customer being told the purchase went through.

use crate::transaction::TransactionStatus;

const INSUFFICIENT: &[&str] = &["insufficient", "not enough", "low balance"];

const FAILURE: &[&str] = &[
    "fail",
    "error",
    "invalid",
    "not allowed",
    "unable",
    "connection problem",
    "mmi",
    "declined",
    "try again",
    "not eligible",
    "unknown application",
];

const SUCCESS: &[&str] = &[
    "success",
    "confirmed",
    "you have bought",
    "you have purchased",
    "has been sent",
    "activated",
    "request is being processed",
    "thank you",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOutcome {
    Success(String),
    /// Agent's airtime balance cannot cover the offer
    InsufficientBalance(String),
    Failed(String),
}

impl DialOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            DialOutcome::Success(_) => TransactionStatus::Success,
            DialOutcome::InsufficientBalance(_) | DialOutcome::Failed(_) => {
                TransactionStatus::Failed
            }
        }
    }

    /// Human-readable text stored as the transaction's response message.
    pub fn message(&self) -> String {
        match self {
            DialOutcome::Success(text) | DialOutcome::Failed(text) => text.clone(),
            DialOutcome::InsufficientBalance(text) => format!("Insufficient balance: {text}"),
        }
    }
}

pub fn classify_response(response: &str) -> DialOutcome {
    let text = response.trim();
    if text.is_empty() {
        return DialOutcome::Failed("Empty USSD response".to_string());
    }

    let lower = text.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|word| lower.contains(word));

    if mentions(INSUFFICIENT) {
        DialOutcome::InsufficientBalance(text.to_string())
    } else if mentions(FAILURE) {
        DialOutcome::Failed(text.to_string())
    } else if mentions(SUCCESS) {
        DialOutcome::Success(text.to_string())
    } else {
        DialOutcome::Failed(text.to_string())
    }
}
