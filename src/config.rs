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

//! Runtime settings.
//!
//! Settings come from three layers, lowest priority first:
//! 1. [`Settings::default`]
//! 2. an optional JSON file
//! 3. `HYBRID_*` environment variables

use crate::error::ConfigError;
use crate::message::MessageClassifier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use std::{env, fs};

/// Longest accepted renew or sync interval (366 days).
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Auto-reply behaviour and templates.
///
/// Templates may use `{name}`, `{amount}` and `{offer}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReplySettings {
    pub enabled: bool,
    pub success: String,
    pub failure: String,
    pub unmatched: String,
}

impl Default for AutoReplySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            success: "Dear {name}, your purchase of {offer} (Ksh{amount}) was successful. Thank you."
                .to_string(),
            failure: "Dear {name}, we could not complete your purchase of {offer} (Ksh{amount}). \
                      We will retry or refund you shortly."
                .to_string(),
            unmatched: "Dear {name}, we received Ksh{amount} but no offer matches that amount. \
                        Please contact the agent."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SIM slot (1 or 2) used for outbound USSD.
    pub dial_sim_slot: u8,
    /// SIM slot (1 or 2) payment notifications are accepted on.
    pub receive_sim_slot: u8,
    pub payment_senders: Vec<String>,
    pub site_link_senders: Vec<String>,
    /// Dispatch matched transactions as soon as they are created.
    pub auto_dispatch: bool,
    pub auto_reply: AutoReplySettings,
    /// Forward completed transactions to a connected listener app.
    pub forwarding_enabled: bool,
    pub renew_interval_secs: u64,
    pub subscription_sync_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dial_sim_slot: 1,
            receive_sim_slot: 1,
            payment_senders: vec!["MPESA".to_string()],
            site_link_senders: vec!["HYBRIDLINK".to_string()],
            auto_dispatch: true,
            auto_reply: AutoReplySettings::default(),
            forwarding_enabled: true,
            renew_interval_secs: 24 * 60 * 60,
            subscription_sync_interval_secs: 30 * 60,
        }
    }
}

impl Settings {
    /// Loads settings from an optional JSON file plus the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or a
    /// value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => Settings::default(),
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `HYBRID_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HYBRID_DIAL_SIM_SLOT") {
            self.dial_sim_slot = parse("HYBRID_DIAL_SIM_SLOT", &value)?;
        }
        if let Some(value) = lookup("HYBRID_RECEIVE_SIM_SLOT") {
            self.receive_sim_slot = parse("HYBRID_RECEIVE_SIM_SLOT", &value)?;
        }
        if let Some(value) = lookup("HYBRID_PAYMENT_SENDERS") {
            self.payment_senders = split_list(&value);
        }
        if let Some(value) = lookup("HYBRID_SITE_LINK_SENDERS") {
            self.site_link_senders = split_list(&value);
        }
        if let Some(value) = lookup("HYBRID_AUTO_DISPATCH") {
            self.auto_dispatch = parse("HYBRID_AUTO_DISPATCH", &value)?;
        }
        if let Some(value) = lookup("HYBRID_AUTO_REPLY") {
            self.auto_reply.enabled = parse("HYBRID_AUTO_REPLY", &value)?;
        }
        if let Some(value) = lookup("HYBRID_FORWARDING") {
            self.forwarding_enabled = parse("HYBRID_FORWARDING", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, slot) in [
            ("dial_sim_slot", self.dial_sim_slot),
            ("receive_sim_slot", self.receive_sim_slot),
        ] {
            if !matches!(slot, 1 | 2) {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: slot.to_string(),
                });
            }
        }
        for (key, secs) in [
            ("renew_interval_secs", self.renew_interval_secs),
            ("subscription_sync_interval_secs", self.subscription_sync_interval_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: secs.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn subscription_sync_interval(&self) -> Duration {
        Duration::from_secs(self.subscription_sync_interval_secs)
    }

    pub fn classifier(&self) -> MessageClassifier {
        MessageClassifier::new(self.payment_senders.clone(), self.site_link_senders.clone())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.subscription_sync_interval(), Duration::from_secs(1800));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"dial_sim_slot": 2}"#).unwrap();
        assert_eq!(settings.dial_sim_slot, 2);
        assert_eq!(settings.payment_senders, vec!["MPESA"]);
        assert!(settings.auto_reply.enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("HYBRID_DIAL_SIM_SLOT", "2"),
            ("HYBRID_PAYMENT_SENDERS", "MPESA, TKASH ,"),
            ("HYBRID_AUTO_REPLY", "false"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.dial_sim_slot, 2);
        assert_eq!(settings.payment_senders, vec!["MPESA", "TKASH"]);
        assert!(!settings.auto_reply.enabled);
    }

    #[test]
    fn bad_values_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(|key| (key == "HYBRID_AUTO_DISPATCH").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "HYBRID_AUTO_DISPATCH", .. }));

        settings.dial_sim_slot = 3;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { key: "dial_sim_slot", .. })
        ));
    }

    #[test]
    fn intervals_are_bounded() {
        let mut settings = Settings {
            renew_interval_secs: MAX_INTERVAL_SECS,
            ..Settings::default()
        };
        settings.validate().unwrap();

        settings.renew_interval_secs = 1_000_000_000_000_000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { key: "renew_interval_secs", .. })
        ));

        settings.renew_interval_secs = 60;
        settings.subscription_sync_interval_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { key: "subscription_sync_interval_secs", .. })
        ));
    }
}
