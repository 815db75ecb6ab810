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

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use hybrid_connect::ports::{ListenerLink, PermissionGuard, SimDirectory, SmsSender, UssdDialer};
use hybrid_connect::{
    CustomerLedger, DispatchCoordinator, InboundSms, JobScheduler, Offer, OfferCatalog, OfferId,
    OfferType, Platform, PlatformError, Settings, SubscriptionGate, SubscriptionPlan, Transaction,
    TransactionStatus, TransactionStore,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// HybridConnect replay - Run an SMS inbox through the dispatch core
///
/// Loads an offer catalog, replays payment messages against a simulated
/// device and prints the resulting transactions as CSV on stdout.
#[derive(Parser, Debug)]
#[command(name = "hybrid-connect")]
#[command(about = "Replays payment SMS through the USSD dispatch core", long_about = None)]
struct Args {
    /// Offer catalog CSV: id,name,ussd_code,price,type,site_linked
    #[arg(long, value_name = "FILE")]
    offers: PathBuf,

    /// Inbox CSV: sender,body
    #[arg(long, value_name = "FILE")]
    inbox: PathBuf,

    /// Settings JSON file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Grant an unlimited plan valid for this many days
    #[arg(long)]
    unlimited_days: Option<i64>,

    /// Grant a limited plan with this many tokens
    #[arg(long)]
    tokens: Option<u64>,

    /// Response the simulated carrier returns for every dial
    #[arg(long, default_value = "You have bought the bundle successfully. Thank you.")]
    dial_response: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            process::exit(1);
        }
    };

    let offers = match open(&args.offers).and_then(|file| read_offers(BufReader::new(file))) {
        Ok(offers) => offers,
        Err(e) => {
            eprintln!("Error reading offers '{}': {}", args.offers.display(), e);
            process::exit(1);
        }
    };

    let inbox = match open(&args.inbox).and_then(|file| read_inbox(BufReader::new(file))) {
        Ok(inbox) => inbox,
        Err(e) => {
            eprintln!("Error reading inbox '{}': {}", args.inbox.display(), e);
            process::exit(1);
        }
    };

    let mut plans = Vec::new();
    if let Some(days) = args.unlimited_days {
        plans.push(SubscriptionPlan::Unlimited {
            expires_at_ms: (Utc::now() + ChronoDuration::days(days)).timestamp_millis(),
        });
    }
    if let Some(tokens) = args.tokens {
        plans.push(SubscriptionPlan::Limited { tokens });
    }

    let coordinator = build_coordinator(settings, offers, plans, &args.dial_response);
    let transactions = replay(&coordinator, inbox).await;
    coordinator.shutdown();

    if let Err(e) = write_transactions(&transactions, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn open(path: &Path) -> Result<File, csv::Error> {
    File::open(path).map_err(csv::Error::from)
}

/// Device double: all permissions granted, both SIM slots active, every
/// dial answered with the same response.
struct SimulatedDevice {
    dial_response: String,
}

#[async_trait]
impl PermissionGuard for SimulatedDevice {
    async fn missing_permissions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn request_permissions(&self, _permissions: &[String]) {}
}

#[async_trait]
impl SimDirectory for SimulatedDevice {
    async fn subscription_id(&self, slot: u8) -> Option<i32> {
        Some(i32::from(slot))
    }
}

#[async_trait]
impl UssdDialer for SimulatedDevice {
    async fn dial(&self, subscription_id: i32, code: &str) -> Result<String, PlatformError> {
        info!(subscription_id, code, "simulated_dial");
        Ok(self.dial_response.clone())
    }
}

#[async_trait]
impl SmsSender for SimulatedDevice {
    async fn send_multipart(&self, phone: &str, parts: Vec<String>) -> Result<(), PlatformError> {
        info!(phone, parts = parts.len(), text = %parts.concat(), "simulated_sms");
        Ok(())
    }
}

#[async_trait]
impl ListenerLink for SimulatedDevice {
    async fn forward(&self, transaction: &Transaction) -> Result<(), PlatformError> {
        info!(transaction_id = %transaction.id, "simulated_forward");
        Ok(())
    }
}

fn build_coordinator(
    settings: Settings,
    offers: Vec<Offer>,
    plans: Vec<SubscriptionPlan>,
    dial_response: &str,
) -> Arc<DispatchCoordinator> {
    let catalog = OfferCatalog::new();
    for offer in offers {
        let id = offer.id;
        if let Err(e) = catalog.upsert(offer) {
            warn!(offer_id = %id, error = %e, "skipping offer");
        }
    }

    let device = Arc::new(SimulatedDevice {
        dial_response: dial_response.to_string(),
    });
    let platform = Platform {
        permissions: device.clone(),
        sims: device.clone(),
        dialer: device.clone(),
        sms: device.clone(),
        listener: device,
    };

    Arc::new(DispatchCoordinator::new(
        settings,
        Arc::new(catalog),
        Arc::new(CustomerLedger::new()),
        Arc::new(TransactionStore::new()),
        Arc::new(SubscriptionGate::with_plans(plans)),
        platform,
        Arc::new(JobScheduler::new()),
    ))
}

/// Ingests every message, then waits for pending dials to settle.
async fn replay(coordinator: &Arc<DispatchCoordinator>, inbox: Vec<InboxRecord>) -> Vec<Transaction> {
    for record in inbox {
        let sms = InboundSms::new(record.sender, record.body);
        if let Err(e) = coordinator.ingest_sms(&sms).await {
            warn!(error = %e, "skipping message");
        }
    }

    for transaction in coordinator.store().list() {
        if transaction.status != TransactionStatus::Scheduled {
            continue;
        }
        let waited = tokio::time::timeout(Duration::from_secs(10), coordinator.watch(transaction.id));
        if waited.await.is_err() {
            warn!(transaction_id = %transaction.id, "dial did not settle in time");
        }
    }

    coordinator.store().list()
}

/// Raw CSV record of the offer catalog.
///
/// Fields: `id, name, ussd_code, price, type, site_linked`
#[derive(Debug, Deserialize)]
struct OfferRecord {
    id: u32,
    name: String,
    ussd_code: String,
    price: i64,
    #[serde(rename = "type")]
    offer_type: OfferType,
    #[serde(default)]
    site_linked: bool,
}

impl From<OfferRecord> for Offer {
    fn from(record: OfferRecord) -> Self {
        Offer {
            id: OfferId(record.id),
            name: record.name,
            ussd_code: record.ussd_code,
            price: record.price,
            offer_type: record.offer_type,
            site_linked: record.site_linked,
        }
    }
}

/// Reads the offer catalog, skipping malformed rows.
fn read_offers<R: Read>(reader: R) -> Result<Vec<Offer>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut offers = Vec::new();
    for result in rdr.deserialize::<OfferRecord>() {
        match result {
            Ok(record) => offers.push(record.into()),
            Err(e) => warn!(error = %e, "skipping malformed offer row"),
        }
    }
    Ok(offers)
}

/// Raw CSV record of the inbox.
#[derive(Debug, Deserialize)]
struct InboxRecord {
    sender: String,
    body: String,
}

/// Reads the inbox, skipping malformed rows.
fn read_inbox<R: Read>(reader: R) -> Result<Vec<InboxRecord>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut inbox = Vec::new();
    for result in rdr.deserialize::<InboxRecord>() {
        match result {
            Ok(record) => inbox.push(record),
            Err(e) => warn!(error = %e, "skipping malformed inbox row"),
        }
    }
    Ok(inbox)
}

/// Output row: `id, type, status, amount, phone, offer, response`
#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    amount: i64,
    phone: String,
    offer: Option<&'a str>,
    response: Option<&'a str>,
}

/// Writes transactions as CSV.
fn write_transactions<W: Write>(transactions: &[Transaction], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for transaction in transactions {
        wtr.serialize(TransactionRow {
            id: transaction.id.0,
            kind: transaction.kind.as_str(),
            status: transaction.status.as_str(),
            amount: transaction.amount,
            phone: transaction.customer.local(),
            offer: transaction.offer.as_ref().map(|offer| offer.name.as_str()),
            response: transaction.response_message.as_deref(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
