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

//! TransactionStore integration tests: status machine, events, queue.

use chrono::Utc;
use hybrid_connect::{
    CustomerId, NewTransaction, Offer, OfferId, OfferType, TransactionError, TransactionEvent,
    TransactionId, TransactionStatus, TransactionStore, TransactionType,
};
use std::sync::Arc;
use TransactionStatus::*;

fn data_offer(price: i64) -> Offer {
    Offer {
        id: OfferId(1),
        name: "1GB 1hr".to_string(),
        ussd_code: "*180*5*2*PN*1*1#".to_string(),
        price,
        offer_type: OfferType::Data,
        site_linked: false,
    }
}

fn new_tx(offer: Option<Offer>) -> NewTransaction {
    NewTransaction {
        amount: 20,
        time: Utc::now(),
        message: "QAB1X2Y3Z4 Confirmed.".to_string(),
        customer: CustomerId::from_phone("0712345678").unwrap(),
        offer,
        kind: TransactionType::Mpesa,
        reschedule: None,
    }
}

// === Status machine ===

#[test]
fn initial_status_depends_on_offer() {
    let store = TransactionStore::new();
    assert_eq!(store.create(new_tx(Some(data_offer(20)))).status, Scheduled);
    assert_eq!(store.create(new_tx(None)).status, Unmatched);
}

#[test]
fn ids_are_monotonic() {
    let store = TransactionStore::new();
    let ids: Vec<_> = (0..3).map(|_| store.create(new_tx(None)).id).collect();
    assert_eq!(ids, vec![TransactionId(1), TransactionId(2), TransactionId(3)]);
}

#[test]
fn allowed_edges_only() {
    let all = [Unmatched, Scheduled, Success, Failed, Rescheduled];
    let allowed = [
        (Unmatched, Rescheduled),
        (Scheduled, Success),
        (Scheduled, Failed),
        (Scheduled, Rescheduled),
        (Failed, Rescheduled),
    ];
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn success_cannot_become_failed() {
    let store = TransactionStore::new();
    let tx = store.create(new_tx(Some(data_offer(20))));
    store.transition(tx.id, Success, Some("ok".into())).unwrap();

    let err = store.transition(tx.id, Failed, None).unwrap_err();
    assert_eq!(
        err,
        TransactionError::InvalidTransition {
            from: Success,
            to: Failed
        }
    );
    assert_eq!(store.get(tx.id).unwrap().status, Success);
}

#[test]
fn transition_keeps_previous_response_when_none_given() {
    let store = TransactionStore::new();
    let tx = store.create(new_tx(Some(data_offer(20))));
    store.transition(tx.id, Failed, Some("declined".into())).unwrap();
    let updated = store.transition(tx.id, Rescheduled, None).unwrap();
    assert_eq!(updated.response_message.as_deref(), Some("declined"));
}

#[test]
fn unknown_transaction_errors() {
    let store = TransactionStore::new();
    assert_eq!(
        store.transition(TransactionId(7), Success, None),
        Err(TransactionError::TransactionNotFound)
    );
    assert_eq!(
        store.remove(TransactionId(7)),
        Err(TransactionError::TransactionNotFound)
    );
    assert_eq!(
        store.enqueue(TransactionId(7)),
        Err(TransactionError::TransactionNotFound)
    );
}

#[test]
fn list_is_ordered_by_id() {
    let store = TransactionStore::new();
    for _ in 0..5 {
        store.create(new_tx(None));
    }
    let ids: Vec<u64> = store.list().iter().map(|tx| tx.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

// === Events ===

#[tokio::test]
async fn transitions_are_published() {
    let store = TransactionStore::new();
    let mut events = store.subscribe();
    let tx = store.create(new_tx(Some(data_offer(20))));

    store.transition(tx.id, Success, Some("done".into())).unwrap();
    store.remove(tx.id).unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        TransactionEvent::StatusChanged {
            id: tx.id,
            status: Success,
            response_message: Some("done".into()),
        }
    );
    assert_eq!(events.recv().await.unwrap(), TransactionEvent::Removed { id: tx.id });
}

#[tokio::test]
async fn watch_resolves_on_terminal_status() {
    let store = Arc::new(TransactionStore::new());
    let tx = store.create(new_tx(Some(data_offer(20))));

    let watcher = {
        let store = store.clone();
        tokio::spawn(async move { store.watch(tx.id).await })
    };
    tokio::task::yield_now().await;
    store.transition(tx.id, Failed, None).unwrap();

    assert_eq!(watcher.await.unwrap(), Ok(Failed));
}

#[tokio::test]
async fn watch_of_settled_transaction_returns_immediately() {
    let store = TransactionStore::new();
    let tx = store.create(new_tx(Some(data_offer(20))));
    store.transition(tx.id, Success, None).unwrap();
    assert_eq!(store.watch(tx.id).await, Ok(Success));
}

// === Queue ===

#[test]
fn enqueue_dedups_by_id() {
    let store = TransactionStore::new();
    let tx = store.create(new_tx(Some(data_offer(20))));

    store.enqueue(tx.id).unwrap();
    // A changed status must not let the same id in twice.
    store.transition(tx.id, Failed, Some("declined".into())).unwrap();
    assert_eq!(
        store.enqueue(tx.id),
        Err(TransactionError::DuplicateTransaction)
    );
    assert_eq!(store.queue().snapshot(), vec![tx.id]);
}

#[test]
fn queue_is_fifo_and_drops_removed() {
    let store = TransactionStore::new();
    let ids: Vec<_> = (0..4)
        .map(|_| store.create(new_tx(Some(data_offer(20)))).id)
        .collect();
    for id in &ids {
        store.enqueue(*id).unwrap();
    }

    assert!(store.dequeue(ids[1]));
    store.remove(ids[2]).unwrap();
    assert_eq!(store.queue().snapshot(), vec![ids[0], ids[3]]);

    // A dequeued id may be queued again, at the back.
    store.enqueue(ids[1]).unwrap();
    assert_eq!(store.queue().snapshot(), vec![ids[0], ids[3], ids[1]]);
}
