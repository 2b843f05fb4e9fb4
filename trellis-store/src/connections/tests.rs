// SPDX-License-Identifier: MIT OR Apache-2.0

use serde_json::json;
use trellis_core::{CardId, Connection, ConnectionId, Timestamp, UserId};

use crate::connections::ConnectionStore;
use crate::sqlite::{SqliteError, SqliteStore};
use crate::traits::Transaction;

fn connection(source: CardId, target: CardId) -> Connection {
    Connection {
        id: ConnectionId::random(),
        source_card_id: source,
        target_card_id: target,
        connection_type: "references".to_string(),
        confidence: 0.75,
        metadata: Some(json!({ "note": "first draft" })),
        is_visible: true,
        created_by: UserId::random(),
        created_at: Timestamp::from_micros(10),
        updated_at: Timestamp::from_micros(10),
    }
}

#[tokio::test]
async fn insert_update_delete() {
    let store = SqliteStore::temporary().await;

    let card_a = CardId::random();
    let card_b = CardId::random();
    let card_c = CardId::random();
    let ab = connection(card_a, card_b);
    let ca = Connection {
        metadata: None,
        ..connection(card_c, card_a)
    };

    let permit = store.begin().await.unwrap();
    store.insert_connection(&ab).await.unwrap();
    store.insert_connection(&ca).await.unwrap();
    let err = store.insert_connection(&ab).await.unwrap_err();
    assert!(err.is_unique_violation());
    store.commit(permit).await.unwrap();

    assert_eq!(store.connection(&ab.id).await.unwrap(), Some(ab.clone()));
    assert_eq!(store.connection(&ca.id).await.unwrap(), Some(ca.clone()));
    assert_eq!(store.connections_for_card(&card_a).await.unwrap().len(), 2);
    assert_eq!(store.connections_for_card(&card_b).await.unwrap(), vec![ab.clone()]);

    assert!(
        store
            .has_parallel_connection(&card_a, &card_b, "references")
            .await
            .unwrap()
    );
    assert!(
        !store
            .has_parallel_connection(&card_b, &card_a, "references")
            .await
            .unwrap()
    );

    let updated = Connection {
        connection_type: "contradicts".to_string(),
        confidence: 0.1,
        is_visible: false,
        updated_at: Timestamp::from_micros(20),
        ..ab.clone()
    };
    let permit = store.begin().await.unwrap();
    assert!(store.update_connection(&updated).await.unwrap());
    assert!(store.delete_connection(&ca.id).await.unwrap());
    assert!(!store.delete_connection(&ca.id).await.unwrap());
    assert!(
        !store
            .update_connection(&connection(card_b, card_c))
            .await
            .unwrap()
    );
    store.commit(permit).await.unwrap();

    assert_eq!(store.connection(&ab.id).await.unwrap(), Some(updated));
    assert_eq!(store.connection(&ca.id).await.unwrap(), None);
}

#[tokio::test]
async fn writes_require_transaction() {
    let store = SqliteStore::temporary().await;
    let result = store
        .insert_connection(&connection(CardId::random(), CardId::random()))
        .await;
    assert!(matches!(result, Err(SqliteError::TransactionMissing)));
}
