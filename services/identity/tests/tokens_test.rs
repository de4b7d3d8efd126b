//! Refresh rotation, logout and the scheduled sweep over real flow output.

mod common;

use common::{Harness, device};
use identity::cleanup::TokenSweeper;
use identity::error::IdentityError;
use identity::flows::RefreshInput;
use identity::models::{ActivityType, Principal, TokenSide};

fn refresh(raw: &str) -> RefreshInput {
    RefreshInput {
        refresh_token: raw.into(),
        metadata: device("web"),
    }
}

#[tokio::test]
async fn refresh_rotates_and_spends_the_old_token() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;

    let rotated = h
        .flows
        .refresh_token(refresh(&session.refresh_token))
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token, session.refresh_token);
    assert_eq!(rotated.expires_in, 900);

    let ledger = h.flows.ledger();
    assert!(!ledger.validate(&session.refresh_token, TokenSide::Refresh).await.unwrap());
    assert!(ledger.validate(&rotated.access_token, TokenSide::Access).await.unwrap());
    assert!(ledger.validate(&rotated.refresh_token, TokenSide::Refresh).await.unwrap());
    // rotation only spends the refresh side
    assert!(ledger.validate(&session.access_token, TokenSide::Access).await.unwrap());

    let reuse = h
        .flows
        .refresh_token(refresh(&session.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(reuse, IdentityError::Unauthenticated(_)));
}

#[tokio::test]
async fn rotated_pair_stays_on_the_same_device() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;
    let ledger = h.flows.ledger();

    let before = ledger
        .lookup(&session.refresh_token, TokenSide::Refresh)
        .await
        .unwrap()
        .unwrap();
    let rotated = h
        .flows
        .refresh_token(refresh(&session.refresh_token))
        .await
        .unwrap();
    let after = ledger
        .lookup(&rotated.refresh_token, TokenSide::Refresh)
        .await
        .unwrap()
        .unwrap();

    assert!(before.device_id.is_some());
    assert_eq!(before.device_id, after.device_id);
}

#[tokio::test]
async fn access_token_is_not_accepted_as_refresh() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;

    let err = h
        .flows
        .refresh_token(refresh(&session.access_token))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Unauthenticated(_)));

    let garbage = h.flows.refresh_token(refresh("not-a-jwt")).await.unwrap_err();
    assert!(matches!(garbage, IdentityError::Unauthenticated(_)));
}

#[tokio::test]
async fn logout_ends_the_presented_session() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;
    let principal = Principal::User(session.id);
    let ledger = h.flows.ledger();
    let device_id = ledger
        .lookup(&session.access_token, TokenSide::Access)
        .await
        .unwrap()
        .and_then(|t| t.device_id)
        .unwrap();

    h.flows
        .logout(principal, &session.access_token, &device("web"))
        .await
        .unwrap();

    assert!(!ledger.validate(&session.access_token, TokenSide::Access).await.unwrap());
    assert!(!ledger.validate(&session.refresh_token, TokenSide::Refresh).await.unwrap());

    let devices = h.store.devices_for(principal).await;
    let session_device = devices.iter().find(|d| d.id == device_id).unwrap();
    assert!(!session_device.is_active);
    assert_eq!(session_device.activity_type, ActivityType::Logout);
    // plus a fresh logout row for the activity log
    assert!(
        devices
            .iter()
            .any(|d| d.id != device_id && d.activity_type == ActivityType::Logout)
    );
}

#[tokio::test]
async fn logout_with_someone_elses_token_is_rejected() {
    let h = Harness::new();
    let alice = h.verified_user("alice@example.com").await;
    let bob = h.verified_user("bob@example.com").await;

    let err = h
        .flows
        .logout(Principal::User(bob.id), &alice.access_token, &device("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Unauthenticated(_)));
    assert!(
        h.flows
            .ledger()
            .validate(&alice.access_token, TokenSide::Access)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn sweep_after_logout_purges_dead_rows_once() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;
    h.flows
        .logout(Principal::User(session.id), &session.access_token, &device("web"))
        .await
        .unwrap();

    let sweeper = TokenSweeper::new(h.store.clone());
    let first = sweeper.run_once().await.unwrap();
    assert_eq!(first.expired, 0);
    // the spent verify token and the logged-out pair
    assert_eq!(first.purged, 2);
    assert_eq!(h.store.token_count().await, 0);

    let second = sweeper.run_once().await.unwrap();
    assert_eq!((second.expired, second.purged), (0, 0));
}

#[tokio::test]
async fn concurrent_refreshes_with_one_token_mint_one_pair() {
    let h = Harness::new();
    let session = h.verified_user("u@example.com").await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let flows = h.flows.clone();
            let input = refresh(&session.refresh_token);
            tokio::spawn(async move { flows.refresh_token(input).await })
        })
        .collect();

    let mut minted = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(pair) => minted.push(pair),
            Err(err) => assert!(matches!(err, IdentityError::Unauthenticated(_))),
        }
    }
    assert_eq!(minted.len(), 1);

    let principal = Principal::User(session.id);
    let active = h.flows.ledger().find_active_tokens(principal).await.unwrap();
    let live_refresh: Vec<_> = active
        .iter()
        .filter(|t| t.is_live(TokenSide::Refresh, chrono::Utc::now()))
        .collect();
    assert_eq!(live_refresh.len(), 1);
    assert_eq!(
        live_refresh[0].refresh_token.as_deref(),
        Some(minted[0].refresh_token.as_str())
    );
}
