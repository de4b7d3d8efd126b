//! Password + OTP login and the session policy it enforces.

mod common;

use common::{Harness, OTP, PASSWORD, config, device};
use identity::error::IdentityError;
use identity::flows::{LoginInput, SessionOutput, VerifyLoginInput};
use identity::models::{ActivityType, Principal, PrincipalKind, TokenSide};
use identity::notifier::NotificationKind;

fn login_input(contact: &str, password: &str) -> LoginInput {
    LoginInput {
        kind: PrincipalKind::User,
        contact: contact.into(),
        country_code: None,
        password: password.into(),
        metadata: device("web"),
    }
}

fn verify_input(contact: &str, otp: u32, device_type: &str) -> VerifyLoginInput {
    VerifyLoginInput {
        kind: PrincipalKind::User,
        contact: contact.into(),
        country_code: None,
        otp,
        metadata: device(device_type),
    }
}

async fn log_in(h: &Harness, contact: &str, device_type: &str) -> SessionOutput {
    h.flows
        .login(login_input(contact, PASSWORD))
        .await
        .unwrap();
    h.flows
        .verify_login(verify_input(contact, OTP, device_type))
        .await
        .unwrap()
}

#[tokio::test]
async fn login_then_verify_login_issues_tokens_once() {
    let h = Harness::new();
    let signed_up = h.verified_user("u@example.com").await;

    let login = h
        .flows
        .login(login_input("u@example.com", PASSWORD))
        .await
        .unwrap();
    assert_eq!(login.id, signed_up.id);
    assert!(login.otp_sent);
    let sent = h.outbox.last();
    assert_eq!(sent.kind, NotificationKind::LoginOtp);
    assert_eq!(sent.code, OTP);
    assert!(sent.link.is_none());

    let session = h
        .flows
        .verify_login(verify_input("u@example.com", OTP, "ios"))
        .await
        .unwrap();
    assert_eq!(session.id, signed_up.id);
    assert_eq!(session.email.as_deref(), Some("u@example.com"));
    assert!(!session.access_token.is_empty());
    assert!(!session.refresh_token.is_empty());

    let again = h
        .flows
        .verify_login(verify_input("u@example.com", OTP, "ios"))
        .await
        .unwrap_err();
    assert!(matches!(again, IdentityError::Unauthenticated(msg) if msg == "Invalid OTP"));

    let devices = h.store.devices_for(Principal::User(session.id)).await;
    assert!(devices.iter().any(|d| d.activity_type == ActivityType::Login));
}

#[tokio::test]
async fn wrong_password_and_unknown_contact_look_the_same() {
    let h = Harness::new();
    h.verified_user("u@example.com").await;

    let wrong = h
        .flows
        .login(login_input("u@example.com", "Wr0ng!Pass"))
        .await
        .unwrap_err();
    let unknown = h
        .flows
        .login(login_input("nobody@example.com", PASSWORD))
        .await
        .unwrap_err();

    assert_eq!(wrong.to_string(), unknown.to_string());
    assert!(matches!(wrong, IdentityError::Unauthenticated(_)));
}

#[tokio::test]
async fn unverified_account_cannot_log_in() {
    let h = Harness::new();
    h.flows
        .signup(h.signup_input("u@example.com", "web"))
        .await
        .unwrap();

    let err = h
        .flows
        .login(login_input("u@example.com", PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::BadRequest(_)));
}

#[tokio::test]
async fn verify_login_rejects_wrong_code() {
    let h = Harness::new();
    h.verified_user("u@example.com").await;
    h.flows
        .login(login_input("u@example.com", PASSWORD))
        .await
        .unwrap();

    let err = h
        .flows
        .verify_login(verify_input("u@example.com", 654_321, "ios"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Unauthenticated(_)));

    // the right code still works afterwards
    h.flows
        .verify_login(verify_input("u@example.com", OTP, "ios"))
        .await
        .unwrap();
}

#[tokio::test]
async fn verify_login_rejects_malformed_code() {
    let h = Harness::new();
    let err = h
        .flows
        .verify_login(verify_input("u@example.com", 12, "ios"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::BadRequest(_)));
}

#[tokio::test]
async fn single_session_revokes_the_previous_device() {
    let h = Harness::new();
    let signup = h.verified_user("u@example.com").await;
    let principal = Principal::User(signup.id);

    let device_a = log_in(&h, "u@example.com", "ios").await;
    let device_b = log_in(&h, "u@example.com", "android").await;

    let ledger = h.flows.ledger();
    assert!(!ledger.validate(&device_a.access_token, TokenSide::Access).await.unwrap());
    assert!(ledger.validate(&device_b.access_token, TokenSide::Access).await.unwrap());

    let active = ledger.find_active_tokens(principal).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].access_token, device_b.access_token);

    // the signup session is gone too
    assert!(!ledger.validate(&signup.access_token, TokenSide::Access).await.unwrap());
}

#[tokio::test]
async fn multi_device_login_keeps_other_sessions() {
    let mut cfg = config();
    cfg.multi_device_login = true;
    let h = Harness::with_config(cfg);
    let signup = h.verified_user("u@example.com").await;

    let device_a = log_in(&h, "u@example.com", "ios").await;
    let device_b = log_in(&h, "u@example.com", "android").await;

    let ledger = h.flows.ledger();
    assert!(ledger.validate(&device_a.access_token, TokenSide::Access).await.unwrap());
    assert!(ledger.validate(&device_b.access_token, TokenSide::Access).await.unwrap());
    assert_eq!(
        ledger
            .find_active_tokens(Principal::User(signup.id))
            .await
            .unwrap()
            .len(),
        3
    );
}
