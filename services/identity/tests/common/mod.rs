//! Shared setup for flow tests: in-memory store, fixed OTPs, fixture keys.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use identity::config::OtpMode;
use identity::flows::{FlowConfig, IdentityFlows, SessionOutput, SignupInput, VerifySignupInput};
use identity::jwt::{JwtConfig, JwtService};
use identity::models::{PrincipalKind, RequestMetadata};
use identity::notifier::{Notification, Notifier};
use identity::repositories::MemoryStore;

pub const OTP: u32 = 123_456;
pub const PASSWORD: &str = "Str0ng!Pass";

/// Keeps every delivered notification for inspection
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Notification {
        self.all().pop().expect("a notification was delivered")
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub flows: IdentityFlows<MemoryStore>,
    pub outbox: RecordingNotifier,
}

pub fn jwt_service() -> JwtService {
    JwtService::new(JwtConfig {
        private_key: include_str!("../fixtures/jwt_private.pem").to_string(),
        public_key: include_str!("../fixtures/jwt_public.pem").to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604_800,
        link_token_expiry: 86_400,
    })
    .unwrap()
}

pub fn config() -> FlowConfig {
    FlowConfig {
        otp_mode: OtpMode::Fixed(OTP),
        otp_ttl_secs: 300,
        multi_device_login: false,
        default_role: "user".into(),
        link_base_url: "http://localhost:3000/".into(),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        let store = MemoryStore::new();
        let outbox = RecordingNotifier::default();
        let flows = IdentityFlows::new(
            store.clone(),
            jwt_service(),
            Arc::new(outbox.clone()),
            config,
        );
        Self {
            store,
            flows,
            outbox,
        }
    }

    pub fn signup_input(&self, contact: &str, device_type: &str) -> SignupInput {
        SignupInput {
            kind: PrincipalKind::User,
            contact: contact.into(),
            country_code: None,
            password: PASSWORD.into(),
            metadata: device(device_type),
        }
    }

    /// Sign up and click the verification link.
    pub async fn verified_user(&self, contact: &str) -> SessionOutput {
        self.flows
            .signup(self.signup_input(contact, "web"))
            .await
            .unwrap();
        let link_id = self.outbox.last().link_id.unwrap();
        self.flows
            .verify_signup(VerifySignupInput {
                link_id,
                metadata: device("web"),
            })
            .await
            .unwrap()
    }
}

pub fn device(device_type: &str) -> RequestMetadata {
    RequestMetadata {
        device_id: Some(format!("{device_type}-device")),
        device_type: Some(device_type.into()),
        device_name: None,
        ip_address: Some("203.0.113.7".into()),
        app_version: Some("1.0.0".into()),
        timezone: Some("UTC".into()),
    }
}
