//! Device/session tracking and the single-session policy

use chrono::Utc;
use tracing::{info, warn};

use crate::error::IdentityResult;
use crate::ledger::TokenLedger;
use crate::models::{
    ActivityType, DeviceSession, LinkSession, LinkSessionWrite, NewDeviceSession, NewToken,
    Principal, RequestMetadata, Token, TokenSide,
};
use crate::repositories::{DeviceRepository, TokenRepository};

/// Records device activity and retires sessions when only one may live
#[derive(Clone)]
pub struct SessionTracker<S> {
    store: S,
    ledger: TokenLedger<S>,
    multi_device_login: bool,
}

impl<S> SessionTracker<S>
where
    S: DeviceRepository + TokenRepository + Clone,
{
    pub fn new(store: S, multi_device_login: bool) -> Self {
        Self {
            ledger: TokenLedger::new(store.clone()),
            store,
            multi_device_login,
        }
    }

    pub fn multi_device_login(&self) -> bool {
        self.multi_device_login
    }

    /// Append a device row for an auth-relevant action.
    ///
    /// Logout rows are recorded inactive.
    pub async fn record_activity(
        &self,
        principal: Principal,
        activity: ActivityType,
        metadata: &RequestMetadata,
    ) -> IdentityResult<DeviceSession> {
        let device = self
            .store
            .insert_device(NewDeviceSession {
                owner: principal,
                metadata: metadata.clone(),
                activity_type: activity,
                is_active: activity != ActivityType::Logout,
                link_id: None,
            })
            .await?;

        info!(
            owner = %principal,
            device_session = %device.id,
            activity = activity.as_str(),
            "Activity recorded"
        );
        Ok(device)
    }

    /// Record an activity row and the token pair bound to it, in one write.
    pub async fn open_session(
        &self,
        principal: Principal,
        activity: ActivityType,
        metadata: &RequestMetadata,
        token: NewToken,
    ) -> IdentityResult<(DeviceSession, Token)> {
        let (device, token) = self
            .store
            .open_session(
                NewDeviceSession {
                    owner: principal,
                    metadata: metadata.clone(),
                    activity_type: activity,
                    is_active: true,
                    link_id: None,
                },
                token,
            )
            .await?;

        info!(
            owner = %principal,
            device_session = %device.id,
            token_id = %token.id,
            activity = activity.as_str(),
            "Session opened"
        );
        Ok((device, token))
    }

    /// Kill every live session of `principal` unless multi-device login is on.
    ///
    /// Tokens are invalidated before their device rows are retired, so an
    /// interruption leaves extra logouts, never a surviving session.
    /// Returns the number of token rows invalidated.
    pub async fn enforce_single_session(&self, principal: Principal) -> IdentityResult<usize> {
        if self.multi_device_login {
            return Ok(0);
        }

        let tokens = self.ledger.find_active_tokens(principal).await?;
        for token in &tokens {
            self.ledger.invalidate(token, TokenSide::Access).await?;
            if token.refresh_token.is_some() {
                self.ledger.invalidate(token, TokenSide::Refresh).await?;
            }
        }

        let now = Utc::now();
        for device_id in tokens.iter().filter_map(|t| t.device_id) {
            if !self.store.retire_device(device_id, now).await? {
                warn!(%device_id, "Token referenced a missing device session");
            }
        }

        if !tokens.is_empty() {
            info!(owner = %principal, revoked = tokens.len(), "Prior sessions revoked");
        }
        Ok(tokens.len())
    }

    /// Create or refresh the device row and pending token behind an
    /// emailed link, in one write.
    pub async fn open_link_session(&self, input: LinkSessionWrite) -> IdentityResult<LinkSession> {
        let activity = input.activity_type;
        let session = self.store.upsert_link_session(input).await?;
        info!(
            owner = %session.device.owner,
            device_session = %session.device.id,
            activity = activity.as_str(),
            reused = !session.created,
            "Link session opened"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenKind;
    use crate::repositories::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    async fn login_on(
        tracker: &SessionTracker<MemoryStore>,
        ledger: &TokenLedger<MemoryStore>,
        owner: Principal,
        device_type: &str,
    ) -> Token {
        let metadata = RequestMetadata {
            device_type: Some(device_type.into()),
            ..Default::default()
        };
        let now = Utc::now();
        let (device, token) = tracker
            .open_session(
                owner,
                ActivityType::Login,
                &metadata,
                NewToken {
                    owner,
                    device_id: None,
                    kind: TokenKind::Access,
                    access_token: format!("access-{}", Uuid::new_v4()),
                    access_token_expiry: now + Duration::minutes(15),
                    refresh_token: Some(format!("refresh-{}", Uuid::new_v4())),
                    refresh_token_expiry: Some(now + Duration::days(7)),
                },
            )
            .await
            .unwrap();
        assert_eq!(token.device_id, Some(device.id));
        assert!(ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
        token
    }

    #[tokio::test]
    async fn single_session_revokes_previous_device() {
        let store = MemoryStore::new();
        let tracker = SessionTracker::new(store.clone(), false);
        let ledger = TokenLedger::new(store.clone());
        let owner = Principal::User(Uuid::new_v4());

        let device_a = login_on(&tracker, &ledger, owner, "ios").await;
        assert_eq!(tracker.enforce_single_session(owner).await.unwrap(), 1);
        let device_b = login_on(&tracker, &ledger, owner, "web").await;

        let active = ledger.find_active_tokens(owner).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, device_b.id);
        assert!(
            !ledger
                .validate(&device_a.access_token, TokenSide::Access)
                .await
                .unwrap()
        );

        let retired = store
            .find_device(device_a.device_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(!retired.is_active);
        assert_eq!(retired.activity_type, ActivityType::Logout);
    }

    #[tokio::test]
    async fn multi_device_login_keeps_previous_sessions() {
        let store = MemoryStore::new();
        let tracker = SessionTracker::new(store.clone(), true);
        let ledger = TokenLedger::new(store.clone());
        let owner = Principal::User(Uuid::new_v4());

        let device_a = login_on(&tracker, &ledger, owner, "ios").await;
        assert_eq!(tracker.enforce_single_session(owner).await.unwrap(), 0);
        login_on(&tracker, &ledger, owner, "web").await;

        assert!(
            ledger
                .validate(&device_a.access_token, TokenSide::Access)
                .await
                .unwrap()
        );
        assert_eq!(ledger.find_active_tokens(owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn enforcement_only_touches_the_given_principal() {
        let store = MemoryStore::new();
        let tracker = SessionTracker::new(store.clone(), false);
        let ledger = TokenLedger::new(store.clone());
        let alice = Principal::User(Uuid::new_v4());
        let bob = Principal::Admin(Uuid::new_v4());

        login_on(&tracker, &ledger, alice, "ios").await;
        let bobs = login_on(&tracker, &ledger, bob, "ios").await;
        tracker.enforce_single_session(alice).await.unwrap();

        assert!(ledger.validate(&bobs.access_token, TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn logout_activity_is_recorded_inactive() {
        let store = MemoryStore::new();
        let tracker = SessionTracker::new(store.clone(), false);
        let owner = Principal::User(Uuid::new_v4());

        let device = tracker
            .record_activity(owner, ActivityType::Logout, &RequestMetadata::default())
            .await
            .unwrap();
        assert!(!device.is_active);
        assert_eq!(store.devices_for(owner).await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_link_request_reuses_device_row() {
        let store = MemoryStore::new();
        let tracker = SessionTracker::new(store.clone(), false);
        let owner = Principal::User(Uuid::new_v4());
        let metadata = RequestMetadata {
            device_type: Some("android".into()),
            ..Default::default()
        };
        let write = |link_id: Uuid, raw: &str| LinkSessionWrite {
            owner,
            metadata: metadata.clone(),
            activity_type: ActivityType::Signup,
            link_id,
            token_kind: TokenKind::Verify,
            access_token: raw.to_string(),
            access_token_expiry: Utc::now() + Duration::days(1),
        };

        let first_link = Uuid::new_v4();
        let first = tracker
            .open_link_session(write(first_link, "verify-1"))
            .await
            .unwrap();
        let second_link = Uuid::new_v4();
        let second = tracker
            .open_link_session(write(second_link, "verify-2"))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.device.id, second.device.id);
        assert_eq!(first.token.id, second.token.id);
        assert_eq!(store.devices_for(owner).await.len(), 1);
        assert_eq!(store.token_count().await, 1);

        let ledger = TokenLedger::new(store.clone());
        assert!(
            ledger
                .find_token_record(first_link, ActivityType::Signup)
                .await
                .unwrap()
                .is_none()
        );
        let pending = ledger
            .find_token_record(second_link, ActivityType::Signup)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.access_token, "verify-2");
    }
}
