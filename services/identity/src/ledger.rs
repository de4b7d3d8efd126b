//! Token ledger
//!
//! Every signed token handed to a client has a row here. The signature
//! proves who minted it; the row decides whether it is still usable. Each
//! row has an access side and a refresh side with independent status and
//! expiry.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::IdentityResult;
use crate::models::{ActivityType, NewToken, Principal, RecordStatus, Token, TokenSide};
use crate::repositories::TokenRepository;

#[derive(Clone)]
pub struct TokenLedger<S> {
    store: S,
}

impl<S: TokenRepository> TokenLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist a new token row.
    pub async fn issue(&self, input: NewToken) -> IdentityResult<Token> {
        let token = self.store.insert_token(input).await?;
        info!(
            token_id = %token.id,
            owner = %token.owner,
            kind = token.kind.as_str(),
            "Token issued"
        );
        Ok(token)
    }

    /// Row holding `raw` on `side`, regardless of state.
    pub async fn lookup(&self, raw: &str, side: TokenSide) -> IdentityResult<Option<Token>> {
        Ok(self.store.find_token_by_raw(raw, side).await?)
    }

    /// True only when the side holding `raw` is active and unexpired.
    pub async fn validate(&self, raw: &str, side: TokenSide) -> IdentityResult<bool> {
        self.validate_at(raw, side, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        raw: &str,
        side: TokenSide,
        now: DateTime<Utc>,
    ) -> IdentityResult<bool> {
        let valid = self
            .lookup(raw, side)
            .await?
            .is_some_and(|token| token.is_live(side, now));
        Ok(valid)
    }

    /// Deactivate one side; the other side is left alone.
    pub async fn invalidate(&self, token: &Token, side: TokenSide) -> IdentityResult<bool> {
        let updated = self
            .store
            .update_token_status(token.id, side, RecordStatus::Inactive)
            .await?;
        debug!(token_id = %token.id, ?side, "Token side invalidated");
        Ok(updated)
    }

    /// Spend one side in a single conditional write. Of several callers
    /// racing on the same side, exactly one gets `true`.
    pub async fn consume(&self, token: &Token, side: TokenSide) -> IdentityResult<bool> {
        self.consume_at(token, side, Utc::now()).await
    }

    pub async fn consume_at(
        &self,
        token: &Token,
        side: TokenSide,
        now: DateTime<Utc>,
    ) -> IdentityResult<bool> {
        let spent = self.store.spend_token_side(token.id, side, now).await?;
        if spent {
            debug!(token_id = %token.id, ?side, "Token side consumed");
        }
        Ok(spent)
    }

    /// Pending token recovered from an emailed link.
    pub async fn find_token_record(
        &self,
        link_id: Uuid,
        activity: ActivityType,
    ) -> IdentityResult<Option<Token>> {
        Ok(self.store.find_token_by_link(link_id, activity).await?)
    }

    /// Rows owned by `principal` with at least one live side.
    pub async fn find_active_tokens(&self, principal: Principal) -> IdentityResult<Vec<Token>> {
        Ok(self.store.find_live_tokens(principal, Utc::now()).await?)
    }

    /// Sweep phase one: flip active-but-expired sides to inactive.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> IdentityResult<u64> {
        Ok(self.store.expire_stale_tokens(now).await?)
    }

    /// Sweep phase two: delete rows with both sides inactive.
    pub async fn purge_inactive(&self) -> IdentityResult<u64> {
        Ok(self.store.purge_inactive_tokens().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenKind;
    use crate::repositories::MemoryStore;
    use chrono::Duration;

    fn pair(owner: Principal, access_ttl: i64, refresh_ttl: i64) -> NewToken {
        let now = Utc::now();
        NewToken {
            owner,
            device_id: None,
            kind: TokenKind::Access,
            access_token: format!("access-{}", Uuid::new_v4()),
            access_token_expiry: now + Duration::seconds(access_ttl),
            refresh_token: Some(format!("refresh-{}", Uuid::new_v4())),
            refresh_token_expiry: Some(now + Duration::seconds(refresh_ttl)),
        }
    }

    fn refresh_of(token: &Token) -> &str {
        token.refresh_token.as_deref().unwrap()
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let ledger = TokenLedger::new(MemoryStore::new());
        assert!(!ledger.validate("nope", TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn invalidating_refresh_leaves_access_usable() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        ledger.invalidate(&token, TokenSide::Refresh).await.unwrap();

        assert!(ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
        assert!(!ledger.validate(refresh_of(&token), TokenSide::Refresh).await.unwrap());
    }

    #[tokio::test]
    async fn invalidating_access_leaves_refresh_usable() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::Admin(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        ledger.invalidate(&token, TokenSide::Access).await.unwrap();

        assert!(!ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
        assert!(ledger.validate(refresh_of(&token), TokenSide::Refresh).await.unwrap());
    }

    #[tokio::test]
    async fn active_but_expired_is_invalid() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), -1, 3600))
            .await
            .unwrap();

        assert_eq!(token.access_token_status, RecordStatus::Active);
        assert!(!ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn unexpired_but_inactive_is_invalid() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();
        ledger.invalidate(&token, TokenSide::Access).await.unwrap();

        let row = ledger
            .lookup(&token.access_token, TokenSide::Access)
            .await
            .unwrap()
            .unwrap();
        assert!(row.access_token_expiry > Utc::now());
        assert!(!ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        let at_expiry = token.access_token_expiry;
        assert!(
            !ledger
                .validate_at(&token.access_token, TokenSide::Access, at_expiry)
                .await
                .unwrap()
        );
        assert!(
            ledger
                .validate_at(
                    &token.access_token,
                    TokenSide::Access,
                    at_expiry - Duration::seconds(1)
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn access_string_does_not_validate_as_refresh() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();
        assert!(!ledger.validate(&token.access_token, TokenSide::Refresh).await.unwrap());
    }

    #[tokio::test]
    async fn active_tokens_include_rows_with_one_live_side() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let owner = Principal::User(Uuid::new_v4());

        let live = ledger.issue(pair(owner, -1, 3600)).await.unwrap();
        let dead = ledger.issue(pair(owner, 900, 3600)).await.unwrap();
        ledger.invalidate(&dead, TokenSide::Access).await.unwrap();
        ledger.invalidate(&dead, TokenSide::Refresh).await.unwrap();
        ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        let active = ledger.find_active_tokens(owner).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn consume_spends_a_side_exactly_once() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        assert!(ledger.consume(&token, TokenSide::Refresh).await.unwrap());
        assert!(!ledger.consume(&token, TokenSide::Refresh).await.unwrap());
        assert!(!ledger.validate(refresh_of(&token), TokenSide::Refresh).await.unwrap());
        assert!(ledger.validate(&token.access_token, TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn expired_side_cannot_be_consumed() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, -1))
            .await
            .unwrap();

        assert!(!ledger.consume(&token, TokenSide::Refresh).await.unwrap());
    }

    #[tokio::test]
    async fn racing_consumers_have_a_single_winner() {
        let ledger = TokenLedger::new(MemoryStore::new());
        let token = ledger
            .issue(pair(Principal::User(Uuid::new_v4()), 900, 3600))
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let token = token.clone();
                tokio::spawn(async move { ledger.consume(&token, TokenSide::Refresh).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
