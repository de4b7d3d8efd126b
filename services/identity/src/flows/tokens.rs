use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::IdentityFlows;
use crate::error::{IdentityError, IdentityResult};
use crate::jwt::TokenType;
use crate::models::{AccountStatus, ActivityType, Principal, RequestMetadata, Token, TokenSide};
use crate::repositories::IdentityStore;

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
    #[serde(skip)]
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

impl<S: IdentityStore> IdentityFlows<S> {
    /// Rotate a refresh token: the presented one is spent, a new pair is
    /// issued on the same device.
    pub async fn refresh_token(&self, input: RefreshInput) -> IdentityResult<TokenPair> {
        let claims = self
            .jwt
            .validate_token(&input.refresh_token)
            .map_err(|_| IdentityError::invalid_token())?;
        if claims.token_type != TokenType::Refresh {
            return Err(IdentityError::invalid_token());
        }

        let account = self
            .account_for(claims.principal())
            .await?
            .ok_or_else(IdentityError::invalid_token)?;
        if account.status != AccountStatus::Verified {
            return Err(IdentityError::invalid_token());
        }

        let token = self
            .ledger
            .lookup(&input.refresh_token, TokenSide::Refresh)
            .await?
            .filter(|t| t.owner == account.principal)
            .ok_or_else(IdentityError::invalid_token)?;
        // Check and spend in one write so concurrent refreshes cannot both
        // mint a pair.
        if !self.ledger.consume(&token, TokenSide::Refresh).await? {
            debug!(token_id = %token.id, "Refresh with spent or expired token");
            return Err(IdentityError::invalid_token());
        }

        let pair = self.mint_pair(&account).await?;
        self.ledger
            .issue(pair.to_new_token(account.principal, token.device_id))
            .await?;
        self.sessions
            .record_activity(account.principal, ActivityType::RefreshToken, &input.metadata)
            .await?;

        info!(principal = %account.principal, "Refresh token rotated");
        Ok(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
        })
    }

    /// End the session the presented token belongs to.
    pub async fn logout(
        &self,
        principal: Principal,
        raw_token: &str,
        metadata: &RequestMetadata,
    ) -> IdentityResult<()> {
        let token = self
            .owned_token(principal, raw_token)
            .await?
            .ok_or_else(IdentityError::invalid_token)?;

        self.ledger.invalidate(&token, TokenSide::Access).await?;
        if token.refresh_token.is_some() {
            self.ledger.invalidate(&token, TokenSide::Refresh).await?;
        }
        if let Some(device_id) = token.device_id {
            self.store.retire_device(device_id, chrono::Utc::now()).await?;
        }
        self.sessions
            .record_activity(principal, ActivityType::Logout, metadata)
            .await?;

        info!(%principal, token_id = %token.id, "Logged out");
        Ok(())
    }

    /// Row holding `raw` on either side, if it belongs to `principal`.
    async fn owned_token(&self, principal: Principal, raw: &str) -> IdentityResult<Option<Token>> {
        for side in [TokenSide::Access, TokenSide::Refresh] {
            if let Some(token) = self.ledger.lookup(raw, side).await? {
                return Ok((token.owner == principal).then_some(token));
            }
        }
        Ok(None)
    }
}
