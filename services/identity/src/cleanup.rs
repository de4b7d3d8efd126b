//! Scheduled token sweep

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::error::IdentityResult;
use crate::ledger::TokenLedger;
use crate::repositories::TokenRepository;

/// Rows touched by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows with at least one side flipped from active to inactive
    pub expired: u64,
    /// Rows deleted because both sides were inactive
    pub purged: u64,
}

#[derive(Clone)]
pub struct TokenSweeper<S> {
    ledger: TokenLedger<S>,
}

impl<S> TokenSweeper<S>
where
    S: TokenRepository + Clone + 'static,
{
    pub fn new(store: S) -> Self {
        Self {
            ledger: TokenLedger::new(store),
        }
    }

    pub async fn run_once(&self) -> IdentityResult<SweepReport> {
        self.run_at(Utc::now()).await
    }

    /// Expire first, then purge. Only ever tightens status, so it can run
    /// alongside live traffic.
    pub async fn run_at(&self, now: DateTime<Utc>) -> IdentityResult<SweepReport> {
        let expired = self.ledger.expire_stale(now).await?;
        let purged = self.ledger.purge_inactive().await?;
        info!(expired, purged, "Token sweep finished");
        Ok(SweepReport { expired, purged })
    }

    /// Register the sweep as a cron job and start the scheduler.
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let sweeper = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(e) = sweeper.run_once().await {
                    error!("Token sweep failed: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started token sweep with schedule: {}", schedule);
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewToken, Principal, TokenKind, TokenSide};
    use crate::repositories::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    async fn seed(store: &MemoryStore, access_ttl: i64, refresh_ttl: Option<i64>) -> String {
        let now = Utc::now();
        let ledger = TokenLedger::new(store.clone());
        let token = ledger
            .issue(NewToken {
                owner: Principal::User(Uuid::new_v4()),
                device_id: None,
                kind: TokenKind::Access,
                access_token: format!("access-{}", Uuid::new_v4()),
                access_token_expiry: now + Duration::seconds(access_ttl),
                refresh_token: refresh_ttl.map(|_| format!("refresh-{}", Uuid::new_v4())),
                refresh_token_expiry: refresh_ttl.map(|ttl| now + Duration::seconds(ttl)),
            })
            .await
            .unwrap();
        token.access_token
    }

    #[tokio::test]
    async fn sweep_expires_then_purges() {
        let store = MemoryStore::new();
        let fully_expired = seed(&store, -10, Some(-5)).await;
        let half_expired = seed(&store, -10, Some(3600)).await;
        let live = seed(&store, 900, Some(3600)).await;
        let access_only = seed(&store, -10, None).await;

        let report = TokenSweeper::new(store.clone()).run_once().await.unwrap();

        assert_eq!(report.expired, 3);
        assert_eq!(report.purged, 2);
        assert_eq!(store.token_count().await, 2);

        let ledger = TokenLedger::new(store.clone());
        assert!(ledger.lookup(&fully_expired, TokenSide::Access).await.unwrap().is_none());
        assert!(ledger.lookup(&access_only, TokenSide::Access).await.unwrap().is_none());
        // refresh side still useful, row kept
        let kept = ledger
            .lookup(&half_expired, TokenSide::Access)
            .await
            .unwrap()
            .unwrap();
        assert!(kept.is_live(TokenSide::Refresh, Utc::now()));
        assert!(ledger.validate(&live, TokenSide::Access).await.unwrap());
    }

    #[tokio::test]
    async fn second_sweep_is_a_no_op() {
        let store = MemoryStore::new();
        seed(&store, -10, Some(-5)).await;
        seed(&store, -10, Some(3600)).await;
        seed(&store, 900, Some(3600)).await;
        let sweeper = TokenSweeper::new(store.clone());

        sweeper.run_once().await.unwrap();
        let rows_after_first = store.token_count().await;
        let second = sweeper.run_once().await.unwrap();

        assert_eq!(second, SweepReport::default());
        assert_eq!(store.token_count().await, rows_after_first);
    }
}
