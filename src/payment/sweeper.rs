//! Settlement Retry Sweeper
//!
//! Background worker that re-attempts settlement for FAILED transactions and
//! reconciles transactions abandoned mid-flight by a crashed or disconnected
//! orchestrator. Runs independently of any request; all coordination with
//! live requests goes through the ledger's row-claim semantics.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::billing::WebhookLedger;
use crate::config::SweeperConfig;

use super::facilitator::{SettlementFacilitator, SettlementRequest};
use super::ledger::PaymentLedger;
use super::state::PaymentState;

/// Settlement Sweeper
///
/// One pass claims retryable rows under `FOR UPDATE SKIP LOCKED` and retries
/// settlement inside the claim transaction; a second, simpler pass expires
/// overdue reservations; a third purges aged webhook claims.
pub struct SettlementSweeper {
    ledger: Arc<PaymentLedger>,
    facilitator: Arc<dyn SettlementFacilitator>,
    webhooks: Arc<WebhookLedger>,
    config: SweeperConfig,
}

impl SettlementSweeper {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        facilitator: Arc<dyn SettlementFacilitator>,
        webhooks: Arc<WebhookLedger>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            ledger,
            facilitator,
            webhooks,
            config,
        }
    }

    /// Run the sweeper loop until shutdown is signalled. The current sweep
    /// always drains before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            stale_threshold_secs = self.config.stale_threshold_secs,
            max_attempts = self.config.max_attempts,
            "Starting settlement sweeper"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_passes().await;
                }
                _ = shutdown.changed() => {
                    info!("Settlement sweeper shutting down");
                    break;
                }
            }
        }
    }

    async fn run_passes(&self) {
        match self.sweep_settlements().await {
            Ok(0) => debug!("No retryable transactions found"),
            Ok(n) => info!(count = n, "Sweeper processed transactions"),
            Err(e) => error!(error = %e, "Settlement sweep failed"),
        }

        match self
            .ledger
            .expire_overdue(Duration::from_secs(self.config.stale_threshold_secs))
            .await
        {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Expired overdue reservations"),
            Err(e) => error!(error = %e, "Expiry pass failed"),
        }

        let retention =
            Duration::from_secs(self.config.webhook_retention_days * 24 * 60 * 60);
        match self.webhooks.purge(retention).await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "Purged aged webhook claims"),
            Err(e) => error!(error = %e, "Webhook purge failed"),
        }
    }

    /// One settlement-retry pass. Claimed rows stay locked until the claim
    /// transaction commits, so a crash mid-retry leaves them locked rather
    /// than corrupted, and concurrent sweeper instances skip them.
    pub async fn sweep_settlements(&self) -> Result<usize, super::error::PaymentError> {
        let (mut tx, records) = self
            .ledger
            .claim_for_retry(
                self.config.max_attempts,
                self.config.batch_size,
                Duration::from_secs(self.config.stale_threshold_secs),
            )
            .await?;

        if records.is_empty() {
            tx.rollback().await.ok();
            return Ok(0);
        }

        info!(count = records.len(), "Claimed transactions for settlement retry");

        let mut processed = 0;
        for record in &records {
            debug!(
                nonce = %record.nonce,
                state = %record.state,
                attempt_count = record.attempt_count,
                "Retrying settlement"
            );

            // FAILED rows re-enter SETTLING first; stale SETTLING rows are
            // already there.
            if record.state == PaymentState::Failed
                && !PaymentLedger::retry_settlement_in(&mut tx, &record.id).await?
            {
                warn!(nonce = %record.nonce, "Claimed row changed state under lock");
                continue;
            }

            let request = SettlementRequest::from_payload(&record.payload);
            match self.facilitator.settle(&request).await {
                Ok(outcome) if outcome.success => {
                    let settlement_id = outcome
                        .transaction
                        .unwrap_or_else(|| "unidentified".to_string());
                    if PaymentLedger::complete_in(&mut tx, &record.id, &settlement_id).await? {
                        info!(
                            nonce = %record.nonce,
                            settlement_id = %settlement_id,
                            "Sweeper settled transaction"
                        );
                        processed += 1;
                    } else {
                        warn!(nonce = %record.nonce, "Completion lost CAS inside claim");
                    }
                }
                Ok(outcome) => {
                    let reason = outcome
                        .error_reason
                        .unwrap_or_else(|| "settlement rejected".to_string());
                    self.record_failure(&mut tx, record, &reason).await?;
                    processed += 1;
                }
                Err(err) => {
                    self.record_failure(&mut tx, record, &err.to_string()).await?;
                    processed += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(processed)
    }

    async fn record_failure(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        record: &super::types::PaymentTransaction,
        reason: &str,
    ) -> Result<(), super::error::PaymentError> {
        if !PaymentLedger::fail_settlement_in(tx, &record.id, reason).await? {
            warn!(nonce = %record.nonce, "Fail-settlement lost CAS inside claim");
            return Ok(());
        }

        let attempts = record.attempt_count + 1;
        if attempts >= self.config.max_attempts {
            warn!(
                nonce = %record.nonce,
                attempts = attempts,
                reason = %reason,
                "Attempt budget exhausted; transaction left for manual intervention"
            );
        } else {
            debug!(nonce = %record.nonce, attempts = attempts, "Settlement retry failed");
        }
        Ok(())
    }
}
