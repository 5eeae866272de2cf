//! Background refund of reservations that were never finalized.
//!
//! A reservation stays `reserved` only while its request is in flight. If the process dies
//! between reserve and finalize the row would hold the user's credits forever, so this task
//! periodically reverts reservations older than `reservations.max_age`. Revert re-checks the
//! status under a row lock, so a request that finalizes at the same moment is never refunded
//! twice.

use super::{Finalized, Ledger, LedgerError};
use crate::config::ReservationsConfig;
use crate::db::models::credits::StaleCursor;
use crate::metrics::{RESERVATIONS_FINALIZED_TOTAL, RESERVATIONS_SWEPT_TOTAL};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct ReservationSweeper {
    ledger: Arc<dyn Ledger>,
    interval: Duration,
    max_age: Duration,
    batch_size: i64,
}

impl ReservationSweeper {
    pub fn new(ledger: Arc<dyn Ledger>, config: &ReservationsConfig) -> Self {
        Self {
            ledger,
            interval: config.sweep_interval,
            max_age: config.max_age,
            batch_size: config.batch_size,
        }
    }

    /// Revert every stale reservation and return how many were refunded.
    ///
    /// Rows are paged oldest first with a keyset cursor, so a row whose refund keeps failing
    /// is passed over instead of blocking the rows behind it.
    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - max_age;

        let mut refunded = 0;
        let mut failed = 0;
        let mut cursor: Option<StaleCursor> = None;
        loop {
            let stale = self.ledger.stale_reservations(cutoff, cursor, self.batch_size).await?;
            let Some(last) = stale.last() else {
                break;
            };
            cursor = Some(StaleCursor::from(last));
            let short_page = (stale.len() as i64) < self.batch_size;

            for txn in stale {
                let cost = -txn.delta;
                match self.ledger.revert(txn.id, txn.user_id, cost).await {
                    Ok(Finalized::Applied) => {
                        warn!(
                            transaction_id = txn.id,
                            user_id = txn.user_id,
                            model = txn.model_name.as_deref().unwrap_or_default(),
                            cost,
                            created_at = %txn.created_at,
                            "Refunded orphaned reservation"
                        );
                        metrics::counter!(RESERVATIONS_FINALIZED_TOTAL, "result" => "swept").increment(1);
                        refunded += 1;
                    }
                    Ok(Finalized::AlreadyFinal) => {
                        debug!(transaction_id = txn.id, "Reservation finalized before sweep");
                    }
                    Err(e) => {
                        error!(transaction_id = txn.id, error = %e, "Failed to refund orphaned reservation");
                        failed += 1;
                    }
                }
            }

            if short_page {
                break;
            }
        }

        if refunded > 0 {
            metrics::counter!(RESERVATIONS_SWEPT_TOTAL).increment(refunded as u64);
        }
        if failed > 0 {
            warn!(failed, "Some orphaned reservations could not be refunded, retrying next sweep");
        }
        Ok(refunded)
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting reservation sweeper (every {:?}, max age {:?})",
            self.interval, self.max_age
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reservation sweeper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Reservation sweep failed");
                    }
                }
            }
        }
    }
}
