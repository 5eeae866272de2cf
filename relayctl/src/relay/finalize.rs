//! Guaranteed resolution of a request's credit reservation.
//!
//! A [`Settlement`] is created as soon as a request is admitted and owns the reservation (if
//! any) until the request reaches a final outcome. Consuming it through
//! [`Settlement::commit`] or [`Settlement::revert`] resolves the reservation and writes the
//! audit record. If it is dropped unresolved the drop handler finishes it on a spawned task:
//! once a 2xx upstream status has been recorded the request was served and the reservation
//! commits, even if the client hung up before reading the whole body. Before that it reverts.

use crate::audit::{self, AuditSink};
use crate::db::models::api_logs::ApiLogEntry;
use crate::ledger::{Finalized, Ledger};
use crate::metrics::RESERVATIONS_FINALIZED_TOTAL;
use crate::types::{TransactionId, UserId};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Credits held for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub transaction_id: TransactionId,
    pub cost: i64,
}

enum Outcome {
    Succeeded,
    Failed(String),
}

struct Pending {
    ledger: Arc<dyn Ledger>,
    audit: Arc<dyn AuditSink>,
    user_id: UserId,
    model: String,
    ip_address: Option<String>,
    reservation: Option<Reservation>,
    status_code: u16,
}

impl Pending {
    async fn finish(self, outcome: Outcome) {
        let success = matches!(outcome, Outcome::Succeeded);

        if let Some(reservation) = self.reservation {
            let id = reservation.transaction_id;
            if success {
                match self.ledger.commit(id).await {
                    Ok(Finalized::Applied) => {
                        info!(transaction_id = id, user_id = self.user_id, model = %self.model, "Reservation committed");
                        metrics::counter!(RESERVATIONS_FINALIZED_TOTAL, "result" => "committed").increment(1);
                    }
                    Ok(Finalized::AlreadyFinal) => {
                        debug!(transaction_id = id, "Reservation already final, commit skipped");
                    }
                    Err(e) => {
                        // The row stays reserved and is picked up by the sweeper
                        error!(transaction_id = id, user_id = self.user_id, model = %self.model, error = %e, "Failed to commit reservation");
                        metrics::counter!(RESERVATIONS_FINALIZED_TOTAL, "result" => "commit_failed").increment(1);
                    }
                }
            } else {
                match self.ledger.revert(id, self.user_id, reservation.cost).await {
                    Ok(Finalized::Applied) => {
                        info!(
                            transaction_id = id,
                            user_id = self.user_id,
                            model = %self.model,
                            refunded = reservation.cost,
                            "Reservation reverted"
                        );
                        metrics::counter!(RESERVATIONS_FINALIZED_TOTAL, "result" => "reverted").increment(1);
                    }
                    Ok(Finalized::AlreadyFinal) => {
                        debug!(transaction_id = id, "Reservation already final, revert skipped");
                    }
                    Err(e) => {
                        error!(transaction_id = id, user_id = self.user_id, model = %self.model, error = %e, "Failed to revert reservation");
                        metrics::counter!(RESERVATIONS_FINALIZED_TOTAL, "result" => "revert_failed").increment(1);
                    }
                }
            }
        }

        let error_message = match outcome {
            Outcome::Succeeded => None,
            Outcome::Failed(message) => Some(message),
        };
        audit::spawn_record(
            self.audit,
            ApiLogEntry {
                user_id: self.user_id,
                model: self.model,
                status_code: self.status_code,
                success,
                error_message,
                ip_address: self.ip_address,
                created_at: Utc::now(),
            },
        );
    }
}

pub struct Settlement {
    pending: Option<Pending>,
}

impl Settlement {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        audit: Arc<dyn AuditSink>,
        user_id: UserId,
        model: String,
        ip_address: Option<String>,
        reservation: Option<Reservation>,
    ) -> Self {
        Self {
            pending: Some(Pending {
                ledger,
                audit,
                user_id,
                model,
                ip_address,
                reservation,
                status_code: 0,
            }),
        }
    }

    pub fn reservation(&self) -> Option<Reservation> {
        self.pending.as_ref().and_then(|p| p.reservation)
    }

    /// Record the upstream status. A 2xx status makes an abandoned settlement commit.
    pub fn set_status(&mut self, status_code: u16) {
        if let Some(pending) = self.pending.as_mut() {
            pending.status_code = status_code;
        }
    }

    pub async fn commit(mut self, status_code: u16) {
        if let Some(mut pending) = self.pending.take() {
            pending.status_code = status_code;
            pending.finish(Outcome::Succeeded).await;
        }
    }

    /// `status_code` is 0 when no upstream response was received.
    pub async fn revert(mut self, status_code: u16, error: impl Into<String>) {
        if let Some(mut pending) = self.pending.take() {
            pending.status_code = status_code;
            pending.finish(Outcome::Failed(error.into())).await;
        }
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let served = (200..300).contains(&pending.status_code);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if served => {
                debug!(user_id = pending.user_id, model = %pending.model, "Client left after a 2xx response, committing");
                handle.spawn(pending.finish(Outcome::Succeeded));
            }
            Ok(handle) => {
                warn!(user_id = pending.user_id, model = %pending.model, "Request ended before an upstream response, reverting");
                handle.spawn(pending.finish(Outcome::Failed("request ended before the upstream responded".to_string())));
            }
            Err(_) => {
                error!(
                    user_id = pending.user_id,
                    reservation = ?pending.reservation,
                    "No runtime to finalize abandoned reservation; leaving it for the sweeper"
                );
            }
        }
    }
}

/// Wrap a successful upstream body so the reservation is committed once the last chunk has
/// been relayed, and reverted if the upstream body fails. Dropping the stream early drops the
/// settlement, which commits because a 2xx status was already recorded.
pub fn settle_on_completion<S, E>(
    upstream: S,
    mut settlement: Settlement,
    status_code: u16,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    settlement.set_status(status_code);
    futures::stream::unfold(Some((upstream, settlement)), move |state| async move {
        let (mut upstream, settlement) = state?;
        match upstream.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((upstream, settlement)))),
            Some(Err(e)) => {
                settlement.revert(status_code, format!("upstream body failed: {e}")).await;
                Some((Err(std::io::Error::other(e)), None))
            }
            None => {
                settlement.commit(status_code).await;
                None
            }
        }
    })
}
