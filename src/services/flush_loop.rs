//! Per-session background task persisting accrued time on a fixed interval.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    dao::models::MemberId,
    services::tracker::{FlushOutcome, SessionTracker},
    state::registry::SessionId,
};

/// Handle on a running flush task.
pub(crate) struct FlushTask {
    pub(crate) session_id: SessionId,
    cancel: CancellationToken,
    join: JoinHandle<FlushOutcome>,
}

impl FlushTask {
    /// Spawn the loop for one session. The first tick fires one `period` after spawn.
    pub(crate) fn spawn(
        tracker: SessionTracker,
        member_id: MemberId,
        session_id: SessionId,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run(
            tracker,
            member_id,
            session_id,
            period,
            cancel.clone(),
        ));
        Self {
            session_id,
            cancel,
            join,
        }
    }

    /// Request cancellation and wait for the task, returning the outcome of its last flush.
    pub(crate) async fn stop(self) -> Option<FlushOutcome> {
        self.cancel.cancel();
        match self.join.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "flush task ended abnormally");
                None
            }
        }
    }
}

async fn run(
    tracker: SessionTracker,
    member_id: MemberId,
    session_id: SessionId,
    period: Duration,
    cancel: CancellationToken,
) -> FlushOutcome {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation is only observed here; a flush already in progress runs to completion.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if tracker.flush_session(member_id, session_id).await == FlushOutcome::Gone {
                    debug!(member_id = %member_id, session_id = %session_id, "session no longer open; flush task exiting");
                    return FlushOutcome::Gone;
                }
            }
        }
    }

    tracker.flush_session(member_id, session_id).await
}
