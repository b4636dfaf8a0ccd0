use tracing::warn;

use crate::{
    dao::models::MemberId,
    dto::stats::{MemberTotalQuery, MemberTotalResponse},
    error::ServiceError,
    state::SharedState,
};

/// Sum the persisted time of a member over the requested window.
pub async fn member_total(
    state: &SharedState,
    member_id: MemberId,
    query: MemberTotalQuery,
) -> Result<MemberTotalResponse, ServiceError> {
    if state.is_degraded() {
        return Err(ServiceError::Degraded);
    }

    let range = query.range();
    let store = state.store();
    let total = state
        .tracker()
        .settings()
        .retry
        .run("member_total", || store.member_total(member_id, range))
        .await
        .inspect_err(|err| warn!(member_id = %member_id, error = %err, "member total query failed"))?;

    Ok(MemberTotalResponse::new(query, total))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::memory::MemoryStore,
        services::tracker::tests::{secs, t0},
        state::{AppState, clock::MonotonicClock},
    };

    #[tokio::test(start_paused = true)]
    async fn totals_reflect_flushed_time_within_the_window() {
        let store = MemoryStore::new();
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store.clone()),
            Arc::new(MonotonicClock::anchored_at(t0())),
            "token".into(),
        );
        let member = MemberId(11);

        state.tracker().join(member).await;
        sleep(secs(125)).await;
        state.tracker().leave(member).await;

        let all = member_total(&state, member, MemberTotalQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total_seconds, 125);
        assert_eq!(all.record_count, 3);

        // 2023-11-14T22:14:20Z is one minute after the join
        let later = member_total(
            &state,
            member,
            MemberTotalQuery {
                from: Some("2023-11-14T22:14:20Z".into()),
                to: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(later.total_seconds, 65);
        assert_eq!(later.from.as_deref(), Some("2023-11-14T22:14:20Z"));
    }

    #[tokio::test]
    async fn degraded_store_is_reported() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MonotonicClock::new()),
            "token".into(),
        );
        state.update_degraded(true);

        let result = member_total(&state, MemberId(1), MemberTotalQuery::default()).await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
    }
}
