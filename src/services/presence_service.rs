//! Presence dispatch: classifies voice-state updates, forwards joins and leaves to the
//! tracker in per-member order, and watches feed connectivity.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, future::join_all};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::TrackingConfig,
    dao::models::{ChannelId, MemberId},
    dto::presence::{PresenceMessage, PresenceReply, PresenceSnapshot, VoiceStateUpdate},
    services::tracker::{JoinOutcome, SessionTracker},
    state::SharedState,
};

/// Finished per-member chains are pruned once the map grows past this size.
const QUEUE_PRUNE_THRESHOLD: usize = 256;

/// How a voice-state update affects tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Untrackable to trackable.
    Join,
    /// Trackable to untrackable.
    Leave,
    /// Between two trackable channels; the session continues.
    Switch,
    /// Between two untrackable states, or from an ignored bot.
    Ignored,
}

/// Rules deciding which channels and members count.
#[derive(Debug, Clone, Default)]
pub struct PresenceFilter {
    excluded: HashSet<ChannelId>,
    ignore_bots: bool,
}

impl From<&TrackingConfig> for PresenceFilter {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            excluded: config.excluded_channels.clone(),
            ignore_bots: config.ignore_bots,
        }
    }
}

impl PresenceFilter {
    /// A channel is trackable when present and not excluded.
    pub fn is_trackable(&self, channel: Option<ChannelId>) -> bool {
        channel.is_some_and(|channel| !self.excluded.contains(&channel))
    }

    /// Map a voice-state update to its effect on tracking.
    pub fn classify(&self, update: &VoiceStateUpdate) -> Transition {
        if update.bot && self.ignore_bots {
            return Transition::Ignored;
        }
        match (
            self.is_trackable(update.before),
            self.is_trackable(update.after),
        ) {
            (false, true) => Transition::Join,
            (true, false) => Transition::Leave,
            (true, true) => Transition::Switch,
            (false, false) => Transition::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberOp {
    Join,
    Leave,
    /// Bring the member in line with a snapshot.
    Reconcile { present: bool },
}

/// Per-feed dispatcher. Operations for one member run in arrival order; different
/// members proceed concurrently. Ordering holds within one feed only, so a deployment
/// runs a single gateway bridge; a second connection is tolerated while a bridge
/// reconnects.
pub struct PresenceDispatcher {
    tracker: SessionTracker,
    filter: PresenceFilter,
    chains: HashMap<MemberId, JoinHandle<()>>,
    /// Connected-feed count; snapshots only leave members while this feed is alone.
    feeds: Option<watch::Receiver<usize>>,
}

impl PresenceDispatcher {
    /// Dispatcher for one feed connection.
    pub fn new(tracker: SessionTracker, filter: PresenceFilter) -> Self {
        Self {
            tracker,
            filter,
            chains: HashMap::new(),
            feeds: None,
        }
    }

    /// Consult `feeds` before a snapshot closes sessions another feed may own.
    pub fn watching(mut self, feeds: watch::Receiver<usize>) -> Self {
        self.feeds = Some(feeds);
        self
    }

    fn is_sole_feed(&self) -> bool {
        self.feeds.as_ref().is_none_or(|feeds| *feeds.borrow() <= 1)
    }

    /// Route one inbound message, returning the reply owed to the feed, if any.
    pub fn handle(&mut self, message: PresenceMessage) -> Option<PresenceReply> {
        match message {
            PresenceMessage::VoiceState(update) => {
                self.voice_state(&update);
                None
            }
            PresenceMessage::Snapshot(snapshot) => Some(self.snapshot(snapshot)),
        }
    }

    fn voice_state(&mut self, update: &VoiceStateUpdate) -> Transition {
        let transition = self.filter.classify(update);
        match transition {
            Transition::Join => self.enqueue(update.member_id, MemberOp::Join),
            Transition::Leave => self.enqueue(update.member_id, MemberOp::Leave),
            Transition::Switch | Transition::Ignored => {
                debug!(member_id = %update.member_id, ?transition, "voice state change does not affect tracking");
            }
        }
        transition
    }

    fn snapshot(&mut self, snapshot: PresenceSnapshot) -> PresenceReply {
        let present: HashSet<MemberId> = snapshot
            .members
            .iter()
            .filter(|entry| !(entry.bot && self.filter.ignore_bots))
            .filter(|entry| self.filter.is_trackable(Some(entry.channel)))
            .map(|entry| entry.member_id)
            .collect();
        let tracked: HashSet<MemberId> = self
            .tracker
            .tracked()
            .into_iter()
            .map(|session| session.member_id)
            .collect();

        let sole_feed = self.is_sole_feed();
        if !sole_feed {
            info!("other presence feeds connected; snapshot only opens sessions");
        }
        let joining: Vec<MemberId> = present.difference(&tracked).copied().collect();
        let leaving: Vec<MemberId> = if sole_feed {
            tracked.difference(&present).copied().collect()
        } else {
            Vec::new()
        };

        for &member_id in &joining {
            self.enqueue(member_id, MemberOp::Reconcile { present: true });
        }
        for &member_id in &leaving {
            self.enqueue(member_id, MemberOp::Reconcile { present: false });
        }
        let (joining, leaving) = (joining.len(), leaving.len());

        info!(
            present = present.len(),
            joining, leaving, "presence snapshot received"
        );
        PresenceReply::SnapshotAccepted { joining, leaving }
    }

    fn enqueue(&mut self, member_id: MemberId, op: MemberOp) {
        if self.chains.len() >= QUEUE_PRUNE_THRESHOLD {
            self.chains.retain(|_, handle| !handle.is_finished());
        }

        let previous = self.chains.remove(&member_id);
        let tracker = self.tracker.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run_op(&tracker, member_id, op).await;
        });
        self.chains.insert(member_id, handle);
    }

    /// Wait for every queued operation to complete.
    pub async fn finish(self) {
        for result in join_all(self.chains.into_values()).await {
            if let Err(err) = result {
                error!(error = %err, "presence operation panicked");
            }
        }
    }
}

async fn run_op(tracker: &SessionTracker, member_id: MemberId, op: MemberOp) {
    let join = match op {
        MemberOp::Join => true,
        MemberOp::Leave => false,
        MemberOp::Reconcile { present } => {
            let tracked = tracker.session(member_id).is_some();
            if present == tracked {
                return;
            }
            present
        }
    };

    if join {
        if tracker.join(member_id).await == JoinOutcome::Rejected {
            debug!(member_id = %member_id, "join rejected while shutting down");
        }
    } else {
        tracker.leave(member_id).await;
    }
}

/// Handle the full lifecycle of one presence feed connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps replies flowing while inbound frames are processed.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    state.feeds().attach();
    info!(feeds = state.feeds().connected(), "presence feed connected");

    let mut dispatcher = PresenceDispatcher::new(state.tracker().clone(), state.presence().clone())
        .watching(state.feeds().watcher());
    send_reply(
        &outbound_tx,
        &PresenceReply::Ready {
            open_sessions: state.tracker().open_sessions(),
        },
    );

    loop {
        let message = tokio::select! {
            _ = state.stopping().cancelled() => {
                info!("server stopping; closing presence feed");
                let _ = outbound_tx.send(Message::Close(None));
                break;
            }
            message = receiver.next() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<PresenceMessage>(&text) {
                Ok(message) => {
                    if let Some(reply) = dispatcher.handle(message) {
                        send_reply(&outbound_tx, &reply);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to parse presence message");
                    send_reply(
                        &outbound_tx,
                        &PresenceReply::Error {
                            message: err.to_string(),
                        },
                    );
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!("presence feed closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(error = %err, "presence websocket error");
                break;
            }
        }
    }

    dispatcher.finish().await;
    state.feeds().detach();
    info!(feeds = state.feeds().connected(), "presence feed disconnected");

    drop(outbound_tx);
    let _ = writer_task.await;
}

fn send_reply(outbound_tx: &mpsc::UnboundedSender<Message>, reply: &PresenceReply) {
    match serde_json::to_string(reply) {
        Ok(text) => {
            let _ = outbound_tx.send(Message::Text(text.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize presence reply"),
    }
}

/// Watch feed connectivity. Once a feed has connected, losing every feed for longer than
/// the grace period either flags the process for shutdown or drains open sessions.
pub async fn watch_feeds(state: SharedState) {
    let grace = state.config().feed.grace_period;
    let shutdown_on_loss = state.config().feed.shutdown_on_loss;
    let mut feeds = state.feeds().watcher();

    if feeds.wait_for(|count| *count > 0).await.is_err() {
        return;
    }

    loop {
        if feeds.wait_for(|count| *count == 0).await.is_err() {
            return;
        }
        warn!(grace_secs = grace.as_secs(), "all presence feeds disconnected; waiting for a reconnect");

        let reconnected = timeout(grace, feeds.wait_for(|count| *count > 0))
            .await
            .map(|changed| changed.is_ok());
        match reconnected {
            Ok(true) => {
                info!("presence feed reconnected within the grace period");
                continue;
            }
            Ok(false) => return,
            Err(_) => {}
        }

        if shutdown_on_loss {
            error!("presence feed lost; shutting down");
            state.feeds().mark_lost();
            return;
        }

        let report = state.tracker().drain().await;
        warn!(
            sessions_closed = report.sessions_closed,
            "presence feed lost; drained open sessions"
        );
        if feeds.wait_for(|count| *count > 0).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::memory::MemoryStore,
        dto::presence::VoicePresence,
        services::tracker::tests::{secs, t0, tracker_with},
        state::{AppState, clock::MonotonicClock, feed::FeedMonitor},
    };

    fn update(member: u64, before: Option<ChannelId>, after: Option<ChannelId>) -> VoiceStateUpdate {
        VoiceStateUpdate {
            member_id: MemberId(member),
            before,
            after,
            bot: false,
        }
    }

    fn filter() -> PresenceFilter {
        PresenceFilter {
            excluded: HashSet::from([99]),
            ignore_bots: true,
        }
    }

    #[test]
    fn classifies_transitions() {
        let filter = filter();
        assert_eq!(filter.classify(&update(1, None, Some(1))), Transition::Join);
        assert_eq!(filter.classify(&update(1, Some(99), Some(1))), Transition::Join);
        assert_eq!(filter.classify(&update(1, Some(1), None)), Transition::Leave);
        assert_eq!(filter.classify(&update(1, Some(1), Some(99))), Transition::Leave);
        assert_eq!(filter.classify(&update(1, Some(1), Some(2))), Transition::Switch);
        assert_eq!(filter.classify(&update(1, None, Some(99))), Transition::Ignored);
        assert_eq!(filter.classify(&update(1, Some(1), Some(1))), Transition::Switch);
    }

    #[test]
    fn bots_are_ignored_unless_configured() {
        let bot = VoiceStateUpdate {
            bot: true,
            ..update(1, None, Some(1))
        };
        assert_eq!(filter().classify(&bot), Transition::Ignored);

        let counting_bots = PresenceFilter {
            ignore_bots: false,
            ..filter()
        };
        assert_eq!(counting_bots.classify(&bot), Transition::Join);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_keeps_per_member_order() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        let mut dispatcher = PresenceDispatcher::new(tracker.clone(), filter());

        dispatcher.handle(PresenceMessage::VoiceState(update(1, None, Some(1))));
        dispatcher.handle(PresenceMessage::VoiceState(update(1, Some(1), Some(2))));
        dispatcher.handle(PresenceMessage::VoiceState(update(2, None, Some(1))));
        sleep(secs(20)).await;
        dispatcher.handle(PresenceMessage::VoiceState(update(1, Some(2), None)));
        dispatcher.handle(PresenceMessage::VoiceState(update(1, None, Some(3))));
        dispatcher.finish().await;

        let records = store.records_for(MemberId(1));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start_time, t0());
        assert_eq!(records[0].duration_seconds, 20);
        assert_eq!(
            tracker.session(MemberId(1)).unwrap().started_at,
            t0() + secs(20)
        );
        assert!(tracker.session(MemberId(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reconciles_tracked_members() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.join(MemberId(1)).await;
        tracker.join(MemberId(2)).await;
        let kept = tracker.session(MemberId(2)).unwrap().id;
        sleep(secs(5)).await;

        let mut dispatcher = PresenceDispatcher::new(tracker.clone(), filter());
        let reply = dispatcher.handle(PresenceMessage::Snapshot(PresenceSnapshot {
            members: vec![
                VoicePresence {
                    member_id: MemberId(2),
                    channel: 1,
                    bot: false,
                },
                VoicePresence {
                    member_id: MemberId(3),
                    channel: 1,
                    bot: false,
                },
                VoicePresence {
                    member_id: MemberId(4),
                    channel: 99,
                    bot: false,
                },
                VoicePresence {
                    member_id: MemberId(5),
                    channel: 1,
                    bot: true,
                },
            ],
        }));
        dispatcher.finish().await;

        assert_eq!(
            reply,
            Some(PresenceReply::SnapshotAccepted {
                joining: 1,
                leaving: 1
            })
        );
        let members: Vec<MemberId> = tracker.tracked().iter().map(|s| s.member_id).collect();
        assert_eq!(members, vec![MemberId(2), MemberId(3)]);
        assert_eq!(tracker.session(MemberId(2)).unwrap().id, kept);
        assert_eq!(store.records_for(MemberId(1))[0].duration_seconds, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_keeps_sessions_while_other_feeds_are_connected() {
        let store = MemoryStore::new();
        let tracker = tracker_with(&store);
        tracker.join(MemberId(1)).await;
        let feeds = FeedMonitor::new();
        feeds.attach();
        feeds.attach();

        let mut dispatcher =
            PresenceDispatcher::new(tracker.clone(), filter()).watching(feeds.watcher());
        let snapshot = PresenceSnapshot {
            members: vec![VoicePresence {
                member_id: MemberId(2),
                channel: 1,
                bot: false,
            }],
        };
        let reply = dispatcher.handle(PresenceMessage::Snapshot(snapshot.clone()));
        dispatcher.finish().await;

        assert_eq!(
            reply,
            Some(PresenceReply::SnapshotAccepted {
                joining: 1,
                leaving: 0
            })
        );
        assert!(tracker.session(MemberId(1)).is_some());
        assert!(tracker.session(MemberId(2)).is_some());

        feeds.detach();
        let mut dispatcher =
            PresenceDispatcher::new(tracker.clone(), filter()).watching(feeds.watcher());
        let reply = dispatcher.handle(PresenceMessage::Snapshot(snapshot));
        dispatcher.finish().await;

        assert_eq!(
            reply,
            Some(PresenceReply::SnapshotAccepted {
                joining: 0,
                leaving: 1
            })
        );
        assert!(tracker.session(MemberId(1)).is_none());
    }

    fn app_state(shutdown_on_loss: bool) -> SharedState {
        let mut config = AppConfig::default();
        config.feed.shutdown_on_loss = shutdown_on_loss;
        AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MonotonicClock::anchored_at(t0())),
            "token".into(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn feed_loss_past_grace_flags_shutdown() {
        let state = app_state(true);
        let lost = state.feeds().lost_watcher();
        tokio::spawn(watch_feeds(state.clone()));

        state.feeds().attach();
        sleep(secs(1)).await;
        state.feeds().detach();
        sleep(secs(10)).await;
        // a reconnect inside the grace period resets the timer
        state.feeds().attach();
        sleep(secs(60)).await;
        assert!(!*lost.borrow());

        state.feeds().detach();
        sleep(state.config().feed.grace_period + secs(1)).await;
        assert!(*lost.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn feed_loss_drains_when_not_shutting_down() {
        let state = app_state(false);
        let lost = state.feeds().lost_watcher();
        tokio::spawn(watch_feeds(state.clone()));

        state.feeds().attach();
        state.tracker().join(MemberId(1)).await;
        sleep(secs(1)).await;
        state.feeds().detach();
        sleep(secs(31)).await;

        assert_eq!(state.tracker().open_sessions(), 0);
        assert!(!*lost.borrow());
        assert!(state.tracker().is_accepting().await);
    }
}
