//! Conversation synchronization engine
//!
//! The polling loop that keeps the local message view equal to the
//! server's, decides when an arriving counterpart message warrants an
//! alert, and drives the post-send refresh. The server list is the truth:
//! every successful poll replaces the view wholesale, with no client-side
//! merging or sorting.

use crate::api::ChatApi;
use crate::error::{Error, Result};
use crate::messages::Message;
use crate::platform::{PlatformDelivery, SessionRouter};
use crate::upload::{UploadError, UploadPipeline};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Polling,
    Settled,
    /// 403: the account is not yet cleared to chat
    Locked,
    /// 401: the session token stopped working mid-conversation
    Unauthorized,
}

/// Per-conversation client state.
///
/// Created on entering a conversation, discarded on leaving it. The two
/// flags live here rather than in module state so several conversations
/// can never bleed into each other.
pub struct ConversationSession {
    pub conversation_id: String,
    messages: Vec<Message>,
    state: SyncState,
    /// Suppresses the alert for the resync caused by our own send
    pending_self_send: bool,
    /// A session can navigate away at most once
    redirect_fired: bool,
}

impl ConversationSession {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            state: SyncState::Idle,
            pending_self_send: false,
            redirect_fired: false,
        }
    }

    /// The current view, in server order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn notification_suppressed(&self) -> bool {
        self.pending_self_send
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Replaced {
        total: usize,
        new_from_counterparty: usize,
        notified: bool,
    },
    Locked,
    Unauthorized,
    /// Transient failure, swallowed; the next tick will try again
    Failed,
}

pub struct SyncEngine<A, D, R> {
    api: A,
    delivery: D,
    router: R,
}

impl<A: ChatApi, D: PlatformDelivery, R: SessionRouter> SyncEngine<A, D, R> {
    pub fn new(api: A, delivery: D, router: R) -> Self {
        Self {
            api,
            delivery,
            router,
        }
    }

    /// One fetch-and-reconcile pass.
    ///
    /// Auth failures park the session in `Locked`/`Unauthorized` without
    /// touching the existing view and without surfacing an error; an
    /// unapproved chat must not blank the screen or bounce the user out.
    /// Anything else is logged and retried on the next tick.
    pub async fn poll(&self, session: &mut ConversationSession) -> PollOutcome {
        session.state = SyncState::Polling;
        let result = self.api.fetch_messages(&session.conversation_id).await;

        // the gate lasts exactly one evaluated cycle, success or failure
        let suppressed = std::mem::take(&mut session.pending_self_send);

        match result {
            Ok(fresh) => {
                let previous_len = session.messages.len();
                let new_from_counterparty = {
                    let known: HashSet<&str> =
                        session.messages.iter().map(|m| m.id.as_str()).collect();
                    fresh
                        .iter()
                        .filter(|m| m.is_from_counterparty() && !known.contains(m.id.as_str()))
                        .count()
                };
                // one alert per cycle no matter how many arrived in the batch
                let notified = fresh.len() > previous_len
                    && previous_len > 0
                    && new_from_counterparty > 0
                    && !suppressed;

                session.messages = fresh;
                session.state = SyncState::Settled;
                if notified {
                    self.delivery.alert();
                }
                PollOutcome::Replaced {
                    total: session.messages.len(),
                    new_from_counterparty,
                    notified,
                }
            }
            Err(err) if err.is_session_invalid() => {
                debug!(
                    conversation = %session.conversation_id,
                    "poll unauthorized, keeping current view"
                );
                session.state = SyncState::Unauthorized;
                PollOutcome::Unauthorized
            }
            Err(err) if err.is_access_pending() => {
                debug!(
                    conversation = %session.conversation_id,
                    "chat locked, keeping current view"
                );
                session.state = SyncState::Locked;
                PollOutcome::Locked
            }
            Err(err) => {
                warn!(error = %err, "poll failed, will retry next tick");
                session.state = SyncState::Settled;
                PollOutcome::Failed
            }
        }
    }

    /// Post a text message, then refresh immediately so the sender sees it
    /// without waiting for the next timer tick.
    pub async fn send_text(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> Result<PollOutcome> {
        // gate up before the post: the echo in the resync is ours
        session.pending_self_send = true;
        let send_result = self.api.send_text(&session.conversation_id, text).await;
        let outcome = self.poll(session).await;

        match send_result {
            Ok(()) => Ok(outcome),
            Err(err) => {
                self.route_auth_condition(session, &err);
                Err(err)
            }
        }
    }

    /// Upload an attachment through `uploader`, then refresh on success.
    pub async fn upload(
        &self,
        session: &mut ConversationSession,
        uploader: &UploadPipeline,
        path: &Path,
        mime: Option<&str>,
    ) -> std::result::Result<PollOutcome, UploadError> {
        session.pending_self_send = true;
        match uploader.upload(&session.conversation_id, path, mime).await {
            Ok(_kind) => Ok(self.poll(session).await),
            Err(err) => {
                // no resync happened, so drop the gate by hand
                session.pending_self_send = false;
                match &err {
                    UploadError::SessionInvalid => self.fire_sign_in(session),
                    UploadError::AccessPending => self.fire_awaiting_access(session),
                    _ => {}
                }
                Err(err)
            }
        }
    }

    fn route_auth_condition(&self, session: &mut ConversationSession, err: &Error) {
        if err.is_session_invalid() {
            self.fire_sign_in(session);
        } else if err.is_access_pending() {
            self.fire_awaiting_access(session);
        }
    }

    fn fire_sign_in(&self, session: &mut ConversationSession) {
        if !session.redirect_fired {
            session.redirect_fired = true;
            self.router.force_sign_in();
        }
    }

    fn fire_awaiting_access(&self, session: &mut ConversationSession) {
        if !session.redirect_fired {
            session.redirect_fired = true;
            self.router.show_awaiting_access();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageKind, Sender};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn msg(id: &str, sender: Sender) -> Message {
        Message {
            id: id.to_string(),
            sender,
            body: format!("message {}", id),
            kind: MessageKind::Text,
            attachment: None,
            created_at: Utc::now(),
        }
    }

    fn http(status: u16) -> Error {
        Error::Http {
            status,
            code: None,
            message: None,
        }
    }

    /// Serves scripted fetch results in order; repeats empty once drained.
    struct ScriptedApi {
        fetches: Mutex<VecDeque<Result<Vec<Message>>>>,
        sent: Mutex<Vec<String>>,
        send_result: Mutex<Option<Error>>,
    }

    impl ScriptedApi {
        fn new(fetches: Vec<Result<Vec<Message>>>) -> Self {
            Self {
                fetches: Mutex::new(fetches.into()),
                sent: Mutex::new(Vec::new()),
                send_result: Mutex::new(None),
            }
        }

        fn fail_next_send(&self, err: Error) {
            *self.send_result.lock().unwrap() = Some(err);
        }
    }

    impl ChatApi for ScriptedApi {
        async fn fetch_messages(&self, _conversation_id: &str) -> Result<Vec<Message>> {
            self.fetches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn send_text(&self, _conversation_id: &str, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            match self.send_result.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct StubDelivery {
        alerts: Arc<AtomicUsize>,
    }

    impl PlatformDelivery for StubDelivery {
        fn share(&self, _path: &Path, _mime: &str) -> Result<()> {
            Ok(())
        }

        fn alert(&self) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct StubRouter {
        sign_ins: Arc<AtomicUsize>,
        waits: Arc<AtomicUsize>,
    }

    impl SessionRouter for StubRouter {
        fn force_sign_in(&self) {
            self.sign_ins.fetch_add(1, Ordering::SeqCst);
        }

        fn show_awaiting_access(&self) {
            self.waits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_engine(
        fetches: Vec<Result<Vec<Message>>>,
    ) -> (
        SyncEngine<ScriptedApi, StubDelivery, StubRouter>,
        StubDelivery,
        StubRouter,
    ) {
        let delivery = StubDelivery::default();
        let router = StubRouter::default();
        (
            SyncEngine::new(ScriptedApi::new(fetches), delivery.clone(), router.clone()),
            delivery,
            router,
        )
    }

    #[tokio::test]
    async fn test_first_load_is_silent() {
        let (engine, delivery, _) = make_engine(vec![Ok(vec![
            msg("1", Sender::Counterparty),
            msg("2", Sender::Counterparty),
        ])]);
        let mut session = ConversationSession::new("c1");

        let outcome = engine.poll(&mut session).await;

        assert_eq!(
            outcome,
            PollOutcome::Replaced {
                total: 2,
                new_from_counterparty: 2,
                notified: false
            }
        );
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SyncState::Settled);
    }

    #[tokio::test]
    async fn test_batch_of_new_counterpart_messages_alerts_once() {
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Counterparty),
                msg("3", Sender::Counterparty),
            ]),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.poll(&mut session).await;

        assert_eq!(
            outcome,
            PollOutcome::Replaced {
                total: 3,
                new_from_counterparty: 2,
                notified: true
            }
        );
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_growth_from_own_messages_is_silent() {
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Ok(vec![msg("1", Sender::Counterparty), msg("2", Sender::Myself)]),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        engine.poll(&mut session).await;

        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 0);
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_view_always_equals_server_list() {
        let lists = vec![
            vec![msg("1", Sender::Counterparty), msg("2", Sender::Myself)],
            // server may shrink the list; the client never merges
            vec![msg("2", Sender::Myself)],
            vec![msg("2", Sender::Myself), msg("9", Sender::Counterparty)],
        ];
        let (engine, delivery, _) = make_engine(lists.iter().cloned().map(Ok).collect());
        let mut session = ConversationSession::new("c1");

        for expected in &lists {
            engine.poll(&mut session).await;
            assert_eq!(session.messages(), expected.as_slice());
        }
        // the shrink was silent, the final arrival alerted
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_locked_poll_keeps_view_and_state() {
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Err(http(403)),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.poll(&mut session).await;

        assert_eq!(outcome, PollOutcome::Locked);
        assert_eq!(session.state(), SyncState::Locked);
        assert_eq!(session.messages().len(), 1, "view must not blank");
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_poll_keeps_view() {
        let (engine, _, router) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Err(http(401)),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.poll(&mut session).await;

        assert_eq!(outcome, PollOutcome::Unauthorized);
        assert_eq!(session.state(), SyncState::Unauthorized);
        assert_eq!(session.messages().len(), 1);
        // polls never navigate
        assert_eq!(router.sign_ins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_poll_failure_is_swallowed() {
        let (engine, _, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Err(Error::Network("connection reset".into())),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.poll(&mut session).await;

        assert_eq!(outcome, PollOutcome::Failed);
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_suppresses_echo_resync_alert() {
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            // resync after the send: our echo plus a counterpart message
            // that arrived in the same window
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Myself),
                msg("3", Sender::Counterparty),
            ]),
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Myself),
                msg("3", Sender::Counterparty),
                msg("4", Sender::Counterparty),
            ]),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.send_text(&mut session, "hello").await.unwrap();

        // the send-driven resync replaced data but stayed silent
        assert!(matches!(
            outcome,
            PollOutcome::Replaced {
                notified: false,
                ..
            }
        ));
        assert_eq!(session.messages().len(), 3);
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 0);
        assert!(!session.notification_suppressed(), "gate must be consumed");

        // the next timer tick alerts normally
        engine.poll(&mut session).await;
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_consumed_even_when_resync_fails() {
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![msg("1", Sender::Counterparty)]),
            Err(Error::Network("flaky".into())),
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Counterparty),
            ]),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        engine.send_text(&mut session, "hello").await.unwrap();
        assert!(!session.notification_suppressed());

        engine.poll(&mut session).await;
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_send_routes_once() {
        let (engine, _, router) = make_engine(vec![Ok(vec![]), Ok(vec![])]);
        let mut session = ConversationSession::new("c1");

        let api_err = Error::Http {
            status: 401,
            code: Some("bad_token".into()),
            message: None,
        };
        engine.api.fail_next_send(api_err);
        assert!(engine.send_text(&mut session, "hi").await.is_err());
        assert_eq!(router.sign_ins.load(Ordering::SeqCst), 1);

        // a second failure on the same session must not navigate again
        engine.api.fail_next_send(http(401));
        assert!(engine.send_text(&mut session, "hi").await.is_err());
        assert_eq!(router.sign_ins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_arrival_scenario() {
        // conversation starts with 3 counterpart messages; the next poll
        // brings one of ours and one of theirs
        let (engine, delivery, _) = make_engine(vec![
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Counterparty),
                msg("3", Sender::Counterparty),
            ]),
            Ok(vec![
                msg("1", Sender::Counterparty),
                msg("2", Sender::Counterparty),
                msg("3", Sender::Counterparty),
                msg("4", Sender::Myself),
                msg("5", Sender::Counterparty),
            ]),
        ]);
        let mut session = ConversationSession::new("c1");

        engine.poll(&mut session).await;
        let outcome = engine.poll(&mut session).await;

        assert_eq!(
            outcome,
            PollOutcome::Replaced {
                total: 5,
                new_from_counterparty: 1,
                notified: true
            }
        );
        assert_eq!(delivery.alerts.load(Ordering::SeqCst), 1);
    }
}
