//! Per-view reconciliation: the one piece of this client that is more
//! than a request wrapper.
//!
//! A [`ConversationView`] owns everything scoped to one open
//! conversation: the dedup ledger, the push-channel handle, the
//! rendered transcript, and the ended flag. It is torn down on
//! navigation; switching conversations closes the old stream before the
//! new one opens, so at most one stream is live per view.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::model::{Message, Role, StreamEvent, UserProfile};
use crate::stream::{self, StreamHandle, StreamState};

// ---------------------------------------------------------------------------
// Dedup ledger
// ---------------------------------------------------------------------------

/// What applying one stream event did to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// `init` snapshot: the whole view is replaced with these messages.
    Replaced(Vec<Message>),
    /// `new` batch: only these (previously unseen) messages are appended.
    Appended(Vec<Message>),
    /// Typing notice; carries no messages and is never deduped.
    Typing(String),
}

/// The set of already-rendered message ids, scoped to one conversation
/// view.
///
/// A message can reach the view twice — once as the optimistic echo of
/// a local send and once as the server-confirmed record on the push
/// channel. The ledger guarantees each id is surfaced exactly once per
/// snapshot epoch.
#[derive(Debug, Default)]
pub struct MessageLedger {
    seen: HashSet<String>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded stream event.
    ///
    /// `init` clears the set and repopulates it from the snapshot
    /// (duplicates inside the snapshot itself collapse to their first
    /// occurrence); `new` passes through only unseen ids.
    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Init { messages } => {
                self.seen.clear();
                let mut fresh = Vec::with_capacity(messages.len());
                for msg in messages {
                    if self.seen.insert(msg.id.clone()) {
                        fresh.push(msg);
                    }
                }
                Applied::Replaced(fresh)
            }
            StreamEvent::New { messages } => {
                let mut fresh = Vec::new();
                for msg in messages {
                    if self.seen.insert(msg.id.clone()) {
                        fresh.push(msg);
                    }
                }
                Applied::Appended(fresh)
            }
            StreamEvent::Typing { user_name } => Applied::Typing(user_name),
        }
    }

    /// Mark an id as already rendered, so a later incremental batch
    /// will not surface it again. Used by optimistic-send reconciliation.
    pub fn mark_seen(&mut self, id: impl Into<String>) {
        self.seen.insert(id.into());
    }

    /// Forget an id (a retracted optimistic placeholder).
    pub fn forget(&mut self, id: &str) {
        self.seen.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scroll policy
// ---------------------------------------------------------------------------

/// Decide whether a view should auto-scroll after new content.
///
/// Pure over the scroll geometry *before* the new content arrived: if
/// the reader was within `threshold` px of the bottom, stick to the
/// bottom; otherwise hold position and do not yank their view.
pub fn stick_to_bottom(
    scroll_top: u32,
    viewport_height: u32,
    content_height: u32,
    threshold: u32,
) -> bool {
    let visible_bottom = scroll_top.saturating_add(viewport_height);
    content_height.saturating_sub(visible_bottom) <= threshold
}

// ---------------------------------------------------------------------------
// Notification policy
// ---------------------------------------------------------------------------

/// Whether an incoming message warrants a sound / desktop notification:
/// only for someone else's message while the window is backgrounded.
pub fn should_notify(message: &Message, local_user: &UserProfile, window_hidden: bool) -> bool {
    window_hidden && message.is_incoming_for(local_user) && message.role != Role::System
}

// ---------------------------------------------------------------------------
// Typing indicator
// ---------------------------------------------------------------------------

/// How long a typing notice stays visible without a refresh.
pub const TYPING_DECAY: Duration = Duration::from_millis(1500);

/// Latched typing state with a fixed decay.
#[derive(Debug, Default)]
pub struct TypingIndicator {
    current: Option<(String, Instant)>,
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, user_name: impl Into<String>, now: Instant) {
        self.current = Some((user_name.into(), now));
    }

    /// Who is typing, if the last notice is still fresh.
    pub fn active(&self, now: Instant) -> Option<&str> {
        match &self.current {
            Some((name, since)) if now.duration_since(*since) < TYPING_DECAY => Some(name),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `HH:MM:SS` elapsed time for the conversation header.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Export a transcript as CSV (timestamp, sender, role, text). Fields
/// are quoted; embedded quotes are doubled per RFC 4180.
pub fn export_csv(messages: &[Message]) -> String {
    fn field(s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }
    let mut out = String::from("timestamp,sender,role,text\n");
    for msg in messages {
        out.push_str(&format!(
            "{},{},{},{}\n",
            field(&msg.timestamp),
            field(&msg.sender_name),
            field(&msg.role.to_string()),
            field(&msg.text),
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Conversation view
// ---------------------------------------------------------------------------

/// Result of applying one stream event to the view.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ViewUpdate {
    /// Messages to render, already deduped.
    pub rendered: Vec<Message>,
    /// True when the whole transcript was replaced (an `init` snapshot).
    pub replaced_all: bool,
    /// Someone is typing.
    pub typing: Option<String>,
    /// This event carried the end-of-conversation signal.
    pub newly_ended: bool,
    /// How many of `rendered` came from another participant. System
    /// messages never count, matching the notification policy.
    pub incoming: usize,
    /// The caller should signal read-state to the backend.
    pub mark_read: bool,
}

/// Outcome of a successful optimistic send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// Client-generated placeholder id rendered immediately.
    pub placeholder_id: String,
    /// Server-confirmed record, or `None` when the push channel already
    /// delivered it (the placeholder is simply retracted then).
    pub confirmed: Option<Message>,
}

/// Controller state for one open conversation.
pub struct ConversationView {
    api: ApiClient,
    conv_key: String,
    user: UserProfile,
    reconnect_backoff: Duration,
    ledger: MessageLedger,
    transcript: Vec<Message>,
    stream: Option<StreamHandle>,
    ended: bool,
    unread: usize,
}

impl ConversationView {
    pub fn new(api: ApiClient, config: &ClientConfig, conv_key: impl Into<String>, user: UserProfile) -> Self {
        Self {
            api,
            conv_key: conv_key.into(),
            user,
            reconnect_backoff: config.reconnect_backoff,
            ledger: MessageLedger::new(),
            transcript: Vec::new(),
            stream: None,
            ended: false,
            unread: 0,
        }
    }

    pub fn conv_key(&self) -> &str {
        &self.conv_key
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Current push-channel state; `Closed` when no stream is open.
    pub fn stream_state(&self) -> StreamState {
        self.stream.as_ref().map_or(StreamState::Closed, StreamHandle::state)
    }

    /// Open the push channel for this view, closing any previous one
    /// first so at most one stream is live. Also signals read-state,
    /// since opening a view counts as reading it.
    pub async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<StreamEvent>, ChatError> {
        self.close_stream().await;
        let (handle, events) =
            stream::subscribe(self.api.clone(), self.conv_key.clone(), self.reconnect_backoff);
        self.stream = Some(handle);
        self.signal_read().await;
        Ok(events)
    }

    /// Like [`open`](Self::open), but fed by timed polling instead of
    /// SSE, for transports where the stream is unavailable.
    pub async fn open_polling(
        &mut self,
        interval: Duration,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, ChatError> {
        self.close_stream().await;
        let (handle, events) = stream::poll(self.api.clone(), self.conv_key.clone(), interval);
        self.stream = Some(handle);
        self.signal_read().await;
        Ok(events)
    }

    /// Navigate to a different conversation: tear down the current
    /// stream and all per-view state, then open the new one.
    pub async fn switch_to(
        &mut self,
        conv_key: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, ChatError> {
        self.close_stream().await;
        self.conv_key = conv_key.into();
        self.ledger = MessageLedger::new();
        self.transcript.clear();
        self.ended = false;
        self.unread = 0;
        self.open().await
    }

    /// Tear the view down (navigation away). Idempotent.
    pub async fn close(&mut self) {
        self.close_stream().await;
    }

    async fn close_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            debug!(conv_key = %self.conv_key, "closing message stream");
            handle.close().await;
        }
    }

    /// Apply one decoded stream event. `focused` is whether the user is
    /// looking at this view right now; it drives unread counting and
    /// the mark-read signal.
    pub fn apply(&mut self, event: StreamEvent, focused: bool) -> ViewUpdate {
        let mut update = ViewUpdate::default();
        match self.ledger.apply(event) {
            Applied::Replaced(messages) => {
                self.transcript = messages.clone();
                update.replaced_all = true;
                update.rendered = messages;
            }
            Applied::Appended(messages) => {
                self.transcript.extend(messages.iter().cloned());
                update.rendered = messages;
            }
            Applied::Typing(user_name) => {
                update.typing = Some(user_name);
                return update;
            }
        }

        for msg in &update.rendered {
            if msg.signals_end() && !self.ended {
                self.ended = true;
                update.newly_ended = true;
            }
            if msg.role != Role::System && msg.is_incoming_for(&self.user) {
                update.incoming += 1;
            }
        }

        if update.incoming > 0 {
            if focused {
                update.mark_read = true;
            } else {
                self.unread += update.incoming;
            }
        }
        update
    }

    /// Clear the unread badge (the view regained focus).
    pub fn mark_focused(&mut self) {
        self.unread = 0;
    }

    /// Optimistically send `text`: the returned placeholder renders
    /// immediately, then the server-confirmed record replaces it once
    /// the POST returns. Rejected client-side after the end signal.
    pub async fn send(&mut self, text: &str) -> Result<SendOutcome, ChatError> {
        if self.ended {
            return Err(ChatError::ConversationEnded);
        }

        let placeholder = self.render_placeholder(text);
        let placeholder_id = placeholder.id.clone();

        match self
            .api
            .send_message(&self.conv_key, &self.user.name, self.user.role, text)
            .await
        {
            Ok(confirmed) => Ok(self.reconcile_confirmed(&placeholder_id, confirmed)),
            Err(e) => {
                self.retract(&placeholder_id);
                Err(e)
            }
        }
    }

    /// Render a local echo under a client-generated id. The timestamp
    /// stays empty until the server-confirmed record supplies one.
    fn render_placeholder(&mut self, text: &str) -> Message {
        let placeholder = Message {
            id: format!("local-{}", Uuid::new_v4()),
            sender_name: self.user.name.clone(),
            role: self.user.role,
            text: text.to_string(),
            timestamp: String::new(),
        };
        self.ledger.mark_seen(placeholder.id.clone());
        self.transcript.push(placeholder.clone());
        placeholder
    }

    /// Swap the placeholder for the server-confirmed record and mark
    /// the confirmed id seen. If the push channel already delivered the
    /// confirmed record (it won the race), the placeholder is retracted
    /// instead, so the message still appears exactly once.
    fn reconcile_confirmed(&mut self, placeholder_id: &str, confirmed: Message) -> SendOutcome {
        if self.ledger.contains(&confirmed.id) {
            self.retract(placeholder_id);
            return SendOutcome {
                placeholder_id: placeholder_id.to_string(),
                confirmed: None,
            };
        }
        self.ledger.mark_seen(confirmed.id.clone());
        self.ledger.forget(placeholder_id);
        if let Some(slot) = self.transcript.iter_mut().find(|m| m.id == placeholder_id) {
            *slot = confirmed.clone();
        } else {
            self.transcript.push(confirmed.clone());
        }
        SendOutcome {
            placeholder_id: placeholder_id.to_string(),
            confirmed: Some(confirmed),
        }
    }

    /// Remove a failed or superseded optimistic placeholder.
    fn retract(&mut self, placeholder_id: &str) {
        self.ledger.forget(placeholder_id);
        self.transcript.retain(|m| m.id != placeholder_id);
    }

    /// Fire-and-forget read signal; failures are logged, not surfaced.
    async fn signal_read(&self) {
        if let Err(e) = self.api.mark_read(&self.conv_key, &self.user.name).await {
            debug!(conv_key = %self.conv_key, error = %e, "mark-read failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn msg(id: &str, sender: &str, role: Role, text: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_name: sender.to_string(),
            role,
            text: text.to_string(),
            timestamp: "2026-01-15T10:30:00Z".to_string(),
        }
    }

    fn alice() -> UserProfile {
        UserProfile { name: "Alice".to_string(), role: Role::Trainer }
    }

    fn test_view() -> ConversationView {
        let api = ApiClient::builder("http://127.0.0.1:1/api")
            .connect_timeout(Duration::from_millis(200))
            .build();
        ConversationView::new(api, &ClientConfig::default(), "ABC123", alice())
    }

    // -- MessageLedger --

    #[test]
    fn test_ledger_init_populates() {
        let mut ledger = MessageLedger::new();
        let applied = ledger.apply(StreamEvent::Init {
            messages: vec![msg("m1", "Alice", Role::Trainer, "a"), msg("m2", "Bob", Role::Agent, "b")],
        });
        assert_eq!(applied, Applied::Replaced(vec![
            msg("m1", "Alice", Role::Trainer, "a"),
            msg("m2", "Bob", Role::Agent, "b"),
        ]));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_ledger_new_filters_seen_ids() {
        let mut ledger = MessageLedger::new();
        ledger.apply(StreamEvent::Init { messages: vec![msg("m1", "A", Role::Trainer, "a")] });
        let applied = ledger.apply(StreamEvent::New {
            messages: vec![msg("m1", "A", Role::Trainer, "a"), msg("m2", "B", Role::Agent, "b")],
        });
        match applied {
            Applied::Appended(fresh) => {
                assert_eq!(fresh.len(), 1);
                assert_eq!(fresh[0].id, "m2");
            }
            other => panic!("expected Appended, got {other:?}"),
        }
    }

    #[test]
    fn test_ledger_repeated_new_batch_renders_once() {
        let mut ledger = MessageLedger::new();
        let batch = StreamEvent::New { messages: vec![msg("m1", "A", Role::Trainer, "a")] };
        assert!(matches!(ledger.apply(batch.clone()), Applied::Appended(v) if v.len() == 1));
        assert!(matches!(ledger.apply(batch), Applied::Appended(v) if v.is_empty()));
    }

    #[test]
    fn test_ledger_init_resets_epoch() {
        let mut ledger = MessageLedger::new();
        ledger.apply(StreamEvent::New { messages: vec![msg("m1", "A", Role::Trainer, "a")] });
        // A new snapshot starts a fresh epoch: m1 renders again as part
        // of the replacement, exactly once.
        let applied = ledger.apply(StreamEvent::Init {
            messages: vec![msg("m1", "A", Role::Trainer, "a")],
        });
        assert!(matches!(applied, Applied::Replaced(v) if v.len() == 1));
    }

    #[test]
    fn test_ledger_init_collapses_internal_duplicates() {
        let mut ledger = MessageLedger::new();
        let applied = ledger.apply(StreamEvent::Init {
            messages: vec![msg("m1", "A", Role::Trainer, "a"), msg("m1", "A", Role::Trainer, "a")],
        });
        assert!(matches!(applied, Applied::Replaced(v) if v.len() == 1));
    }

    #[test]
    fn test_ledger_mark_seen_suppresses_echo() {
        let mut ledger = MessageLedger::new();
        ledger.mark_seen("srv-42");
        let applied = ledger.apply(StreamEvent::New {
            messages: vec![msg("srv-42", "Alice", Role::Trainer, "hello")],
        });
        assert!(matches!(applied, Applied::Appended(v) if v.is_empty()));
    }

    #[test]
    fn test_ledger_typing_never_deduped() {
        let mut ledger = MessageLedger::new();
        for _ in 0..3 {
            let applied = ledger.apply(StreamEvent::Typing { user_name: "Bob".to_string() });
            assert_eq!(applied, Applied::Typing("Bob".to_string()));
        }
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_ledger_forget() {
        let mut ledger = MessageLedger::new();
        ledger.mark_seen("local-1");
        ledger.forget("local-1");
        assert!(!ledger.contains("local-1"));
    }

    // -- scroll policy --

    #[rstest]
    #[case(1000, 40, true)] // pinned to the bottom
    #[case(980, 40, true)] // within threshold
    #[case(960, 40, true)] // exactly at threshold
    #[case(959, 40, false)] // one pixel beyond
    #[case(0, 40, false)] // scrolled to top
    #[case(959, 0, false)] // zero threshold requires exact bottom
    #[case(1000, 0, true)]
    fn test_stick_to_bottom_threshold(
        #[case] scroll_top: u32,
        #[case] threshold: u32,
        #[case] expected: bool,
    ) {
        // viewport 600, content 1600: bottom position is scroll_top 1000.
        assert_eq!(stick_to_bottom(scroll_top, 600, 1600, threshold), expected);
    }

    #[test]
    fn test_stick_to_bottom_short_content_always_sticks() {
        // Content shorter than the viewport: nothing to scroll.
        assert!(stick_to_bottom(0, 600, 200, 40));
    }

    // -- notification policy --

    #[test]
    fn test_notify_incoming_while_hidden() {
        let m = msg("m1", "Bob", Role::Agent, "hello");
        assert!(should_notify(&m, &alice(), true));
    }

    #[test]
    fn test_no_notify_when_visible() {
        let m = msg("m1", "Bob", Role::Agent, "hello");
        assert!(!should_notify(&m, &alice(), false));
    }

    #[test]
    fn test_no_notify_for_own_message() {
        let m = msg("m1", "Alice", Role::Trainer, "hello");
        assert!(!should_notify(&m, &alice(), true));
    }

    #[test]
    fn test_no_notify_for_system_message() {
        let m = msg("s1", "System", Role::System, "conversation ended");
        assert!(!should_notify(&m, &alice(), true));
    }

    // -- typing indicator --

    #[test]
    fn test_typing_active_within_decay() {
        let mut typing = TypingIndicator::new();
        let now = Instant::now();
        typing.set("Bob", now);
        assert_eq!(typing.active(now + Duration::from_millis(500)), Some("Bob"));
    }

    #[test]
    fn test_typing_decays() {
        let mut typing = TypingIndicator::new();
        let now = Instant::now();
        typing.set("Bob", now);
        assert_eq!(typing.active(now + TYPING_DECAY), None);
    }

    #[test]
    fn test_typing_refresh_extends() {
        let mut typing = TypingIndicator::new();
        let now = Instant::now();
        typing.set("Bob", now);
        typing.set("Bob", now + Duration::from_millis(1000));
        assert_eq!(typing.active(now + Duration::from_millis(2000)), Some("Bob"));
    }

    // -- formatting --

    #[rstest]
    #[case(0, "00:00:00")]
    #[case(59, "00:00:59")]
    #[case(61, "00:01:01")]
    #[case(3600, "01:00:00")]
    #[case(3661, "01:01:01")]
    #[case(90_061, "25:01:01")]
    fn test_format_duration(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_duration(Duration::from_secs(secs)), expected);
    }

    #[test]
    fn test_export_csv_header_and_rows() {
        let csv = export_csv(&[msg("m1", "Alice", Role::Trainer, "hello")]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,sender,role,text"));
        assert_eq!(
            lines.next(),
            Some("\"2026-01-15T10:30:00Z\",\"Alice\",\"trainer\",\"hello\"")
        );
    }

    #[test]
    fn test_export_csv_escapes_quotes() {
        let csv = export_csv(&[msg("m1", "Alice", Role::Trainer, "she said \"hi\"")]);
        assert!(csv.contains("\"she said \"\"hi\"\"\""));
    }

    #[test]
    fn test_export_csv_empty_transcript() {
        assert_eq!(export_csv(&[]), "timestamp,sender,role,text\n");
    }

    // -- ConversationView::apply --

    #[test]
    fn test_view_apply_init_replaces_transcript() {
        let mut view = test_view();
        let update = view.apply(
            StreamEvent::Init {
                messages: vec![msg("m1", "Bob", Role::Agent, "hi")],
            },
            true,
        );
        assert!(update.replaced_all);
        assert_eq!(view.transcript().len(), 1);
        assert_eq!(update.incoming, 1);
        assert!(update.mark_read);
    }

    #[test]
    fn test_view_apply_unfocused_counts_unread() {
        let mut view = test_view();
        let update = view.apply(
            StreamEvent::New {
                messages: vec![msg("m1", "Bob", Role::Agent, "hi"), msg("m2", "Bob", Role::Agent, "you there?")],
            },
            false,
        );
        assert!(!update.mark_read);
        assert_eq!(view.unread(), 2);
        view.mark_focused();
        assert_eq!(view.unread(), 0);
    }

    #[test]
    fn test_view_apply_own_echo_not_incoming() {
        let mut view = test_view();
        let update = view.apply(
            StreamEvent::New { messages: vec![msg("m1", "Alice", Role::Trainer, "mine")] },
            false,
        );
        assert_eq!(update.incoming, 0);
        assert_eq!(view.unread(), 0);
    }

    #[test]
    fn test_view_apply_end_signal_sets_ended() {
        let mut view = test_view();
        let update = view.apply(
            StreamEvent::New {
                messages: vec![msg("s1", "System", Role::System, "*** Conversation has ended ***")],
            },
            true,
        );
        assert!(update.newly_ended);
        assert!(view.is_ended());
        // A second end signal is not "newly" ended.
        let update = view.apply(
            StreamEvent::New {
                messages: vec![msg("s2", "System", Role::System, "conversation ended")],
            },
            true,
        );
        assert!(!update.newly_ended);
    }

    #[test]
    fn test_view_apply_system_message_not_unread() {
        let mut view = test_view();
        let update = view.apply(
            StreamEvent::New {
                messages: vec![msg("s1", "System", Role::System, "conversation ended")],
            },
            false,
        );
        assert_eq!(update.incoming, 0);
        assert_eq!(view.unread(), 0);
        assert!(!update.mark_read);
    }

    #[test]
    fn test_view_apply_typing_passthrough() {
        let mut view = test_view();
        let update = view.apply(StreamEvent::Typing { user_name: "Bob".to_string() }, true);
        assert_eq!(update.typing.as_deref(), Some("Bob"));
        assert!(update.rendered.is_empty());
        assert!(view.transcript().is_empty());
    }

    // -- optimistic send reconciliation --

    #[test]
    fn test_placeholder_renders_immediately() {
        let mut view = test_view();
        let placeholder = view.render_placeholder("hello");
        assert!(placeholder.id.starts_with("local-"));
        assert_eq!(view.transcript().len(), 1);
        assert!(view.ledger.contains(&placeholder.id));
        assert_eq!(placeholder.timestamp, "");
    }

    #[test]
    fn test_reconcile_swaps_placeholder_for_confirmed() {
        let mut view = test_view();
        let placeholder = view.render_placeholder("hello");
        let confirmed = msg("srv-7", "Alice", Role::Trainer, "hello");
        let outcome = view.reconcile_confirmed(&placeholder.id, confirmed.clone());
        assert_eq!(outcome.confirmed, Some(confirmed));
        assert_eq!(view.transcript().len(), 1);
        assert_eq!(view.transcript()[0].id, "srv-7");
        assert!(!view.ledger.contains(&placeholder.id));
        assert!(view.ledger.contains("srv-7"));
    }

    #[test]
    fn test_echo_after_reconcile_not_rendered_again() {
        let mut view = test_view();
        let placeholder = view.render_placeholder("hello");
        view.reconcile_confirmed(&placeholder.id, msg("srv-7", "Alice", Role::Trainer, "hello"));
        let update = view.apply(
            StreamEvent::New { messages: vec![msg("srv-7", "Alice", Role::Trainer, "hello")] },
            true,
        );
        assert!(update.rendered.is_empty(), "server echo must not re-render");
        assert_eq!(view.transcript().len(), 1);
    }

    #[test]
    fn test_stream_winning_race_retracts_placeholder() {
        let mut view = test_view();
        let placeholder = view.render_placeholder("hello");
        // Push channel delivers the confirmed record before the POST returns.
        view.apply(
            StreamEvent::New { messages: vec![msg("srv-7", "Alice", Role::Trainer, "hello")] },
            true,
        );
        let outcome = view.reconcile_confirmed(&placeholder.id, msg("srv-7", "Alice", Role::Trainer, "hello"));
        assert!(outcome.confirmed.is_none());
        assert_eq!(view.transcript().len(), 1, "exactly one copy remains");
        assert_eq!(view.transcript()[0].id, "srv-7");
    }

    #[tokio::test]
    async fn test_send_failure_retracts_placeholder() {
        // The API target is unroutable, so the POST fails after the
        // optimistic render; the placeholder must be rolled back.
        let mut view = test_view();
        let result = view.send("hello").await;
        assert!(result.is_err());
        assert!(view.transcript().is_empty());
        assert!(view.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_send_rejected_after_end() {
        let mut view = test_view();
        view.apply(
            StreamEvent::New {
                messages: vec![msg("s1", "System", Role::System, "conversation ended")],
            },
            true,
        );
        let result = view.send("too late").await;
        assert!(matches!(result, Err(ChatError::ConversationEnded)));
        assert!(view.transcript().iter().all(|m| !m.id.starts_with("local-")));
    }

    // -- stream ownership --

    #[tokio::test]
    async fn test_open_then_switch_leaves_one_stream() {
        let mut view = test_view();
        let _rx_a = view.open().await.expect("open A");
        assert_ne!(view.stream_state(), StreamState::Closed);
        let _rx_b = view.switch_to("DEF456").await.expect("switch to B");
        assert_eq!(view.conv_key(), "DEF456");
        // Old state is gone, exactly one live stream remains.
        assert!(view.stream.is_some());
        assert!(view.transcript().is_empty());
        assert!(view.ledger.is_empty());
        view.close().await;
        assert_eq!(view.stream_state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut view = test_view();
        let _rx = view.open().await.expect("open");
        view.close().await;
        view.close().await;
        assert_eq!(view.stream_state(), StreamState::Closed);
    }
}
