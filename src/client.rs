//! Chat client orchestrator.
//!
//! DESIGN
//! ======
//! [`ChatClient`] is a cheap handle around shared state: one
//! `Mutex<ChatState>`, the [`ChatApi`] used for REST and the [`CommandSink`]
//! of the socket. Timers and the event pump are tokio tasks that hold only a
//! `Weak` to the shared state; dropping the last handle (or calling
//! [`ChatClient::shutdown`]) aborts all of them.
//!
//! The state lock is never held across an `.await`. Every REST result is
//! applied under the lock after an identity check: the selection
//! generation for message snapshots, the search term for roster fetches.
//!
//! ERROR HANDLING
//! ==============
//! Background work (polls, read marking) logs failures and carries on.
//! User-initiated operations return the error; nothing is retried.

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use envelopes::{ChatMessage, ClientCommand, Participant, ServerEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::api::{Attachment, ChatApi, RestClient};
use crate::config::ChatConfig;
use crate::connection::{CommandSink, ConnectionManager};
use crate::conversation::ConversationKey;
use crate::error::ChatError;
use crate::reducer::{ChatState, Effect};
use crate::session::Session;

const UPDATES_CAPACITY: usize = 256;

/// How a send was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the open socket; the echo will add it to the store.
    Socket,
    /// Created over REST and appended locally.
    Rest(ChatMessage),
    /// Created over REST, then attachments uploaded one by one.
    WithAttachments { message: ChatMessage, failed: Vec<String> },
    /// Edit mode was active, so the text replaced the edited message.
    Edited,
}

#[derive(Default)]
struct Timers {
    messages: Option<JoinHandle<()>>,
    roster: Option<JoinHandle<()>>,
    unread: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        for task in [self.messages.take(), self.roster.take(), self.unread.take(), self.pump.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.abort_all();
    }
}

struct Inner {
    session: Session,
    config: ChatConfig,
    api: Arc<dyn ChatApi>,
    sink: Arc<dyn CommandSink>,
    connection: Option<Arc<ConnectionManager>>,
    state: Mutex<ChatState>,
    timers: Mutex<Timers>,
    updates: broadcast::Sender<ServerEvent>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    /// Build the REST client, open the socket and start the unread poll.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidSession`] or [`ChatError::Http`] if the
    /// REST client cannot be built.
    pub fn connect(session: Session, config: ChatConfig) -> Result<Self, ChatError> {
        let api = Arc::new(RestClient::new(&config, &session)?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::spawn(
            config.ws_url_with_token(&session.token),
            events_tx,
            config.reconnect,
        ));
        info!(user_id = %session.user_id, instance = %connection.instance(), "chat client connecting");

        let client = Self::build(session, config, api, connection.clone(), Some(connection), events_rx);
        client.start();
        Ok(client)
    }

    /// Assemble a client over caller-supplied transports. Events received on
    /// `events` are applied as they arrive; polls are not started until
    /// [`ChatClient::start`].
    #[must_use]
    pub fn with_parts(
        session: Session,
        config: ChatConfig,
        api: Arc<dyn ChatApi>,
        sink: Arc<dyn CommandSink>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self::build(session, config, api, sink, None, events)
    }

    fn build(
        session: Session,
        config: ChatConfig,
        api: Arc<dyn ChatApi>,
        sink: Arc<dyn CommandSink>,
        connection: Option<Arc<ConnectionManager>>,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        let inner = Arc::new(Inner {
            state: Mutex::new(ChatState::new(session.user_id.clone())),
            session,
            config,
            api,
            sink,
            connection,
            timers: Mutex::new(Timers::default()),
            updates,
            closed: AtomicBool::new(false),
        });
        let pump = tokio::spawn(event_pump(Arc::downgrade(&inner), events));
        inner.timers().pump = Some(pump);
        Self { inner }
    }

    /// Start the 15s unread poll. The first tick runs immediately.
    pub fn start(&self) {
        let mut timers = self.inner.timers();
        if timers.unread.is_none() && !self.inner.is_closed() {
            timers.unread = Some(spawn_unread_poll(&self.inner));
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Every event the pump applied, after it was applied.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.updates.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.sink.is_open()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn selected(&self) -> Option<ConversationKey> {
        self.inner.state().store.selected().cloned()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state().store.messages().cloned().collect()
    }

    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.inner.state().roster.entries().to_vec()
    }

    /// Direct plus support unread; the per-sender map is not part of it.
    #[must_use]
    pub fn badge_total(&self) -> u32 {
        self.inner.state().unread.badge_total()
    }

    #[must_use]
    pub fn unread_direct(&self) -> u32 {
        self.inner.state().unread.direct()
    }

    #[must_use]
    pub fn unread_support(&self) -> u32 {
        self.inner.state().unread.support()
    }

    #[must_use]
    pub fn unread_for(&self, sender_id: &str) -> u32 {
        self.inner.state().unread.for_sender(sender_id)
    }

    #[must_use]
    pub fn editing(&self) -> Option<String> {
        self.inner.state().editing().map(str::to_owned)
    }

    // -------------------------------------------------------------------------
    // Conversation selection
    // -------------------------------------------------------------------------

    /// Switch to `key`: the previous messages are cleared in the same step,
    /// the thread is marked read, history is loaded and the 3s poll restarts.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Closed`] after [`ChatClient::shutdown`], or the
    /// error of the initial history fetch. On a fetch error the selection and
    /// the poll stay in place, so the next tick retries.
    pub async fn select_conversation(&self, key: ConversationKey) -> Result<(), ChatError> {
        if self.inner.is_closed() {
            return Err(ChatError::Closed);
        }
        let generation = self.inner.state().select(key.clone());
        debug!(conversation = %key, generation, "conversation selected");

        let poll = spawn_message_poll(&self.inner, generation);
        // Under the timers lock: a racing shutdown either aborts this poll in
        // `abort_all` or is observed here.
        let rejected = {
            let mut timers = self.inner.timers();
            if self.inner.is_closed() {
                Some(poll)
            } else {
                if let Some(previous) = timers.messages.replace(poll) {
                    previous.abort();
                }
                None
            }
        };
        if let Some(poll) = rejected {
            poll.abort();
            self.inner.state().deselect();
            return Err(ChatError::Closed);
        }

        self.inner.mark_read(&key).await;
        if key.is_support() {
            self.inner.refresh_support_unread().await;
        }
        self.inner.refresh_messages().await.map(|_| ())
    }

    /// Close the open conversation and stop its poll.
    pub fn deselect(&self) {
        if let Some(poll) = self.inner.timers().messages.take() {
            poll.abort();
        }
        self.inner.state().deselect();
    }

    /// Refetch the open conversation. Returns `false` when the result was
    /// dropped because the selection changed in flight.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NoConversation`] without a selection, or the
    /// REST error.
    pub async fn refresh_messages(&self) -> Result<bool, ChatError> {
        self.inner.refresh_messages().await
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Send `text` and `attachments` to the open conversation.
    ///
    /// # Errors
    ///
    /// - [`ChatError::NoConversation`] without a selection
    /// - [`ChatError::EmptyMessage`] with neither text nor attachments
    /// - the REST error when the create (or edit) call fails
    pub async fn send(&self, text: &str, attachments: Vec<Attachment>) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        let (key, editing) = {
            let state = self.inner.state();
            (state.store.selected().cloned(), state.editing().map(str::to_owned))
        };
        let key = key.ok_or(ChatError::NoConversation)?;

        if let Some(id) = editing {
            if !text.is_empty() {
                self.edit(&id, text).await?;
                return Ok(SendOutcome::Edited);
            }
        }
        if text.is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !attachments.is_empty() {
            return self.send_with_attachments(key, text, &attachments).await;
        }

        if let ConversationKey::Direct(target_id) = &key {
            let command = ClientCommand::Message { target_id: target_id.clone(), content: text.to_owned() };
            if self.inner.sink.is_open() && self.inner.sink.send(&command) {
                self.inner.state().note_sent(&key, now_ms());
                return Ok(SendOutcome::Socket);
            }
        }

        let message = self.inner.api.send_message(&key, text).await.inspect_err(|error| {
            warn!(conversation = %key, %error, "send failed");
        })?;
        self.inner.append_sent(&key, message.clone());
        Ok(SendOutcome::Rest(message))
    }

    async fn send_with_attachments(
        &self,
        key: ConversationKey,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendOutcome, ChatError> {
        let message = self.inner.api.send_message(&key, text).await.inspect_err(|error| {
            warn!(conversation = %key, %error, "send failed");
        })?;
        self.inner.append_sent(&key, message.clone());

        let mut failed = Vec::new();
        for attachment in attachments {
            if let Err(error) = self.inner.api.upload_attachment(&key, &message.id, attachment).await {
                warn!(message_id = %message.id, file = %attachment.file_name, %error, "attachment upload failed");
                failed.push(attachment.file_name.clone());
            }
        }

        if let Err(error) = self.inner.refresh_messages().await {
            debug!(%error, "refetch after upload skipped");
        }
        Ok(SendOutcome::WithAttachments { message, failed })
    }

    /// Replace the content of message `id` in the open conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyMessage`], [`ChatError::NoConversation`] or
    /// the REST error when the socket path is unavailable.
    pub async fn edit(&self, id: &str, content: &str) -> Result<(), ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let key = self.inner.selected()?;

        if !key.is_support() {
            let command = ClientCommand::Update { id: id.to_owned(), content: content.to_owned() };
            if self.inner.sink.is_open() && self.inner.sink.send(&command) {
                let mut state = self.inner.state();
                state.store.mark_edited(id, content);
                state.cancel_edit();
                return Ok(());
            }
        }

        let updated = self.inner.api.edit_message(&key, id, content).await.inspect_err(|error| {
            warn!(message_id = %id, %error, "edit failed");
        })?;
        let mut state = self.inner.state();
        if state.store.is_selected(&key) {
            match updated {
                Some(message) => {
                    state.store.upsert(message);
                }
                None => {
                    state.store.mark_edited(id, content);
                }
            }
        } else {
            debug!(message_id = %id, conversation = %key, "edit landed after switching conversation");
        }
        state.cancel_edit();
        Ok(())
    }

    /// Delete message `id`; the local entry goes away as soon as the delete
    /// is accepted, without waiting for an echo.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NoConversation`] or the REST error.
    pub async fn delete(&self, id: &str) -> Result<(), ChatError> {
        let key = self.inner.selected()?;

        let via_socket =
            !key.is_support() && self.inner.sink.is_open() && self.inner.sink.send(&ClientCommand::Delete { id: id.to_owned() });
        if !via_socket {
            self.inner.api.delete_message(&key, id).await.inspect_err(|error| {
                warn!(message_id = %id, %error, "delete failed");
            })?;
        }

        let mut state = self.inner.state();
        if state.store.is_selected(&key) {
            state.store.remove(id);
        }
        if state.editing() == Some(id) {
            state.cancel_edit();
        }
        Ok(())
    }

    /// Enter edit mode; only our own messages can be edited.
    pub fn begin_edit(&self, id: &str) -> bool {
        self.inner.state().begin_edit(id)
    }

    pub fn cancel_edit(&self) {
        self.inner.state().cancel_edit();
    }

    /// Store composer text for the open conversation.
    pub fn set_draft(&self, text: &str) {
        let mut state = self.inner.state();
        if let Some(key) = state.store.selected().cloned() {
            state.set_draft(key, text);
        }
    }

    #[must_use]
    pub fn draft(&self, key: &ConversationKey) -> Option<String> {
        self.inner.state().draft(key).map(str::to_owned)
    }

    // -------------------------------------------------------------------------
    // Roster
    // -------------------------------------------------------------------------

    /// Start the 3s roster poll; the first fetch runs immediately.
    pub fn open_panel(&self) {
        let mut timers = self.inner.timers();
        if timers.roster.is_none() && !self.inner.is_closed() {
            timers.roster = Some(spawn_roster_poll(&self.inner));
        }
    }

    pub fn close_panel(&self) {
        if let Some(poll) = self.inner.timers().roster.take() {
            poll.abort();
        }
    }

    /// Change the roster filter; refetches only when the term changed.
    ///
    /// # Errors
    ///
    /// Returns the REST error of the refetch.
    pub async fn set_search(&self, term: &str) -> Result<(), ChatError> {
        let changed = self.inner.state().roster.set_search(term);
        if changed {
            self.inner.refresh_roster().await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the REST error of either roster call.
    pub async fn refresh_roster(&self) -> Result<bool, ChatError> {
        self.inner.refresh_roster().await
    }

    /// # Errors
    ///
    /// Returns the REST error; the roster entry is left unchanged.
    pub async fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<(), ChatError> {
        self.inner.api.set_blocked(user_id, blocked).await?;
        self.inner.state().roster.set_blocked(user_id, blocked);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Unread
    // -------------------------------------------------------------------------

    /// Poll all three unread sources now.
    ///
    /// # Errors
    ///
    /// Returns the first REST error; counters are only replaced when all
    /// three calls succeed.
    pub async fn refresh_unread(&self) -> Result<(), ChatError> {
        self.inner.refresh_unread().await
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Abort every timer and close the socket. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.timers().abort_all();
        if let Some(connection) = &self.inner.connection {
            connection.shutdown().await;
        }
        self.inner.state().deselect();
        info!(user_id = %self.inner.session.user_id, "chat client shut down");
    }

    /// Drop session-scoped drafts, then shut down.
    pub async fn logout(&self) {
        self.inner.state().clear_drafts();
        self.shutdown().await;
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn selected(&self) -> Result<ConversationKey, ChatError> {
        self.state().store.selected().cloned().ok_or(ChatError::NoConversation)
    }

    fn append_sent(&self, key: &ConversationKey, message: ChatMessage) {
        let mut state = self.state();
        if state.store.is_selected(key) {
            state.store.upsert(message);
        }
        state.note_sent(key, now_ms());
    }

    async fn refresh_messages(&self) -> Result<bool, ChatError> {
        let ticket = self.state().store.snapshot_ticket().ok_or(ChatError::NoConversation)?;
        let messages = self.api.fetch_messages(&ticket.key).await?;
        let applied = self.state().store.apply_snapshot(&ticket, messages);
        if !applied {
            debug!(conversation = %ticket.key, "dropping snapshot for a stale selection");
        }
        Ok(applied)
    }

    async fn refresh_roster(&self) -> Result<bool, ChatError> {
        let search = self.state().roster.search().to_owned();
        let users = self.api.fetch_roster(&search).await?;
        let support_chats = if self.session.role.sees_support_chats() {
            self.api.fetch_support_chats().await?
        } else {
            Vec::new()
        };
        let applied = self.state().roster.apply_fetch(&search, users, &support_chats);
        if !applied {
            debug!(%search, "dropping roster fetched for a stale search");
        }
        Ok(applied)
    }

    async fn refresh_unread(&self) -> Result<(), ChatError> {
        let (direct, support, by_sender) = tokio::try_join!(
            self.api.fetch_direct_unread(),
            self.api.fetch_support_unread(),
            self.api.fetch_unread_by_sender(),
        )?;
        let mut state = self.state();
        state.unread.set_direct(direct);
        state.unread.set_support(support);
        state.unread.set_by_sender(by_sender);
        Ok(())
    }

    async fn refresh_support_unread(&self) {
        match self.api.fetch_support_unread().await {
            Ok(count) => self.state().unread.set_support(count),
            Err(error) => warn!(%error, "support unread refresh failed"),
        }
    }

    async fn mark_read(&self, key: &ConversationKey) {
        if let Err(error) = self.api.mark_read(key).await {
            warn!(conversation = %key, %error, "mark read failed");
        }
    }

    async fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::RefreshSupportUnread => self.refresh_support_unread().await,
            Effect::MarkRead(key) => self.mark_read(&key).await,
        }
    }

    /// Count a poll tick and decide whether it should refetch.
    fn resync_due(&self) -> bool {
        let threshold = self.config.resync_missed_ticks;
        let quiet = self.state().tick_quiet();
        threshold == 0 || !self.sink.is_open() || quiet >= threshold
    }
}

async fn event_pump(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let effects = inner.state().apply(event.clone(), now_ms());
        for effect in effects {
            inner.run_effect(effect).await;
        }
        // No subscribers is fine.
        let _ = inner.updates.send(event);
    }
    debug!("event pump stopped");
}

fn poll_interval(period: Duration, immediate: bool) -> tokio::time::Interval {
    let start = if immediate { Instant::now() } else { Instant::now() + period };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn spawn_message_poll(inner: &Arc<Inner>, generation: u64) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let mut ticker = poll_interval(inner.config.polls.messages, false);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.state().store.generation() != generation {
                break;
            }
            if !inner.resync_due() {
                continue;
            }
            if let Err(error) = inner.refresh_messages().await {
                warn!(%error, "message poll failed");
            }
        }
    })
}

fn spawn_roster_poll(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let mut ticker = poll_interval(inner.config.polls.roster, true);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if let Err(error) = inner.refresh_roster().await {
                warn!(%error, "roster poll failed");
            }
        }
    })
}

fn spawn_unread_poll(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let mut ticker = poll_interval(inner.config.polls.unread, true);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if let Err(error) = inner.refresh_unread().await {
                warn!(%error, "unread poll failed");
            }
        }
    })
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
