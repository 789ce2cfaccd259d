//! One query-to-answer lifecycle, and the orchestrator that runs them.
//!
//! A [`Session`] runs as its own task: it opens the stream, decodes events,
//! paces the reveal through a [`PlaybackScheduler`] and reports what the
//! assistant message should show through a channel of [`SessionUpdate`]s.
//! The [`Orchestrator`] owns the [`Conversation`], applies those updates and
//! makes sure at most one session is generating at a time.
//!
//! Everything inside a session is cooperative: the only suspension points
//! are the next body chunk and the next display tick, and cancellation wins
//! over both.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{AgentClient, QueryRequest};
use crate::config::Config;
use crate::mode::Mode;
use crate::playback::{PlaybackScheduler, DEFAULT_TICK};
use crate::state::{ChatRole, Conversation, HistoryEntry};
use crate::stream::{FrameDecoder, Framing, StreamEvent};

/// How received text reaches the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Playback {
    /// Paced through the playback scheduler.
    #[default]
    Smoothed,
    /// Written as soon as it is received.
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub framing: Framing,
    pub playback: Playback,
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            playback: Playback::default(),
            tick: DEFAULT_TICK,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            framing: config.framing(),
            playback: if config.smooth() {
                Playback::Smoothed
            } else {
                Playback::Bypass
            },
            tick: config.tick(),
        }
    }
}

/// How a session ended. Exactly one per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The stream delivered the answer.
    Streamed,
    /// The stream was empty; the one-shot query delivered the answer.
    Fallback,
    /// The message now shows this failure.
    Failed(String),
    /// Stopped by the user. Not a failure.
    Cancelled,
}

/// Change to the target message, sent from a session to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// New whole content of the message.
    Content { id: u64, text: String },
    Generating { id: u64, generating: bool },
    /// Last update of a session.
    Finished { id: u64, outcome: SessionOutcome },
}

impl SessionUpdate {
    pub fn message_id(&self) -> u64 {
        match self {
            SessionUpdate::Content { id, .. }
            | SessionUpdate::Generating { id, .. }
            | SessionUpdate::Finished { id, .. } => *id,
        }
    }
}

pub struct Session {
    message_id: u64,
    config: SessionConfig,
    cancel: CancellationToken,
    accumulated: String,
    started: bool,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl Session {
    pub fn new(
        message_id: u64,
        config: SessionConfig,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self {
            message_id,
            config,
            cancel: CancellationToken::new(),
            accumulated: String::new(),
            started: false,
            updates,
        }
    }

    /// Token that stops this session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Run to the end. The last update sent is always `Finished`.
    pub async fn run(mut self, client: AgentClient, request: QueryRequest) -> SessionOutcome {
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => SessionOutcome::Cancelled,
            outcome = self.drive(&client, &request) => outcome,
        };

        match &outcome {
            SessionOutcome::Cancelled => {
                info!(id = self.message_id, "session cancelled");
                self.emit(SessionUpdate::Generating {
                    id: self.message_id,
                    generating: false,
                });
            }
            SessionOutcome::Failed(message) => {
                warn!(id = self.message_id, %message, "session failed");
            }
            SessionOutcome::Streamed | SessionOutcome::Fallback => {
                info!(
                    id = self.message_id,
                    chars = self.accumulated.chars().count(),
                    ?outcome,
                    "session finished"
                );
            }
        }

        self.emit(SessionUpdate::Finished {
            id: self.message_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn drive(&mut self, client: &AgentClient, request: &QueryRequest) -> SessionOutcome {
        let response = match client.open_stream(request, self.config.framing).await {
            Ok(response) => response,
            Err(err) => return self.fail(&format!("{err:#}")),
        };

        // Taken as soon as input ends so the connection is released before
        // the backlog finishes draining
        let mut body = Some(response.bytes_stream());
        let mut decoder = FrameDecoder::new(self.config.framing);
        let mut scheduler = PlaybackScheduler::new();
        // The placeholder is the scheduler's first observation
        scheduler.update(&self.accumulated, true);

        let mut ticker = time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ended = false;

        loop {
            if ended {
                if body.take().is_some() {
                    debug!(id = self.message_id, "end of input, response released");
                }
                if !scheduler.is_draining() {
                    break;
                }
            }

            tokio::select! {
                chunk = next_chunk(&mut body), if !ended => match chunk {
                    Some(Ok(bytes)) => {
                        for event in decoder.feed(&bytes) {
                            match event {
                                StreamEvent::Delta(text) => self.on_delta(&text, &mut scheduler),
                                StreamEvent::Done => ended = true,
                                StreamEvent::Error(message) => return self.fail(&message),
                            }
                        }
                    }
                    Some(Err(err)) => return self.fail(&format!("stream interrupted: {err}")),
                    None => {
                        debug!(id = self.message_id, "stream closed without a done event");
                        decoder.finalize();
                        ended = true;
                    }
                },
                _ = ticker.tick(), if scheduler.is_draining() => {
                    if scheduler.tick().is_some() {
                        self.emit(SessionUpdate::Content {
                            id: self.message_id,
                            text: scheduler.displayed().to_string(),
                        });
                    }
                }
            }
        }

        if decoder.discarded() > 0 {
            debug!(id = self.message_id, lines = decoder.discarded(), "malformed lines were skipped");
        }

        if self.accumulated.is_empty() {
            return self.fallback(client, request).await;
        }
        SessionOutcome::Streamed
    }

    fn on_delta(&mut self, text: &str, scheduler: &mut PlaybackScheduler) {
        if text.is_empty() {
            return;
        }
        self.accumulated.push_str(text);

        if !self.started {
            self.started = true;
            self.emit(SessionUpdate::Generating {
                id: self.message_id,
                generating: false,
            });
        }

        match self.config.playback {
            Playback::Smoothed => scheduler.update(&self.accumulated, true),
            Playback::Bypass => self.emit(SessionUpdate::Content {
                id: self.message_id,
                text: self.accumulated.clone(),
            }),
        }
    }

    async fn fallback(&mut self, client: &AgentClient, request: &QueryRequest) -> SessionOutcome {
        info!(id = self.message_id, "stream finished empty, falling back to one-shot query");

        match client.query(request).await {
            Ok(response) => {
                self.accumulated = response.into_text();
                self.emit(SessionUpdate::Content {
                    id: self.message_id,
                    text: self.accumulated.clone(),
                });
                self.emit(SessionUpdate::Generating {
                    id: self.message_id,
                    generating: false,
                });
                SessionOutcome::Fallback
            }
            Err(err) => self.fail(&format!("{err:#}")),
        }
    }

    fn fail(&mut self, message: &str) -> SessionOutcome {
        self.emit(SessionUpdate::Content {
            id: self.message_id,
            text: format!("Error: {message}"),
        });
        self.emit(SessionUpdate::Generating {
            id: self.message_id,
            generating: false,
        });
        SessionOutcome::Failed(message.to_string())
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!(id = self.message_id, "session update dropped, receiver is gone");
        }
    }
}

/// Next item of an open body; `None` once the body has been released.
async fn next_chunk<S>(body: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match body {
        Some(stream) => stream.next().await,
        None => None,
    }
}

struct ActiveSession {
    message_id: u64,
    cancel: CancellationToken,
}

/// Owns a conversation and its single in-flight session.
pub struct Orchestrator {
    client: AgentClient,
    config: SessionConfig,
    conversation: Conversation,
    active: Option<ActiveSession>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
    updates_rx: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl Orchestrator {
    pub fn new(client: AgentClient, config: SessionConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            client,
            config,
            conversation: Conversation::new(),
            active: None,
            updates_tx,
            updates_rx,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Takes effect from the next `send`.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    /// Message the in-flight session writes to.
    pub fn active_message(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.message_id)
    }

    /// Add already complete turns, e.g. a restored transcript. No session
    /// runs for them; their content is final as loaded.
    pub fn load_history(&mut self, entries: &[HistoryEntry]) {
        for entry in entries {
            self.conversation.push_complete(entry.role, &entry.content);
        }
    }

    /// Ask a question. Any session still running is cancelled first.
    /// Must be called from within a tokio runtime.
    pub fn send(&mut self, query: &str, mode: Mode) -> u64 {
        self.cancel();

        let history = self.conversation.history();
        self.conversation.push_user(query);
        let message_id = self.conversation.push_placeholder();

        let request = QueryRequest::new(query)
            .with_agent(mode.agent_name())
            .with_history(history);

        let session = Session::new(message_id, self.config.clone(), self.updates_tx.clone());
        self.active = Some(ActiveSession {
            message_id,
            cancel: session.cancel_token(),
        });

        info!(
            id = message_id,
            mode = mode.as_str(),
            framing = self.config.framing.as_str(),
            "starting session"
        );
        tokio::spawn(session.run(self.client.clone(), request));

        message_id
    }

    /// Stop the in-flight session. Returns false when nothing was running.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        active.cancel.cancel();
        if let Some(message) = self.conversation.message_mut(active.message_id) {
            message.generating = false;
        }
        debug!(id = active.message_id, "cancelled active session");
        true
    }

    /// Cancel anything running and forget the conversation.
    pub fn clear(&mut self) {
        self.cancel();
        self.conversation.clear();
    }

    /// Apply one update. Updates from sessions that are no longer active
    /// are ignored. Returns the outcome when the active session finished.
    pub fn apply(&mut self, update: SessionUpdate) -> Option<SessionOutcome> {
        if self.active_message() != Some(update.message_id()) {
            debug!(id = update.message_id(), "ignoring update from a superseded session");
            return None;
        }

        match update {
            SessionUpdate::Content { id, text } => {
                if let Some(message) = self.conversation.message_mut(id) {
                    message.content = text;
                }
                None
            }
            SessionUpdate::Generating { id, generating } => {
                if let Some(message) = self.conversation.message_mut(id) {
                    message.generating = generating;
                }
                None
            }
            SessionUpdate::Finished { id, outcome } => {
                if let Some(message) = self.conversation.message_mut(id) {
                    message.generating = false;
                    message.failed = matches!(outcome, SessionOutcome::Failed(_));
                }
                self.active = None;
                Some(outcome)
            }
        }
    }

    /// Wait for the next update from any session.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        self.updates_rx.recv().await
    }

    /// Apply updates until the active session finishes.
    pub async fn run_to_completion(&mut self) -> Option<SessionOutcome> {
        while self.active.is_some() {
            let update = self.next_update().await?;
            if let Some(outcome) = self.apply(update) {
                return Some(outcome);
            }
        }
        None
    }

    /// Content of the latest assistant message.
    pub fn last_answer(&self) -> Option<&str> {
        self.conversation
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}
