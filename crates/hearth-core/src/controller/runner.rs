//! Effect runner around the session state machine
//!
//! The runner owns everything with side effects: the backend, the session
//! store, the in-memory history, the active stream and the heartbeat
//! timer. One event is processed at a time. Backend calls run on spawned
//! tasks; their results come back through `next_event` and are applied on
//! the caller's task, so transcript writes never race.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{Compacted, ContextLadder, compact, estimate_tokens};
use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatTimer, check_in_prompt, greeting_prompt};
use crate::llm::{ChatBackend, ChatRequest, Message, Role, StreamDelta, Usage};
use crate::memory::MemoryStore;
use crate::prompt::PromptAssembler;
use crate::session::{Session, SessionStore};

use super::commands::{Command, SessionCommand};
use super::state::{
    Effect, Event, HeartbeatSettings, SessionState, TurnId, TurnKind, UiEvent, transition,
};

/// Title given to sessions until the first message names them
pub const NEW_SESSION_TITLE: &str = "New chat";

/// Characters of the first message used as a session title
const TITLE_MAX_CHARS: usize = 48;

/// Runtime settings for a controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub model: String,
    pub language: String,
    /// Ceiling for the context ladder
    pub max_context: u32,
    pub compaction_max_tokens: usize,
    pub keep_recent: usize,
    pub heartbeat: HeartbeatSettings,
    /// Memory token budget in the system prompt; `None` disables memory
    pub memory_tokens: Option<usize>,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.default.clone(),
            language: config.language.clone(),
            max_context: config.backend.max_context,
            compaction_max_tokens: config.session.compaction_max_tokens,
            keep_recent: config.session.keep_recent,
            heartbeat: HeartbeatSettings {
                enabled: config.heartbeat.enabled,
                interval: config.heartbeat.interval,
            },
            memory_tokens: config
                .memory
                .enabled
                .then_some(config.memory.max_prompt_tokens),
        }
    }
}

/// Result of the off-loop work that opens a stream
struct Opened {
    /// Set for user turns only
    compaction: Option<Result<Option<Compacted>>>,
    prompt_estimate: usize,
    stream: Result<mpsc::Receiver<StreamDelta>>,
}

enum Stage {
    Opening(JoinHandle<Opened>),
    Streaming(mpsc::Receiver<StreamDelta>),
    /// Failed to open; waiting for the failure event to release it
    Closed,
}

struct ActiveTurn {
    turn_id: TurnId,
    cancel: CancellationToken,
    stage: Stage,
    prompt_estimate: usize,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Stage::Opening(handle) = &self.stage {
            handle.abort();
        }
    }
}

enum Step {
    Event(Event),
    Opened(Opened),
}

/// Wait for the next thing the active turn produces; pends when there is none
async fn poll_active(active: &mut Option<ActiveTurn>) -> Step {
    let Some(turn) = active.as_mut() else {
        return pending().await;
    };
    let turn_id = turn.turn_id;

    match &mut turn.stage {
        Stage::Opening(handle) => match handle.await {
            Ok(opened) => Step::Opened(opened),
            Err(e) => Step::Event(Event::Failed {
                turn_id,
                error: format!("stream task failed: {}", e),
            }),
        },
        Stage::Streaming(rx) => Step::Event(match rx.recv().await {
            Some(StreamDelta::Content(text)) => Event::Delta { turn_id, text },
            Some(StreamDelta::Done(usage)) => Event::Done { turn_id, usage },
            Some(StreamDelta::Error(error)) => Event::Failed { turn_id, error },
            None => Event::Failed {
                turn_id,
                error: "stream closed before completion".to_string(),
            },
        }),
        Stage::Closed => pending().await,
    }
}

/// Streaming session controller
pub struct SessionController {
    state: SessionState,
    backend: Arc<dyn ChatBackend>,
    store: SessionStore,
    prompts: PromptAssembler,
    memory: MemoryStore,
    session: Session,
    history: Vec<Message>,
    system_prompt: String,
    model: String,
    ladder: ContextLadder,
    heartbeat: HeartbeatTimer,
    compaction_max_tokens: usize,
    keep_recent: usize,
    active: Option<ActiveTurn>,
    /// Prompt estimate of the most recently released turn
    last_prompt_estimate: usize,
    pending: VecDeque<Event>,
    ui: Vec<UiEvent>,
    exit: bool,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("backend", &self.backend.name())
            .field("session", &self.session.id)
            .field("model", &self.model)
            .field("phase", &self.state.phase)
            .field("history", &self.history.len())
            .field("context_size", &self.ladder.current())
            .finish()
    }
}

impl SessionController {
    /// Open the current session (creating one if needed) and load its history
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: SessionStore,
        prompts: PromptAssembler,
        settings: ControllerSettings,
    ) -> Result<Self> {
        let prompts = prompts
            .with_language(settings.language.clone())
            .with_memory(settings.memory_tokens);
        let memory = MemoryStore::new(prompts.dir());
        let mut ui = Vec::new();

        let (session, history) = match store.current()? {
            Some(session) => match store.load_transcript(&session.id) {
                Ok(history) => (session, history),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Could not load current session");
                    ui.push(UiEvent::warning(format!(
                        "Could not load session {}: {}. Starting a new one.",
                        session.id, e
                    )));
                    (Self::create_current(&store, &settings.model)?, Vec::new())
                }
            },
            None => (Self::create_current(&store, &settings.model)?, Vec::new()),
        };

        if !history.is_empty() {
            ui.push(UiEvent::Transcript(history.clone()));
        }

        let system_prompt = prompts.assemble()?;
        info!(
            session_id = %session.id,
            messages = history.len(),
            model = %settings.model,
            "Session opened"
        );

        Ok(Self {
            state: SessionState::new(settings.heartbeat),
            backend,
            store,
            prompts,
            memory,
            session,
            history,
            system_prompt,
            model: settings.model,
            ladder: ContextLadder::new(settings.max_context),
            heartbeat: HeartbeatTimer::new(),
            compaction_max_tokens: settings.compaction_max_tokens,
            keep_recent: settings.keep_recent.max(1),
            active: None,
            last_prompt_estimate: 0,
            pending: VecDeque::new(),
            ui,
            exit: false,
        })
    }

    fn create_current(store: &SessionStore, model: &str) -> Result<Session> {
        let session = store.create(NEW_SESSION_TITLE, model)?;
        store.set_current(&session.id)?;
        Ok(session)
    }

    /// Kick off the first-run greeting or arm the heartbeat
    pub async fn start(&mut self) {
        let bootstrap = self.prompts.has_bootstrap();
        self.dispatch(Event::Startup { bootstrap }).await;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Context window requested for the next turn
    pub fn context_size(&self) -> u32 {
        self.ladder.current()
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn should_exit(&self) -> bool {
        self.exit
    }

    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.heartbeat.deadline()
    }

    /// Drain UI events produced since the last call
    pub fn take_ui_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.ui)
    }

    /// Apply one event and carry out its effects
    pub async fn dispatch(&mut self, event: Event) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, event);
        self.state = state;

        for effect in effects {
            if let Err(e) = self.execute(effect).await {
                warn!(error = %e, code = e.code(), "Effect failed");
                if let Some(turn_id) = self.state.turn().map(|t| t.id) {
                    self.pending.push_back(Event::Failed {
                        turn_id,
                        error: e.to_string(),
                    });
                    break;
                }
                self.ui.push(UiEvent::error(e.to_string()));
            }
        }
    }

    /// Wait for the next stream or timer event
    ///
    /// Never resolves while no turn is in flight and the heartbeat is unarmed.
    pub async fn next_event(&mut self) -> Event {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            let step = tokio::select! {
                step = poll_active(&mut self.active) => step,
                _ = self.heartbeat.fired() => return Event::HeartbeatTick,
            };

            match step {
                Step::Event(event) => return event,
                Step::Opened(opened) => self.accept_opened(opened),
            }
        }
    }

    /// Process events until no turn is in flight
    pub async fn settle(&mut self) {
        while !self.state.is_idle() || !self.pending.is_empty() {
            let event = self.next_event().await;
            self.dispatch(event).await;
        }
    }

    /// Submit a line of input and run any resulting turn to completion
    pub async fn submit(&mut self, input: impl Into<String>) {
        self.dispatch(Event::Submit(input.into())).await;
        self.settle().await;
    }

    fn accept_opened(&mut self, opened: Opened) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let turn_id = active.turn_id;
        active.prompt_estimate = opened.prompt_estimate;

        match opened.compaction {
            Some(Ok(Some(compacted))) => {
                self.pending
                    .push_back(Event::Compacted { turn_id, compacted });
            }
            Some(Err(e)) => {
                self.pending.push_back(Event::CompactionFailed {
                    turn_id,
                    error: e.to_string(),
                });
            }
            Some(Ok(None)) | None => {}
        }

        match opened.stream {
            Ok(rx) => {
                debug!(turn_id, "Stream open");
                active.stage = Stage::Streaming(rx);
            }
            Err(e) => {
                active.stage = Stage::Closed;
                self.pending.push_back(Event::Failed {
                    turn_id,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Result<()> {
        match effect {
            Effect::PersistUser { content, .. } => {
                let message = Message::user(content);
                self.store.append(&self.session.id, &message)?;
                self.name_session_from(&message.content);
                self.history.push(message);
            }
            Effect::CommitAssistant(content) => {
                let message = Message::assistant(content);
                self.store.append(&self.session.id, &message)?;
                self.history.push(message);
            }
            Effect::ReplaceHistory(messages) => {
                debug!(before = self.history.len(), after = messages.len(), "History compacted");
                self.history = messages;
            }
            Effect::OpenStream { turn_id, kind } => self.open_stream(turn_id, kind),
            Effect::ReleaseStream => {
                if let Some(active) = self.active.take() {
                    debug!(turn_id = active.turn_id, "Stream released");
                    self.last_prompt_estimate = active.prompt_estimate;
                }
            }
            Effect::ObserveUsage(usage) => self.observe_usage(usage),
            Effect::ArmHeartbeat(interval) => self.heartbeat.arm(interval),
            Effect::DisarmHeartbeat => self.heartbeat.disarm(),
            Effect::ClearBootstrapMarker => {
                self.prompts.delete_bootstrap()?;
                self.refresh_system_prompt()?;
            }
            Effect::RunCommand(command) => self.run_command(command).await?,
            Effect::Ui(event) => self.ui.push(event),
            Effect::Exit => {
                self.active = None;
                self.heartbeat.disarm();
                self.exit = true;
            }
        }
        Ok(())
    }

    fn open_stream(&mut self, turn_id: TurnId, kind: TurnKind) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let backend = Arc::clone(&self.backend);
        let model = self.model.clone();
        let context_size = self.ladder.current();
        let system = Message::system(self.system_prompt.clone());
        let language = self.prompts.language().to_string();
        let history = match kind {
            TurnKind::Bootstrap => Vec::new(),
            TurnKind::User | TurnKind::Heartbeat => self.history.clone(),
        };
        let max_tokens = self.compaction_max_tokens;
        let keep_recent = self.keep_recent;

        info!(
            turn_id,
            ?kind,
            session_id = %self.session.id,
            model = %model,
            context_size,
            "Opening stream"
        );

        let handle = tokio::spawn(async move {
            let mut compaction = None;
            let conversation = match kind {
                TurnKind::User => {
                    let outcome =
                        compact(backend.as_ref(), &model, &history, max_tokens, keep_recent).await;
                    let conversation = match &outcome {
                        Ok(Some(compacted)) => compacted.messages.clone(),
                        _ => history,
                    };
                    compaction = Some(outcome);
                    conversation
                }
                TurnKind::Heartbeat => {
                    let mut conversation = history;
                    conversation.push(Message::user(check_in_prompt(&language)));
                    conversation
                }
                TurnKind::Bootstrap => vec![Message::user(greeting_prompt(&language))],
            };

            let mut messages = Vec::with_capacity(conversation.len() + 1);
            messages.push(system);
            messages.extend(conversation);
            let prompt_estimate = estimate_tokens(&messages);

            let request = ChatRequest::new(model, messages).with_context_size(context_size);
            let stream = backend.stream_chat(request, token).await;

            Opened {
                compaction,
                prompt_estimate,
                stream,
            }
        });

        self.active = Some(ActiveTurn {
            turn_id,
            cancel,
            stage: Stage::Opening(handle),
            prompt_estimate: 0,
        });
    }

    fn observe_usage(&mut self, usage: Option<Usage>) {
        let prompt_tokens = match usage {
            Some(usage) => usage.prompt_tokens,
            None => u32::try_from(self.last_prompt_estimate).unwrap_or(u32::MAX),
        };
        if let Some(tier) = self.ladder.observe(prompt_tokens) {
            self.ui.push(UiEvent::info(format!(
                "Context expanded to {} tokens (conversation is growing). The next response may take a moment while the model reloads.",
                tier
            )));
        }
    }

    fn refresh_system_prompt(&mut self) -> Result<()> {
        self.system_prompt = self.prompts.assemble()?;
        Ok(())
    }

    /// Name an untitled session after its first user message
    fn name_session_from(&mut self, content: &str) {
        if self.session.title != NEW_SESSION_TITLE
            || self.history.iter().any(|m| m.role == Role::User)
        {
            return;
        }
        let title: String = content
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(TITLE_MAX_CHARS)
            .collect();
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        match self.store.update_title(&self.session.id, title) {
            Ok(session) => self.session = session,
            Err(e) => warn!(session_id = %self.session.id, error = %e, "Could not set session title"),
        }
    }

    async fn run_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Models => {
                let models = self.backend.list_models().await?;
                if models.is_empty() {
                    self.ui.push(UiEvent::info(
                        "No models installed. Pull one with `ollama pull <model>`.",
                    ));
                } else {
                    let lines: Vec<String> = models
                        .iter()
                        .map(|m| {
                            let marker = if m.name == self.model { "*" } else { " " };
                            format!(
                                "{} {} ({:.1} GB)",
                                marker,
                                m.name,
                                m.size as f64 / 1_000_000_000.0
                            )
                        })
                        .collect();
                    self.ui.push(UiEvent::info(format!("Models:\n{}", lines.join("\n"))));
                }
            }
            Command::Model(None) => {
                self.ui.push(UiEvent::info(format!("Current model: {}", self.model)));
            }
            Command::Model(Some(name)) => {
                info!(from = %self.model, to = %name, "Switching model");
                self.model = name.clone();
                self.ui.push(UiEvent::SettingChanged {
                    key: "model.default",
                    value: name.clone(),
                });
                self.ui.push(UiEvent::info(format!("Switched to model {}.", name)));
            }
            Command::Session(SessionCommand::New) => {
                self.session = Self::create_current(&self.store, &self.model)?;
                self.history.clear();
                self.ui.push(UiEvent::Clear);
                self.ui.push(UiEvent::info(format!(
                    "Started new session {}.",
                    self.session.id
                )));
            }
            Command::Session(SessionCommand::List) => {
                let sessions = self.store.list()?;
                let lines: Vec<String> = sessions
                    .iter()
                    .map(|s| {
                        let marker = if s.id == self.session.id { "*" } else { " " };
                        format!(
                            "{} {}  {}  ({}, {})",
                            marker,
                            s.id,
                            s.title,
                            s.model,
                            s.created_at.format("%Y-%m-%d %H:%M")
                        )
                    })
                    .collect();
                self.ui
                    .push(UiEvent::info(format!("Sessions:\n{}", lines.join("\n"))));
            }
            Command::Session(SessionCommand::Switch(id)) => {
                let session = self.store.get(&id)?;
                let history = self.store.load_transcript(&id)?;
                self.store.set_current(&id)?;
                info!(session_id = %id, messages = history.len(), "Switched session");

                self.session = session;
                self.history = history;
                self.ui.push(UiEvent::Clear);
                self.ui.push(UiEvent::Transcript(self.history.clone()));
                self.ui.push(UiEvent::info(format!(
                    "Resumed session {} ({} messages).",
                    id,
                    self.history.len()
                )));
            }
            Command::Session(SessionCommand::Delete(id)) => {
                if id == self.session.id {
                    return Err(Error::InvalidInput(
                        "cannot delete the active session; switch to another one first"
                            .to_string(),
                    ));
                }
                self.store.delete(&id)?;
                self.ui.push(UiEvent::info(format!("Deleted session {}.", id)));
            }
            Command::Memory => {
                let entries = self.memory.entries()?;
                if entries.is_empty() {
                    self.ui.push(UiEvent::info(
                        "Nothing remembered yet. Use /remember <fact>.",
                    ));
                } else {
                    let lines: Vec<String> = entries.iter().map(|e| format!("- {}", e)).collect();
                    self.ui
                        .push(UiEvent::info(format!("Memory:\n{}", lines.join("\n"))));
                }
            }
            Command::Remember(fact) => {
                self.memory.append(&fact)?;
                self.refresh_system_prompt()?;
                self.ui.push(UiEvent::info("Remembered."));
            }
            Command::Forget(keyword) => {
                let removed = self.memory.forget(&keyword)?;
                self.refresh_system_prompt()?;
                self.ui
                    .push(UiEvent::info(format!("Forgot {} fact(s).", removed)));
            }
            Command::Language(None) => {
                let language = match self.prompts.language() {
                    "" => "English",
                    language => language,
                };
                self.ui
                    .push(UiEvent::info(format!("Current language: {}", language)));
            }
            Command::Language(Some(language)) => {
                self.prompts.set_language(language.clone());
                self.refresh_system_prompt()?;
                self.ui.push(UiEvent::SettingChanged {
                    key: "language",
                    value: language.clone(),
                });
                self.ui
                    .push(UiEvent::info(format!("Replies will be in {}.", language)));
            }
            Command::Personality => {
                self.ui.push(UiEvent::info(format!(
                    "Open your personality files at:\n  {}",
                    self.prompts.dir().display()
                )));
            }
            // Handled by the state machine
            Command::Help | Command::Quit | Command::Clear | Command::Heartbeat(_) => {}
        }
        Ok(())
    }
}
