//! Session state machine
//!
//! `transition` is a pure function from the current state and one event to
//! the next state and the effects the runner must carry out. It does no
//! I/O, so every path through a turn can be tested directly.
//!
//! ```text
//! Idle --submit--> Waiting --delta--> Streaming --delta--> Streaming
//!   ^                 |                   |
//!   +----done / error / cancel------------+
//! ```

use std::time::Duration;

use crate::context::Compacted;
use crate::heartbeat::is_skip;
use crate::llm::{Message, Usage};

use super::commands::{Command, HELP_TEXT, HeartbeatCommand, parse_command};

pub type TurnId = u64;

/// What triggered a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    User,
    /// First-run greeting
    Bootstrap,
    /// Scheduled check-in
    Heartbeat,
}

/// A turn in flight and its uncommitted reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub kind: TurnKind,
    pub buffer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// Stream requested, nothing received yet
    Waiting(Turn),
    /// Receiving content
    Streaming(Turn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(4 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub heartbeat: HeartbeatSettings,
    next_turn_id: TurnId,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(HeartbeatSettings::default())
    }
}

impl SessionState {
    pub fn new(heartbeat: HeartbeatSettings) -> Self {
        Self {
            phase: Phase::Idle,
            heartbeat,
            next_turn_id: 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn turn(&self) -> Option<&Turn> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Waiting(turn) | Phase::Streaming(turn) => Some(turn),
        }
    }

    /// Take the in-flight turn if `turn_id` names it
    fn take_turn(&mut self, turn_id: TurnId) -> Option<Turn> {
        if self.turn().map(|t| t.id) != Some(turn_id) {
            return None;
        }
        match std::mem::take(&mut self.phase) {
            Phase::Waiting(turn) | Phase::Streaming(turn) => Some(turn),
            Phase::Idle => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Controller started; `bootstrap` when the first-run marker exists
    Startup { bootstrap: bool },
    /// A line of user input
    Submit(String),
    HeartbeatTick,
    Compacted { turn_id: TurnId, compacted: Compacted },
    CompactionFailed { turn_id: TurnId, error: String },
    Delta { turn_id: TurnId, text: String },
    Done { turn_id: TurnId, usage: Option<Usage> },
    Failed { turn_id: TurnId, error: String },
    /// User abort
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply appended to the transcript
    Committed,
    /// Heartbeat declined with the skip sentinel
    Skipped,
    /// Backend finished without content
    Empty,
    Failed,
    Cancelled,
}

/// Everything the terminal needs to render
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Notice { level: NoticeLevel, text: String },
    /// History of a freshly opened session
    Transcript(Vec<Message>),
    /// Turn opened, no content yet
    Thinking,
    /// Live fragment; never sent for heartbeat turns
    Partial(String),
    /// Committed reply; `streamed` when it was already shown as partials
    Reply { content: String, streamed: bool },
    TurnEnded { kind: TurnKind, outcome: TurnOutcome },
    /// A persistent setting changed at runtime
    SettingChanged { key: &'static str, value: String },
    Clear,
    Exit,
}

impl UiEvent {
    pub fn info(text: impl Into<String>) -> Self {
        UiEvent::Notice {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        UiEvent::Notice {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        UiEvent::Notice {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Work for the runner, executed in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append the user message to transcript and history
    PersistUser { turn_id: TurnId, content: String },
    /// Append the assistant reply to transcript and history
    CommitAssistant(String),
    /// Swap in the compacted history
    ReplaceHistory(Vec<Message>),
    OpenStream { turn_id: TurnId, kind: TurnKind },
    /// Cancel and drop the active stream, if any
    ReleaseStream,
    /// Feed the finished turn's prompt size to the context ladder
    ObserveUsage(Option<Usage>),
    ArmHeartbeat(Duration),
    DisarmHeartbeat,
    ClearBootstrapMarker,
    RunCommand(Command),
    Ui(UiEvent),
    Exit,
}

/// Advance the state machine by one event
pub fn transition(mut state: SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    let mut effects = Vec::new();

    match event {
        Event::Startup { bootstrap } => {
            if bootstrap && state.is_idle() {
                open_turn(&mut state, TurnKind::Bootstrap, None, &mut effects);
            } else if state.heartbeat.enabled {
                effects.push(Effect::ArmHeartbeat(state.heartbeat.interval));
            }
        }

        Event::Submit(input) => {
            let input = input.trim();
            if input.is_empty() {
                return (state, effects);
            }
            let command = parse_command(input);

            if !state.is_idle() {
                if matches!(command, Some(Ok(Command::Quit))) {
                    effects.push(Effect::ReleaseStream);
                    state.phase = Phase::Idle;
                    effects.push(Effect::Ui(UiEvent::Exit));
                    effects.push(Effect::Exit);
                } else {
                    effects.push(Effect::Ui(UiEvent::warning(
                        crate::error::Error::TurnInFlight.to_string(),
                    )));
                }
                return (state, effects);
            }

            match command {
                Some(Ok(command)) => apply_command(&mut state, command, &mut effects),
                Some(Err(e)) => effects.push(Effect::Ui(UiEvent::warning(e.to_string()))),
                None => open_turn(&mut state, TurnKind::User, Some(input.to_string()), &mut effects),
            }
        }

        Event::HeartbeatTick => {
            if state.is_idle() && state.heartbeat.enabled {
                open_turn(&mut state, TurnKind::Heartbeat, None, &mut effects);
            }
        }

        Event::Compacted { turn_id, compacted } => {
            if state.turn().map(|t| t.id) == Some(turn_id) {
                let result = &compacted.result;
                effects.push(Effect::Ui(UiEvent::info(format!(
                    "Compacted {} earlier messages into a summary (~{} tokens).",
                    result.original_count - (result.remaining_count - 1),
                    result.compacted_tokens
                ))));
                effects.push(Effect::ReplaceHistory(compacted.messages));
            }
        }

        Event::CompactionFailed { turn_id, error } => {
            if state.turn().map(|t| t.id) == Some(turn_id) {
                effects.push(Effect::Ui(UiEvent::warning(format!(
                    "{}. Continuing with the full history.",
                    error
                ))));
            }
        }

        Event::Delta { turn_id, text } => {
            let phase = std::mem::take(&mut state.phase);
            state.phase = match phase {
                Phase::Waiting(mut turn) | Phase::Streaming(mut turn) if turn.id == turn_id => {
                    if !text.is_empty() {
                        turn.buffer.push_str(&text);
                        if turn.kind != TurnKind::Heartbeat {
                            effects.push(Effect::Ui(UiEvent::Partial(text)));
                        }
                    }
                    Phase::Streaming(turn)
                }
                other => other,
            };
        }

        Event::Done { turn_id, usage } => {
            if let Some(turn) = state.take_turn(turn_id) {
                effects.push(Effect::ReleaseStream);

                let outcome = if turn.buffer.trim().is_empty() {
                    TurnOutcome::Empty
                } else if turn.kind == TurnKind::Heartbeat && is_skip(&turn.buffer) {
                    TurnOutcome::Skipped
                } else {
                    effects.push(Effect::CommitAssistant(turn.buffer.clone()));
                    effects.push(Effect::Ui(UiEvent::Reply {
                        content: turn.buffer,
                        streamed: turn.kind != TurnKind::Heartbeat,
                    }));
                    TurnOutcome::Committed
                };

                effects.push(Effect::ObserveUsage(usage));
                if turn.kind == TurnKind::Bootstrap {
                    effects.push(Effect::ClearBootstrapMarker);
                }
                finish_turn(&state, turn.kind, outcome, &mut effects);
            }
        }

        Event::Failed { turn_id, error } => {
            if let Some(turn) = state.take_turn(turn_id) {
                effects.push(Effect::ReleaseStream);
                effects.push(Effect::Ui(UiEvent::error(format!("Error: {}", error))));
                finish_turn(&state, turn.kind, TurnOutcome::Failed, &mut effects);
            }
        }

        Event::Cancel => {
            if let Some(turn) = state.turn().cloned() {
                state.phase = Phase::Idle;
                effects.push(Effect::ReleaseStream);
                finish_turn(&state, turn.kind, TurnOutcome::Cancelled, &mut effects);
            }
        }
    }

    (state, effects)
}

fn open_turn(
    state: &mut SessionState,
    kind: TurnKind,
    user_content: Option<String>,
    effects: &mut Vec<Effect>,
) {
    let turn_id = state.next_turn_id;
    state.next_turn_id += 1;
    state.phase = Phase::Waiting(Turn {
        id: turn_id,
        kind,
        buffer: String::new(),
    });

    if let Some(content) = user_content {
        effects.push(Effect::PersistUser { turn_id, content });
    }
    // User activity pushes the next check-in back
    if kind == TurnKind::User && state.heartbeat.enabled {
        effects.push(Effect::ArmHeartbeat(state.heartbeat.interval));
    }
    if kind != TurnKind::Heartbeat {
        effects.push(Effect::Ui(UiEvent::Thinking));
    }
    effects.push(Effect::OpenStream { turn_id, kind });
}

fn finish_turn(
    state: &SessionState,
    kind: TurnKind,
    outcome: TurnOutcome,
    effects: &mut Vec<Effect>,
) {
    effects.push(Effect::Ui(UiEvent::TurnEnded { kind, outcome }));
    if state.heartbeat.enabled {
        effects.push(Effect::ArmHeartbeat(state.heartbeat.interval));
    }
}

fn describe_heartbeat(settings: &HeartbeatSettings) -> String {
    if settings.enabled {
        format!(
            "Heartbeat is on (every {}).",
            humantime::format_duration(settings.interval)
        )
    } else {
        "Heartbeat is off.".to_string()
    }
}

fn apply_command(state: &mut SessionState, command: Command, effects: &mut Vec<Effect>) {
    match command {
        Command::Help => effects.push(Effect::Ui(UiEvent::info(HELP_TEXT))),
        Command::Quit => {
            effects.push(Effect::Ui(UiEvent::Exit));
            effects.push(Effect::Exit);
        }
        Command::Clear => effects.push(Effect::Ui(UiEvent::Clear)),
        Command::Heartbeat(action) => {
            match action {
                HeartbeatCommand::Status => {}
                HeartbeatCommand::On => {
                    state.heartbeat.enabled = true;
                    effects.push(Effect::ArmHeartbeat(state.heartbeat.interval));
                }
                HeartbeatCommand::Off => {
                    state.heartbeat.enabled = false;
                    effects.push(Effect::DisarmHeartbeat);
                }
                HeartbeatCommand::Every(interval) => {
                    state.heartbeat.enabled = true;
                    state.heartbeat.interval = interval;
                    effects.push(Effect::ArmHeartbeat(interval));
                    effects.push(Effect::Ui(UiEvent::SettingChanged {
                        key: "heartbeat.interval",
                        value: humantime::format_duration(interval).to_string(),
                    }));
                }
            }
            if action != HeartbeatCommand::Status {
                effects.push(Effect::Ui(UiEvent::SettingChanged {
                    key: "heartbeat.enabled",
                    value: state.heartbeat.enabled.to_string(),
                }));
            }
            effects.push(Effect::Ui(UiEvent::info(describe_heartbeat(&state.heartbeat))));
        }
        other => effects.push(Effect::RunCommand(other)),
    }
}
