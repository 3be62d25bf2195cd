//! Session controller
//!
//! `state` holds the pure transition function: an event and the current
//! state go in, the next state and a list of effects come out. `runner`
//! executes those effects against the backend, the session store and the
//! heartbeat timer.

pub mod commands;
mod runner;
pub mod state;

pub use commands::{Command, HELP_TEXT, HeartbeatCommand, SessionCommand, parse_command};
pub use runner::{ControllerSettings, NEW_SESSION_TITLE, SessionController};
pub use state::{
    Effect, Event, HeartbeatSettings, NoticeLevel, Phase, SessionState, Turn, TurnKind,
    TurnOutcome, UiEvent, transition,
};
