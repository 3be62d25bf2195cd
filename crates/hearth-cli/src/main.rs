//! Hearth CLI - local-first terminal chat

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hearth_core::config::Config;
use hearth_core::controller::{
    ControllerSettings, Event, NoticeLevel, SessionController, TurnOutcome, UiEvent,
};
use hearth_core::llm::{self, ChatBackend, ChatRequest, Message, OllamaClient, Role};
use hearth_core::prompt::PromptAssembler;
use hearth_core::session::SessionStore;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const PROMPT: &str = "> ";

#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about = "Local-first terminal chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ollama server URL (overrides OLLAMA_HOST and the config file)
    #[arg(long, global = true)]
    ollama_url: Option<String>,

    /// Model to chat with (overrides model.default)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,

    /// Ask a single question and print the answer
    Ask {
        /// Question text; read from stdin when omitted
        question: Vec<String>,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// List installed models
    Models,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum SessionAction {
    /// List all sessions
    List,
    /// Print a session transcript
    Show { id: String },
    /// Delete a session
    Delete { id: String },
}

#[derive(Subcommand, Debug, PartialEq)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Connection settings given on the command line
struct Overrides {
    ollama_url: Option<String>,
    model: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model.default = model.clone();
        }
    }

    fn client(&self, config: &Config) -> anyhow::Result<OllamaClient> {
        let base_url = match &self.ollama_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => config.backend.resolved_base_url(),
        };
        debug!(base_url = %base_url, "Using Ollama endpoint");
        Ok(OllamaClient::new(base_url)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Chat output owns stdout; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearth=warn")),
        )
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        ollama_url: cli.ollama_url,
        model: cli.model,
    };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => cmd_chat(&overrides, cli.quiet).await,
        Commands::Ask { question } => cmd_ask(&overrides, question).await,
        Commands::Sessions { action } => cmd_sessions(action, cli.quiet),
        Commands::Models => cmd_models(&overrides).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn probe(client: &OllamaClient, config: &Config) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(config.backend.probe_timeout_secs);
    if let Err(e) = llm::probe(client, timeout).await {
        eprintln!("Cannot reach Ollama at {}.", client.base_url());
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Try: {}", suggestion);
        }
        return Err(e.into());
    }
    Ok(())
}

async fn cmd_chat(overrides: &Overrides, quiet: bool) -> anyhow::Result<()> {
    let (mut config, first_run) = Config::load_or_init()?;
    overrides.apply(&mut config);

    let prompts = PromptAssembler::new(Config::personality_dir()?);
    prompts.init_defaults()?;
    if first_run {
        info!("First run; writing bootstrap marker");
        prompts.write_bootstrap()?;
    }

    let client = overrides.client(&config)?;
    probe(&client, &config).await?;

    let backend: Arc<dyn ChatBackend> = Arc::new(client);
    let store = SessionStore::new(Config::sessions_dir()?);
    let mut controller = SessionController::new(
        backend,
        store,
        prompts,
        ControllerSettings::from_config(&config),
    )?;

    if !quiet {
        println!(
            "Hearth ({}) - session {}. Type /help for commands.",
            controller.model(),
            controller.session().id
        );
    }

    let history_path = Config::config_dir().ok().map(|dir| dir.join("history.txt"));
    let (ready_tx, mut input_rx) = spawn_reader(history_path)?;
    let mut renderer = Renderer::default();
    let mut awaiting_input = false;

    controller.start().await;

    loop {
        renderer.render(controller.take_ui_events());
        if controller.should_exit() {
            break;
        }

        if controller.is_idle() && !awaiting_input {
            if ready_tx.send(()).is_err() {
                break;
            }
            awaiting_input = true;
        }

        let busy = !controller.is_idle();
        tokio::select! {
            input = input_rx.recv() => {
                awaiting_input = false;
                match input {
                    Some(Input::Line(line)) => controller.dispatch(Event::Submit(line)).await,
                    Some(Input::Interrupted) | Some(Input::Eof) | None => break,
                }
            }
            _ = tokio::signal::ctrl_c(), if busy => {
                controller.dispatch(Event::Cancel).await;
            }
            event = controller.next_event() => {
                controller.dispatch(event).await;
            }
        }
    }

    renderer.render(controller.take_ui_events());
    if !quiet {
        println!("Bye.");
    }
    Ok(())
}

async fn cmd_ask(overrides: &Overrides, question: Vec<String>) -> anyhow::Result<()> {
    let question = if question.is_empty() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        question.join(" ")
    };
    let question = question.trim();
    if question.is_empty() {
        anyhow::bail!("No question given. Pass it as arguments or on stdin.");
    }

    let mut config = Config::load()?;
    overrides.apply(&mut config);
    let client = overrides.client(&config)?;

    let prompts = PromptAssembler::new(Config::personality_dir()?)
        .with_language(config.language.clone())
        .with_memory(
            config
                .memory
                .enabled
                .then_some(config.memory.max_prompt_tokens),
        );
    let messages = vec![Message::system(prompts.assemble()?), Message::user(question)];

    let request = ChatRequest::new(config.model.default.clone(), messages);
    let response = client.chat(request).await?;
    println!("{}", response.message.content.trim());
    Ok(())
}

fn cmd_sessions(action: SessionAction, quiet: bool) -> anyhow::Result<()> {
    let store = SessionStore::new(Config::sessions_dir()?);
    match action {
        SessionAction::List => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                if !quiet {
                    println!("No sessions yet.");
                    println!("\nStart one with: hearth chat");
                }
                return Ok(());
            }
            let current = store.current()?.map(|s| s.id);
            for s in sessions {
                let marker = if current.as_deref() == Some(s.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {}  ({}, updated {})",
                    marker,
                    s.id,
                    s.title,
                    s.model,
                    s.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        SessionAction::Show { id } => {
            let session = store.get(&id)?;
            if !quiet {
                println!("{} - {} ({})\n", session.id, session.title, session.model);
            }
            for message in store.load_transcript(&id)? {
                println!("{}\n", format_message(&message));
            }
        }
        SessionAction::Delete { id } => {
            store.delete(&id)?;
            if !quiet {
                println!("Deleted session {}.", id);
            }
        }
    }
    Ok(())
}

async fn cmd_models(overrides: &Overrides) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    overrides.apply(&mut config);
    let client = overrides.client(&config)?;
    probe(&client, &config).await?;

    let models = client.list_models().await?;
    if models.is_empty() {
        println!("No models installed. Pull one with `ollama pull {}`.", config.model.default);
        return Ok(());
    }
    for m in models {
        let marker = if m.name == config.model.default { "*" } else { " " };
        println!("{} {:<32} {:>6.1} GB", marker, m.name, m.size as f64 / 1_000_000_000.0);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

// ============================================================================
// Terminal I/O
// ============================================================================

enum Input {
    Line(String),
    Interrupted,
    Eof,
}

/// Run the line editor on its own thread
///
/// The thread reads one line per unit received on the returned sender, so
/// the prompt only appears when the chat loop asks for input.
fn spawn_reader(
    history_path: Option<PathBuf>,
) -> anyhow::Result<(std::sync::mpsc::Sender<()>, mpsc::Receiver<Input>)> {
    let mut editor = DefaultEditor::new()?;
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    let (input_tx, input_rx) = mpsc::channel(1);

    std::thread::spawn(move || {
        while ready_rx.recv().is_ok() {
            let input = match editor.readline(PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                        if let Some(path) = &history_path
                            && let Err(e) = editor.save_history(path)
                        {
                            debug!(error = %e, "Could not save input history");
                        }
                    }
                    Input::Line(line)
                }
                Err(ReadlineError::Interrupted) => Input::Interrupted,
                Err(ReadlineError::Eof) => Input::Eof,
                Err(e) => {
                    warn!(error = %e, "Line editor failed");
                    Input::Eof
                }
            };
            if input_tx.blocking_send(input).is_err() {
                break;
            }
        }
    });

    Ok((ready_tx, input_rx))
}

fn format_message(message: &Message) -> String {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "hearth",
        Role::System => "system",
        Role::Summary => "summary",
    };
    format!("{}> {}", label, message.content)
}

/// Plain-text rendering of controller output
#[derive(Default)]
struct Renderer {
    /// A "thinking" line is on screen and must be erased
    thinking: bool,
    /// Partial text has been printed for the current turn
    streaming: bool,
}

impl Renderer {
    fn render(&mut self, events: Vec<UiEvent>) {
        if events.is_empty() {
            return;
        }
        let mut out = io::stdout().lock();
        for event in events {
            self.render_one(&mut out, event);
        }
        let _ = out.flush();
    }

    fn clear_thinking(&mut self, out: &mut impl Write) {
        if self.thinking {
            let _ = write!(out, "\r\x1b[K");
            self.thinking = false;
        }
    }

    fn render_one(&mut self, out: &mut impl Write, event: UiEvent) {
        match event {
            UiEvent::Notice { level, text } => {
                self.clear_thinking(out);
                if self.streaming {
                    let _ = writeln!(out);
                    self.streaming = false;
                }
                match level {
                    NoticeLevel::Info => {
                        let _ = writeln!(out, "{}", text);
                    }
                    NoticeLevel::Warning => {
                        let _ = writeln!(out, "Warning: {}", text);
                    }
                    NoticeLevel::Error => eprintln!("{}", text),
                }
            }
            UiEvent::Transcript(messages) => {
                for message in &messages {
                    let _ = writeln!(out, "{}\n", format_message(message));
                }
            }
            UiEvent::Thinking => {
                let _ = write!(out, "thinking...");
                self.thinking = true;
            }
            UiEvent::Partial(text) => {
                self.clear_thinking(out);
                if !self.streaming {
                    let _ = write!(out, "hearth> ");
                    self.streaming = true;
                }
                let _ = write!(out, "{}", text);
            }
            UiEvent::Reply { content, streamed } => {
                self.clear_thinking(out);
                if streamed {
                    let _ = writeln!(out, "\n");
                } else {
                    let _ = writeln!(out, "\nhearth> {}\n", content);
                }
                self.streaming = false;
            }
            UiEvent::TurnEnded { outcome, .. } => {
                self.clear_thinking(out);
                match outcome {
                    TurnOutcome::Cancelled => {
                        let _ = writeln!(out, "{}[stopped]", if self.streaming { "\n" } else { "" });
                    }
                    TurnOutcome::Empty => {
                        let _ = writeln!(out, "(no response)");
                    }
                    TurnOutcome::Committed | TurnOutcome::Skipped | TurnOutcome::Failed => {}
                }
                self.streaming = false;
            }
            UiEvent::SettingChanged { key, value } => persist_setting(key, &value),
            UiEvent::Clear => {
                let _ = write!(out, "\x1b[2J\x1b[H");
            }
            UiEvent::Exit => {}
        }
    }
}

/// Write a setting changed from inside the chat back to the config file
fn persist_setting(key: &str, value: &str) {
    let result = Config::load().and_then(|mut config| {
        config.set(key, value)?;
        config.save()
    });
    match result {
        Ok(()) => debug!(key, value, "Saved setting"),
        Err(e) => warn!(key, error = %e, "Could not save setting"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_is_default_command() {
        let cli = Cli::try_parse_from(["hearth"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["hearth", "chat", "--model", "llama3.2"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Chat));
        assert_eq!(cli.model.as_deref(), Some("llama3.2"));
    }

    #[test]
    fn test_global_url_flag() {
        let cli =
            Cli::try_parse_from(["hearth", "--ollama-url", "http://gpu:11434", "models"]).unwrap();
        assert_eq!(cli.ollama_url.as_deref(), Some("http://gpu:11434"));
        assert_eq!(cli.command, Some(Commands::Models));
    }

    #[test]
    fn test_ask_collects_words() {
        let cli = Cli::try_parse_from(["hearth", "ask", "what", "is", "rust"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Ask {
                question: vec!["what".into(), "is".into(), "rust".into()]
            })
        );
    }

    #[test]
    fn test_sessions_subcommands() {
        let cli = Cli::try_parse_from(["hearth", "sessions", "show", "20260314-150926-k3x9"])
            .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Sessions {
                action: SessionAction::Show {
                    id: "20260314-150926-k3x9".into()
                }
            })
        );
        assert!(Cli::try_parse_from(["hearth", "sessions", "delete"]).is_err());
    }

    #[test]
    fn test_url_override_wins() {
        let overrides = Overrides {
            ollama_url: Some("http://gpu:11434/".into()),
            model: Some("llama3.2".into()),
        };
        let mut config = Config::default();
        overrides.apply(&mut config);
        assert_eq!(config.model.default, "llama3.2");

        let client = overrides.client(&config).unwrap();
        assert_eq!(client.base_url(), "http://gpu:11434");
    }

    #[test]
    fn test_format_message_labels() {
        assert_eq!(format_message(&Message::user("hi")), "you> hi");
        assert_eq!(format_message(&Message::assistant("hello")), "hearth> hello");
    }
}
