//! Line-oriented operator console
//!
//! Reads commands from stdin and drives the link manager. Link events are
//! rendered by [`render_events`] into a shared [`StatusView`].

use crate::domain::models::{
    AppEvent, ConnectionState, ErrorReport, MessageSeverity, PeerDescriptor, SpeedSample,
    StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::directory::PeerDirectory;
use crate::infrastructure::bluetooth::LinkManager;
use crate::infrastructure::speed::SpeedFeed;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const HELP: &str = "\
commands:
  peers            list paired devices
  select <n|id>    pick a device by list number or id
  clear            close the link and forget the selection
  toggle           open when closed, close otherwise
  open | close     drive the link explicitly
  status           show link state, speed and last line sent
  speed <mph>      feed the simulated source
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Peers,
    Select(String),
    Clear,
    Toggle,
    Open,
    Close,
    Status,
    Speed(f64),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
    #[error("`{0}` is not a speed")]
    InvalidSpeed(String),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "peers" | "ls" => ConsoleCommand::Peers,
        "select" | "sel" => {
            let target = argument.ok_or(CommandError::MissingArgument("select"))?;
            ConsoleCommand::Select(target.to_string())
        }
        "clear" => ConsoleCommand::Clear,
        "toggle" | "t" => ConsoleCommand::Toggle,
        "open" => ConsoleCommand::Open,
        "close" => ConsoleCommand::Close,
        "status" | "s" => ConsoleCommand::Status,
        "speed" => {
            let value = argument.ok_or(CommandError::MissingArgument("speed"))?;
            let mph = value
                .parse::<f64>()
                .map_err(|_| CommandError::InvalidSpeed(value.to_string()))?;
            ConsoleCommand::Speed(mph)
        }
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Latest picture of the relay, fed by link and telemetry events.
#[derive(Debug, Default)]
pub struct StatusView {
    pub state: ConnectionState,
    pub sample: Option<SpeedSample>,
    pub last_line: Option<String>,
    pub last_error: Option<ErrorReport>,
    pub status: Option<StatusMessage>,
}

impl StatusView {
    /// Fold an event in. Returns a line worth printing, if any.
    pub fn apply(&mut self, event: AppEvent) -> Option<String> {
        match event {
            AppEvent::ConnectionStatus(state) => {
                self.state = state;
                if state == ConnectionState::Open {
                    self.last_error = None;
                }
                None
            }
            AppEvent::Speed(sample) => {
                self.sample = Some(sample);
                None
            }
            AppEvent::Transmitted(line) => {
                self.last_line = Some(line);
                None
            }
            AppEvent::Error(report) => {
                self.last_error = Some(report);
                None
            }
            AppEvent::LogMessage(msg) => {
                let tag = match msg.severity {
                    MessageSeverity::Info => "info",
                    MessageSeverity::Success => " ok ",
                    MessageSeverity::Warning => "warn",
                    MessageSeverity::Error => "fail",
                };
                let line = format!("[{}] {}", tag, msg.message);
                self.status = Some(msg);
                Some(line)
            }
        }
    }

    pub fn summary(&self, peer: Option<&PeerDescriptor>) -> String {
        let mut out = format!("Link: {}", self.state);
        if let Some(peer) = peer {
            out.push_str(&format!(" ({})", peer.display_name()));
        }
        match &self.sample {
            Some(sample) => out.push_str(&format!(
                " | Speed: {:.2} mph (raw {:.2}, {})",
                sample.speed_mph, sample.raw_mph, sample.source
            )),
            None => out.push_str(" | Speed: --"),
        }
        if let Some(line) = &self.last_line {
            out.push_str(&format!(" | Last TX: {}", line.trim_end()));
        }
        if let Some(err) = &self.last_error {
            out.push_str(&format!(" | Last error: {}", err.message));
        }
        out
    }
}

pub type SharedView = Arc<Mutex<StatusView>>;

/// Fold events into `view` and print notable ones until the channel closes.
pub async fn render_events(mut events: mpsc::UnboundedReceiver<AppEvent>, view: SharedView) {
    while let Some(event) = events.recv().await {
        let line = view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event);
        if let Some(line) = line {
            println!("{}", line);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    InputClosed,
}

pub struct Console {
    link: LinkManager,
    directory: Box<dyn PeerDirectory>,
    settings: SettingsService,
    view: SharedView,
    feed: Option<SpeedFeed>,
    listing: Vec<PeerDescriptor>,
    selected: Option<PeerDescriptor>,
}

impl Console {
    pub fn new(
        link: LinkManager,
        directory: Box<dyn PeerDirectory>,
        settings: SettingsService,
        view: SharedView,
        feed: Option<SpeedFeed>,
    ) -> Self {
        let mut console = Self {
            link,
            directory,
            settings,
            view,
            feed,
            listing: Vec::new(),
            selected: None,
        };
        console.restore_selection();
        console
    }

    fn restore_selection(&mut self) {
        let Some(id) = self.settings.get().last_selected_peer.clone() else {
            return;
        };
        self.refresh_listing();
        let peer = self
            .listing
            .iter()
            .find(|peer| peer.id == id)
            .cloned()
            .unwrap_or_else(|| PeerDescriptor::new(id, ""));
        info!("Restored selection {}", peer.display_name());
        self.selected = Some(peer);
    }

    fn refresh_listing(&mut self) {
        match self.directory.list_paired() {
            Ok(peers) => self.listing = peers,
            Err(e) => warn!("Peer enumeration failed: {}", e),
        }
    }

    pub fn selected(&self) -> Option<&PeerDescriptor> {
        self.selected.as_ref()
    }

    fn set_selection(&mut self, peer: Option<PeerDescriptor>) {
        if let Err(e) = self.settings.remember_selection(peer.as_ref()) {
            warn!("Could not persist selection: {:#}", e);
        }
        self.selected = peer;
    }

    fn resolve(&mut self, target: &str) -> Option<PeerDescriptor> {
        if self.listing.is_empty() {
            self.refresh_listing();
        }
        if let Ok(number) = target.parse::<usize>() {
            return number
                .checked_sub(1)
                .and_then(|index| self.listing.get(index))
                .cloned();
        }
        let peer = self
            .listing
            .iter()
            .find(|peer| peer.id == target)
            .cloned()
            .unwrap_or_else(|| PeerDescriptor::new(target, ""));
        Some(peer)
    }

    pub fn execute<W: Write>(
        &mut self,
        command: ConsoleCommand,
        out: &mut W,
    ) -> std::io::Result<Flow> {
        match command {
            ConsoleCommand::Peers => {
                self.refresh_listing();
                if self.listing.is_empty() {
                    writeln!(out, "No paired devices found")?;
                }
                for (index, peer) in self.listing.iter().enumerate() {
                    let marker = if self.selected.as_ref() == Some(peer) {
                        '*'
                    } else {
                        ' '
                    };
                    writeln!(
                        out,
                        "{} {:>2}. {} [{}]",
                        marker,
                        index + 1,
                        peer.display_name(),
                        peer.id
                    )?;
                }
            }
            ConsoleCommand::Select(target) => {
                if self.link.state().is_active() {
                    writeln!(out, "Close the link before choosing another device")?;
                    return Ok(Flow::Continue);
                }
                match self.resolve(&target) {
                    Some(peer) => {
                        writeln!(out, "Selected {} [{}]", peer.display_name(), peer.id)?;
                        self.set_selection(Some(peer));
                    }
                    None => writeln!(out, "No device numbered {} (see `peers`)", target)?,
                }
            }
            ConsoleCommand::Clear => {
                self.link.close();
                self.set_selection(None);
                writeln!(out, "Selection cleared")?;
            }
            ConsoleCommand::Toggle => {
                // Failures arrive as events
                let _ = self.link.toggle(self.selected.as_ref());
            }
            ConsoleCommand::Open => {
                let _ = self.link.open(self.selected.as_ref());
            }
            ConsoleCommand::Close => self.link.close(),
            ConsoleCommand::Status => {
                let peer = self.link.peer().or_else(|| self.selected.clone());
                let summary = self
                    .view
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .summary(peer.as_ref());
                writeln!(out, "{}", summary)?;
            }
            ConsoleCommand::Speed(mph) => match &self.feed {
                Some(feed) if feed.push_mph(mph) => {
                    writeln!(out, "Simulated speed {:.2} mph", mph)?
                }
                Some(_) => writeln!(out, "Simulated source is stopped")?,
                None => writeln!(out, "Speed can only be set on the simulated source")?,
            },
            ConsoleCommand::Help => writeln!(out, "{}", HELP)?,
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Serve commands until `quit` or until the line source goes away.
    pub async fn run(
        &mut self,
        mut lines: mpsc::UnboundedReceiver<String>,
    ) -> anyhow::Result<ConsoleExit> {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "Type `help` for commands")?;

        while let Some(line) = lines.recv().await {
            match parse_command(&line) {
                Ok(Some(command)) => {
                    if self.execute(command, &mut stdout)? == Flow::Quit {
                        return Ok(ConsoleExit::Quit);
                    }
                }
                Ok(None) => {}
                Err(e) => writeln!(stdout, "{}", e)?,
            }
            stdout.flush()?;
        }
        Ok(ConsoleExit::InputClosed)
    }
}

/// Forward stdin lines from a detached thread, so a pending read never holds
/// up runtime shutdown.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}
