//! Command-monitoring capture.
//!
//! Each client entity owns an append-only log of the command events the
//! driver emitted on its behalf. The driver writes to the log through its
//! event-handler registration; the interpreter only ever reads it.

use std::sync::{Arc, Mutex};

use mongodb::{
    bson::Bson,
    event::command::{
        CommandEventHandler,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
    },
    options::ServerAddress,
};

/// A single captured command-monitoring event.
#[derive(Clone, Debug)]
pub enum CommandEvent {
    Started(CommandStartedEvent),
    Succeeded(CommandSucceededEvent),
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    pub fn command_name(&self) -> &str {
        match self {
            CommandEvent::Started(event) => event.command_name.as_str(),
            CommandEvent::Succeeded(event) => event.command_name.as_str(),
            CommandEvent::Failed(event) => event.command_name.as_str(),
        }
    }

    pub fn as_started(&self) -> Option<&CommandStartedEvent> {
        match self {
            CommandEvent::Started(event) => Some(event),
            _ => None,
        }
    }
}

/// Shared append-only store for the events observed on one client.
#[derive(Clone, Debug, Default)]
pub struct CommandEventBuffer {
    events: Arc<Mutex<Vec<CommandEvent>>>,
}

impl CommandEventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: CommandEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<CommandEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn started_events(&self) -> Vec<CommandStartedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| event.as_started().cloned())
            .collect()
    }

    /// The server address the most recent command was sent to, if any
    /// command has started yet.
    pub(crate) fn last_started_address(&self) -> Option<ServerAddress> {
        self.started_events()
            .last()
            .map(|event| event.connection.address.clone())
    }
}

/// The driver-facing side of a [`CommandEventBuffer`]. Commands named in
/// `ignore` (plus a fixed set of connection-handshake commands) are not
/// recorded, mirroring the test format's `ignoreCommandMonitoringEvents`.
pub(crate) struct EventCollector {
    buffer: CommandEventBuffer,
    ignore: Vec<String>,
}

const HANDSHAKE_COMMANDS: &[&str] = &["isMaster", "ismaster", "hello"];

impl EventCollector {
    pub(crate) fn new(buffer: CommandEventBuffer, ignore: Vec<String>) -> Self {
        Self { buffer, ignore }
    }

    fn observes(&self, command_name: &str) -> bool {
        !HANDSHAKE_COMMANDS.contains(&command_name)
            && !self.ignore.iter().any(|name| name == command_name)
    }
}

impl CommandEventHandler for EventCollector {
    fn handle_command_started_event(&self, event: CommandStartedEvent) {
        if self.observes(event.command_name.as_str()) {
            self.buffer.push(CommandEvent::Started(event));
        }
    }

    fn handle_command_succeeded_event(&self, event: CommandSucceededEvent) {
        if self.observes(event.command_name.as_str()) {
            self.buffer.push(CommandEvent::Succeeded(event));
        }
    }

    fn handle_command_failed_event(&self, event: CommandFailedEvent) {
        if self.observes(event.command_name.as_str()) {
            self.buffer.push(CommandEvent::Failed(event));
        }
    }
}

/// Extracts the `lsid` fields of the last two command-started events.
///
/// Used by the same/different-lsid assertions; the error arm carries a
/// human-readable reason rather than an error type because the callers
/// report it as a test diagnostic.
pub(crate) fn last_two_lsids(buffer: &CommandEventBuffer) -> Result<(Bson, Bson), String> {
    let started = buffer.started_events();
    if started.len() < 2 {
        return Err(format!(
            "expected at least two command started events, found {}",
            started.len()
        ));
    }
    let mut lsids = started
        .iter()
        .rev()
        .take(2)
        .map(|event| {
            event
                .command
                .get("lsid")
                .cloned()
                .ok_or_else(|| format!("command {:?} has no lsid", event.command_name))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let newest = lsids.remove(0);
    let previous = lsids.remove(0);
    Ok((previous, newest))
}
