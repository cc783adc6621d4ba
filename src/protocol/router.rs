//! Command routing
//!
//! A [`CommandRouter`] turns one request line into one response line and never
//! fails; domain errors are encoded as `ERROR|<reason>` responses. The engine
//! is generic over the router so each service plugs in its own command set.

use std::collections::HashMap;
use std::fmt;

use super::request::{Request, Response};

/// Reply for a command the router does not know
pub const UNKNOWN_COMMAND_REPLY: &str = "ERROR|Unknown command";

/// Reply for a request whose command field is blank
pub const EMPTY_COMMAND_REPLY: &str = "ERROR|Command cannot be empty";

/// Maps a request line to a response line
pub trait CommandRouter: Send + Sync + 'static {
    fn dispatch(&self, request: &str) -> String;
}

impl<F> CommandRouter for F
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn dispatch(&self, request: &str) -> String {
        self(request)
    }
}

type Handler = Box<dyn Fn(&Request<'_>) -> Response + Send + Sync>;

/// Router built from per-command handlers.
///
/// `PING` is registered by [`CommandTable::new`] and answers `PONG`.
pub struct CommandTable {
    handlers: HashMap<String, Handler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::empty().route("PING", |_| Response::pong())
    }

    /// A table without the built-in `PING`
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `command` (case-insensitive), replacing any previous one
    pub fn route<F>(mut self, command: &str, handler: F) -> Self
    where
        F: Fn(&Request<'_>) -> Response + Send + Sync + 'static,
    {
        self.handlers
            .insert(command.trim().to_uppercase(), Box::new(handler));
        self
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(&command.trim().to_uppercase())
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Handle a parsed request
    pub fn handle(&self, request: &Request<'_>) -> Response {
        if request.command().is_empty() {
            return Response::error("Command cannot be empty");
        }
        match self.handlers.get(request.command()) {
            Some(handler) => handler(request),
            None => Response::error("Unknown command"),
        }
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands())
            .finish()
    }
}

impl CommandRouter for CommandTable {
    fn dispatch(&self, request: &str) -> String {
        self.handle(&Request::parse(request)).to_string()
    }
}
