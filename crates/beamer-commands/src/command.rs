//! Command data structures.
//!
//! Defines the protocol commands understood by the projector and the
//! immutable table that maps operator-facing names onto them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Query commands, each answered by an acknowledgement and one payload line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// `Lamp 0` / `Lamp 1`
    LampStatus,
    /// Decimal number of lamp hours
    LampHours,
    /// `Src <n>`
    SourceType,
    /// `Model <name>`
    ModelName,
    /// `Name <company>`
    CompanyName,
}

impl QueryType {
    /// All query types, in table order.
    pub const ALL: [QueryType; 5] = [
        QueryType::ModelName,
        QueryType::CompanyName,
        QueryType::LampStatus,
        QueryType::LampHours,
        QueryType::SourceType,
    ];

    /// Protocol opcode sent for this query.
    pub fn opcode(&self) -> &'static str {
        match self {
            QueryType::LampStatus => "* 0 Lamp ?",
            QueryType::LampHours => "* 0 Lamp",
            QueryType::SourceType => "* 0 Src ?",
            QueryType::ModelName => "* 0 IR 035",
            QueryType::CompanyName => "* 0 IR 037",
        }
    }

    /// Operator-facing name of the query.
    pub fn name(&self) -> &'static str {
        match self {
            QueryType::LampStatus => "lamp status",
            QueryType::LampHours => "lamp hours",
            QueryType::SourceType => "source type",
            QueryType::ModelName => "model name",
            QueryType::CompanyName => "company name",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a command only gets acknowledged or also yields a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Fire-and-forget, acknowledged only
    Action,
    /// Acknowledged, then followed by exactly one payload line
    Query(QueryType),
}

/// A single protocol command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// Opcode string written to the wire (without delimiter)
    pub opcode: String,
    /// Command kind, fixed at construction
    pub kind: CommandKind,
}

impl Command {
    /// Create an action command.
    pub fn action(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            kind: CommandKind::Action,
        }
    }

    /// Create a query command.
    pub fn query(query: QueryType) -> Self {
        Self {
            opcode: query.opcode().to_string(),
            kind: CommandKind::Query(query),
        }
    }

    /// The query type, if this is a query command.
    pub fn query_type(&self) -> Option<QueryType> {
        match self.kind {
            CommandKind::Query(query) => Some(query),
            CommandKind::Action => None,
        }
    }

    /// Check whether this is a query command.
    pub fn is_query(&self) -> bool {
        matches!(self.kind, CommandKind::Query(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)
    }
}

/// IR action codes of the Acer H6510BD.
const ACER_ACTIONS: &[(&str, &str)] = &[
    ("power on", "* 0 IR 001"),
    ("power off", "* 0 IR 002"),
    ("keystone", "* 0 IR 004"),
    ("mute", "* 0 IR 006"),
    ("freeze", "* 0 IR 007"),
    ("menu", "* 0 IR 008"),
    ("up", "* 0 IR 009"),
    ("down", "* 0 IR 010"),
    ("right", "* 0 IR 011"),
    ("left", "* 0 IR 012"),
    ("resync", "* 0 IR 014"),
    ("source analog rgb", "* 0 IR 015"),
    ("source pbpr", "* 0 IR 017"),
    ("source svideo", "* 0 IR 018"),
    ("source composite", "* 0 IR 019"),
    ("source component", "* 0 IR 020"),
    ("aspect 16:9", "* 0 IR 021"),
    ("aspect 4:3", "* 0 IR 022"),
    ("volume+", "* 0 IR 023"),
    ("volume-", "* 0 IR 024"),
    ("brightness", "* 0 IR 025"),
    ("contrast", "* 0 IR 026"),
    ("color temperature", "* 0 IR 027"),
    ("hide", "* 0 IR 030"),
    ("source", "* 0 IR 031"),
    ("color saturation", "* 0 IR 032"),
    ("hue", "* 0 IR 033"),
    ("sharpness", "* 0 IR 034"),
    ("keystone up", "* 0 IR 042"),
    ("keystone down", "* 0 IR 043"),
    ("zoom", "* 0 IR 046"),
    ("e", "* 0 IR 047"),
    ("color rgb", "* 0 IR 048"),
    ("language", "* 0 IR 049"),
    ("source hdmi", "* 0 IR 050"),
];

/// Operator command allow-list.
///
/// Owned by whoever translates external command names; never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct CommandTable {
    /// Name to command mapping
    commands: HashMap<String, Command>,
    /// Opcodes that switch the lamp on or off
    power_opcodes: HashSet<String>,
}

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            power_opcodes: HashSet::new(),
        }
    }

    /// The built-in table for the Acer H6510BD, including the query commands.
    pub fn acer_h6510bd() -> Self {
        let mut table = Self::new();
        for (name, opcode) in ACER_ACTIONS {
            table = table.with_action(*name, *opcode);
        }
        for query in QueryType::ALL {
            table = table.with_query(query);
        }
        table
            .with_power_command("power on")
            .with_power_command("power off")
    }

    /// Add an action command.
    pub fn with_action(mut self, name: impl Into<String>, opcode: impl Into<String>) -> Self {
        self.commands.insert(name.into(), Command::action(opcode));
        self
    }

    /// Add a query command under its operator-facing name.
    pub fn with_query(mut self, query: QueryType) -> Self {
        self.commands
            .insert(query.name().to_string(), Command::query(query));
        self
    }

    /// Mark an already registered command as a power command.
    ///
    /// Unknown names are ignored.
    pub fn with_power_command(mut self, name: &str) -> Self {
        if let Some(command) = self.commands.get(name) {
            self.power_opcodes.insert(command.opcode.clone());
        }
        self
    }

    /// Look up a command by its operator-facing name.
    pub fn resolve(&self, name: &str) -> Option<Command> {
        self.commands.get(name).cloned()
    }

    /// Check whether a command switches the lamp.
    pub fn is_power(&self, command: &Command) -> bool {
        command.kind == CommandKind::Action && self.power_opcodes.contains(&command.opcode)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate over the registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::acer_h6510bd()
    }
}
