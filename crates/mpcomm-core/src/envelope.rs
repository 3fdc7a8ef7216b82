//! The unit of conversation exchanged between senders and receivers.
//!
//! An `Envelope` is built by a producer, consumed exactly once, and then
//! dropped. The only field touched after construction is the diagnostic id,
//! which the receiving transport stamps on arrival. No validation happens on
//! construction; consumers interpret fields according to `message_type`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the remaining envelope fields should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Handshake probe sent before normal traffic. Never surfaced to consumers.
    Connect,
    Request,
    Reply,
    File,
    /// Stops the local sender worker; never leaves the process.
    CloseSender,
    /// Closes the receiving listener once dequeued.
    CloseReceiver,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Request => "request",
            MessageType::Reply => "reply",
            MessageType::File => "file",
            MessageType::CloseSender => "closeSender",
            MessageType::CloseReceiver => "closeReceiver",
        }
    }

    /// Types that steer the transport rather than carry application data.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageType::Connect | MessageType::CloseSender | MessageType::CloseReceiver
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque value stamped by the receiving transport, identifying the inbound
/// connection and its call sequence that delivered an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticId {
    pub connection: u64,
    pub sequence: u64,
}

impl fmt::Display for DiagnosticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}#{}", self.connection, self.sequence)
    }
}

/// One message between two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub error_msg: String,
    #[serde(skip)]
    pub diagnostic_id: Option<DiagnosticId>,
}

impl Envelope {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            to: String::new(),
            from: String::new(),
            author: String::new(),
            command: String::new(),
            arguments: Vec::new(),
            error_msg: String::new(),
            diagnostic_id: None,
        }
    }

    pub fn request(command: impl Into<String>) -> Self {
        Self::new(MessageType::Request).with_command(command)
    }

    /// Reply to `request`: addresses swapped, same command, no arguments.
    pub fn reply(request: &Envelope) -> Self {
        Self::new(MessageType::Reply)
            .with_to(request.from.clone())
            .with_from(request.to.clone())
            .with_author(request.author.clone())
            .with_command(request.command.clone())
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error(mut self, error_msg: impl Into<String>) -> Self {
        self.error_msg = error_msg.into();
        self
    }

    /// Stamp the diagnostic id. Called by the receiving transport only.
    pub(crate) fn stamp(&mut self, id: DiagnosticId) {
        self.diagnostic_id = Some(id);
    }
}

/// Field-wise equality ignoring the transport-stamped diagnostic id.
impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.message_type == other.message_type
            && self.to == other.to
            && self.from == other.from
            && self.author == other.author
            && self.command == other.command
            && self.arguments == other.arguments
            && self.error_msg == other.error_msg
    }
}

impl Eq for Envelope {}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Envelope:")?;
        writeln!(f, "  type:      {}", self.message_type)?;
        writeln!(f, "  to:        {}", self.to)?;
        writeln!(f, "  from:      {}", self.from)?;
        writeln!(f, "  author:    {}", self.author)?;
        writeln!(f, "  command:   {}", self.command)?;
        writeln!(f, "  arguments: [{}]", self.arguments.join(", "))?;
        if !self.error_msg.is_empty() {
            writeln!(f, "  errorMsg:  {}", self.error_msg)?;
        }
        match self.diagnostic_id {
            Some(id) => write!(f, "  diagnostic: {}", id),
            None => write!(f, "  diagnostic: -"),
        }
    }
}
