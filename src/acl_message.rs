// acl_message.rs
// Core FIPA ACL message structures

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::aid::Aid;

/// FIPA performative types
///
/// The standard speech acts plus `Custom` for deployment-specific
/// extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performative {
    AcceptProposal,
    Agree,
    Cancel,
    CallForProposal,
    Confirm,
    Disconfirm,
    Failure,
    Inform,
    InformIf,
    InformRef,
    NotUnderstood,
    Propagate,
    Propose,
    Proxy,
    QueryIf,
    QueryRef,
    Refuse,
    RejectProposal,
    Request,
    RequestWhen,
    RequestWhenever,
    Subscribe,
    Custom(String),
}

static STANDARD_PERFORMATIVES: [Performative; 22] = [
    Performative::AcceptProposal,
    Performative::Agree,
    Performative::Cancel,
    Performative::CallForProposal,
    Performative::Confirm,
    Performative::Disconfirm,
    Performative::Failure,
    Performative::Inform,
    Performative::InformIf,
    Performative::InformRef,
    Performative::NotUnderstood,
    Performative::Propagate,
    Performative::Propose,
    Performative::Proxy,
    Performative::QueryIf,
    Performative::QueryRef,
    Performative::Refuse,
    Performative::RejectProposal,
    Performative::Request,
    Performative::RequestWhen,
    Performative::RequestWhenever,
    Performative::Subscribe,
];

impl Performative {
    /// The standard FIPA vocabulary
    pub fn all() -> &'static [Performative] {
        &STANDARD_PERFORMATIVES
    }

    /// FIPA wire name (e.g. `accept-proposal`)
    pub fn fipa_name(&self) -> String {
        match self {
            Performative::AcceptProposal => "accept-proposal".into(),
            Performative::Agree => "agree".into(),
            Performative::Cancel => "cancel".into(),
            Performative::CallForProposal => "cfp".into(),
            Performative::Confirm => "confirm".into(),
            Performative::Disconfirm => "disconfirm".into(),
            Performative::Failure => "failure".into(),
            Performative::Inform => "inform".into(),
            Performative::InformIf => "inform-if".into(),
            Performative::InformRef => "inform-ref".into(),
            Performative::NotUnderstood => "not-understood".into(),
            Performative::Propagate => "propagate".into(),
            Performative::Propose => "propose".into(),
            Performative::Proxy => "proxy".into(),
            Performative::QueryIf => "query-if".into(),
            Performative::QueryRef => "query-ref".into(),
            Performative::Refuse => "refuse".into(),
            Performative::RejectProposal => "reject-proposal".into(),
            Performative::Request => "request".into(),
            Performative::RequestWhen => "request-when".into(),
            Performative::RequestWhenever => "request-whenever".into(),
            Performative::Subscribe => "subscribe".into(),
            Performative::Custom(name) => name.to_lowercase().replace('_', "-"),
        }
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fipa_name().to_uppercase().replace('-', "_"))
    }
}

/// Error parsing a performative name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid performative: {0:?}")]
pub struct ParsePerformativeError(pub String);

impl FromStr for Performative {
    type Err = ParsePerformativeError;

    /// Accepts `accept-proposal`, `ACCEPT_PROPOSAL` and mixed case.
    /// Unrecognised names become `Custom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(ParsePerformativeError(s.to_string()));
        }

        let known = STANDARD_PERFORMATIVES
            .iter()
            .find(|p| p.fipa_name() == normalized)
            .cloned();

        Ok(known.unwrap_or(Performative::Custom(normalized)))
    }
}

/// Message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// Plain text payload
    Text(String),
    /// Structured payload, kept as JSON text so it survives any wire codec
    Json(String),
}

impl MessageContent {
    /// Encode a structured value as content
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(MessageContent::Json(serde_json::to_string(value)?))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Json(_) => None,
        }
    }

    /// Decode structured content
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            MessageContent::Json(raw) | MessageContent::Text(raw) => serde_json::from_str(raw),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// Complete ACL message
///
/// Built with the `with_*` methods and read through accessors; once handed
/// to the router each receiver gets its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclMessage {
    message_id: String,
    performative: Performative,
    sender: Option<Aid>,
    receivers: Vec<Aid>,
    reply_to: Vec<Aid>,
    content: Option<MessageContent>,
    language: Option<String>,
    encoding: Option<String>,
    ontology: Option<String>,
    protocol: Option<String>,
    conversation_id: Option<String>,
    reply_with: Option<String>,
    in_reply_to: Option<String>,
    /// Deadline in milliseconds since the Unix epoch
    reply_by: Option<i64>,
    user_args: BTreeMap<String, String>,
}

impl AclMessage {
    pub fn new(performative: Performative) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            performative,
            sender: None,
            receivers: Vec::new(),
            reply_to: Vec::new(),
            content: None,
            language: None,
            encoding: None,
            ontology: None,
            protocol: None,
            conversation_id: None,
            reply_with: None,
            in_reply_to: None,
            reply_by: None,
            user_args: BTreeMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: Aid) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_receiver(mut self, receiver: Aid) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn with_receivers(mut self, receivers: impl IntoIterator<Item = Aid>) -> Self {
        self.receivers.extend(receivers);
        self
    }

    /// Address replies somewhere other than the sender
    pub fn with_reply_to(mut self, aid: Aid) -> Self {
        self.reply_to.push(aid);
        self
    }

    pub fn with_content(mut self, content: impl Into<MessageContent>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_reply_with(mut self, reply_with: impl Into<String>) -> Self {
        self.reply_with = Some(reply_with.into());
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: impl Into<String>) -> Self {
        self.in_reply_to = Some(in_reply_to.into());
        self
    }

    pub fn with_reply_by(mut self, deadline: chrono::DateTime<chrono::Utc>) -> Self {
        self.reply_by = Some(deadline.timestamp_millis());
        self
    }

    pub fn with_user_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_args.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn performative(&self) -> &Performative {
        &self.performative
    }

    pub fn sender(&self) -> Option<&Aid> {
        self.sender.as_ref()
    }

    pub fn receivers(&self) -> &[Aid] {
        &self.receivers
    }

    pub fn reply_to(&self) -> &[Aid] {
        &self.reply_to
    }

    pub fn content(&self) -> Option<&MessageContent> {
        self.content.as_ref()
    }

    /// Text content, if the message carries plain text
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::as_text)
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn ontology(&self) -> Option<&str> {
        self.ontology.as_deref()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn reply_with(&self) -> Option<&str> {
        self.reply_with.as_deref()
    }

    pub fn in_reply_to(&self) -> Option<&str> {
        self.in_reply_to.as_deref()
    }

    pub fn reply_by(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.reply_by
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
    }

    /// Whether the reply-by deadline has passed
    pub fn is_expired(&self) -> bool {
        self.reply_by()
            .map(|deadline| deadline < chrono::Utc::now())
            .unwrap_or(false)
    }

    pub fn user_args(&self) -> &BTreeMap<String, String> {
        &self.user_args
    }

    pub fn user_arg(&self, key: &str) -> Option<&str> {
        self.user_args.get(key).map(String::as_str)
    }

    /// Build a reply.
    ///
    /// The first receiver becomes the sender, the reply goes to `reply_to`
    /// when set and to the original sender otherwise, and `in_reply_to`
    /// carries the original `reply_with`. Conversation, protocol, language,
    /// encoding and ontology are copied.
    pub fn make_reply(&self, performative: Performative) -> AclMessage {
        let receivers = if self.reply_to.is_empty() {
            self.sender.iter().cloned().collect()
        } else {
            self.reply_to.clone()
        };

        AclMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            performative,
            sender: self.receivers.first().cloned(),
            receivers,
            reply_to: Vec::new(),
            content: None,
            language: self.language.clone(),
            encoding: self.encoding.clone(),
            ontology: self.ontology.clone(),
            protocol: self.protocol.clone(),
            conversation_id: self.conversation_id.clone(),
            reply_with: None,
            in_reply_to: self.reply_with.clone(),
            reply_by: None,
            user_args: BTreeMap::new(),
        }
    }
}
