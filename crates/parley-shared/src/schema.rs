//! Channel namespaces, address resolution and payload validation.
//!
//! Every namespace is a zero-sized type implementing [`Namespace`]: it knows
//! how to turn its argument tuple into address parts and which closed event
//! enum its payloads decode into. [`SchemaRegistry`] erases those types so
//! that inbound traffic, which only carries an address string, can still be
//! decoded into a [`ChannelEvent`].

use std::borrow::Cow;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::constants::{ADDRESS_SEPARATOR, NS_CHAT, NS_GROUP, NS_USER};
use crate::error::SchemaError;
use crate::protocol::{
    check_id, ChatEvent, Envelope, GroupEvent, UserEvent,
};
use crate::types::{Address, ChannelId, GroupId, UserId};

/// A closed set of events sharing one namespace.
pub trait EventSchema: Serialize + DeserializeOwned + Sized {
    /// Wire names of every variant, in declaration order.
    const EVENTS: &'static [&'static str];

    /// Wire name of this event.
    fn name(&self) -> &'static str;

    /// Field-level checks serde cannot express.
    fn check(&self) -> Result<(), String>;
}

/// A family of channels sharing an event schema and an address rule.
pub trait Namespace {
    const NAME: &'static str;
    const ARITY: usize;

    type Args;
    type Event: EventSchema + Into<ChannelEvent>;

    /// Stringified arguments, in address order.
    fn address_parts(args: &Self::Args) -> Vec<String>;

    fn address(args: &Self::Args) -> Address {
        build_address(Self::NAME, Self::address_parts(args))
    }

    fn decode(event: &str, data: Value) -> Result<Self::Event, SchemaError> {
        decode::<Self::Event>(Self::NAME, event, data)
    }

    fn encode(event: &Self::Event) -> Result<Envelope, SchemaError> {
        encode(Self::NAME, event)
    }
}

/// Resolve the address of one channel instance.
pub fn resolve_address<N: Namespace>(args: &N::Args) -> Address {
    N::address(args)
}

// ---------------------------------------------------------------------------
// Address construction
// ---------------------------------------------------------------------------

/// Join the namespace name and escaped parts with [`ADDRESS_SEPARATOR`].
pub fn build_address<I, S>(namespace: &str, parts: I) -> Address
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut address = namespace.to_string();
    for part in parts {
        address.push(ADDRESS_SEPARATOR);
        address.push_str(&escape_part(part.as_ref()));
    }
    Address(address)
}

/// Split an address into its namespace name and unescaped arguments.
pub fn parse_address(address: &Address) -> Result<(&str, Vec<String>), SchemaError> {
    let mut segments = address.as_str().split(ADDRESS_SEPARATOR);
    let namespace = segments
        .next()
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| SchemaError::MalformedAddress(address.to_string()))?;

    let args = segments
        .map(|segment| unescape_part(segment, address))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((namespace, args))
}

fn escape_part(part: &str) -> Cow<'_, str> {
    if !part.contains(['%', ADDRESS_SEPARATOR]) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ADDRESS_SEPARATOR => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

fn unescape_part(part: &str, address: &Address) -> Result<String, SchemaError> {
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(ADDRESS_SEPARATOR),
            _ => return Err(SchemaError::MalformedAddress(address.to_string())),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Typed decode / encode
// ---------------------------------------------------------------------------

fn invalid(namespace: &str, event: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidPayload {
        namespace: namespace.to_string(),
        event: event.to_string(),
        reason: reason.into(),
    }
}

/// Decode and check a raw payload for `event`.
pub fn decode<E: EventSchema>(namespace: &str, event: &str, data: Value) -> Result<E, SchemaError> {
    if !E::EVENTS.contains(&event) {
        return Err(SchemaError::UnknownEvent {
            namespace: namespace.to_string(),
            event: event.to_string(),
        });
    }

    let tagged = serde_json::json!({ "name": event, "data": data });
    let decoded: E =
        serde_json::from_value(tagged).map_err(|e| invalid(namespace, event, e.to_string()))?;
    decoded
        .check()
        .map_err(|reason| invalid(namespace, event, reason))?;

    Ok(decoded)
}

/// Check a typed event and turn it into its wire envelope.
pub fn encode<E: EventSchema>(namespace: &str, event: &E) -> Result<Envelope, SchemaError> {
    event
        .check()
        .map_err(|reason| invalid(namespace, event.name(), reason))?;

    let value =
        serde_json::to_value(event).map_err(|e| invalid(namespace, event.name(), e.to_string()))?;
    serde_json::from_value(value).map_err(|e| SchemaError::MalformedEnvelope(e.to_string()))
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Private per-user channel: membership lifecycle of groups and DMs.
pub struct UserNamespace;

impl Namespace for UserNamespace {
    const NAME: &'static str = NS_USER;
    const ARITY: usize = 1;

    type Args = UserId;
    type Event = UserEvent;

    fn address_parts(args: &UserId) -> Vec<String> {
        vec![args.to_string()]
    }
}

/// Per-group channel: group metadata and its chat channels.
pub struct GroupNamespace;

impl Namespace for GroupNamespace {
    const NAME: &'static str = NS_GROUP;
    const ARITY: usize = 1;

    type Args = GroupId;
    type Event = GroupEvent;

    fn address_parts(args: &GroupId) -> Vec<String> {
        vec![args.to_string()]
    }
}

/// Per-thread channel: messages and typing.
pub struct ChatNamespace;

impl Namespace for ChatNamespace {
    const NAME: &'static str = NS_CHAT;
    const ARITY: usize = 1;

    type Args = ChannelId;
    type Event = ChatEvent;

    fn address_parts(args: &ChannelId) -> Vec<String> {
        vec![args.to_string()]
    }
}

impl EventSchema for UserEvent {
    const EVENTS: &'static [&'static str] = &[
        "group_created",
        "group_updated",
        "group_removed",
        "dm_created",
        "dm_updated",
        "dm_removed",
    ];

    fn name(&self) -> &'static str {
        match self {
            UserEvent::GroupCreated(_) => "group_created",
            UserEvent::GroupUpdated(_) => "group_updated",
            UserEvent::GroupRemoved(_) => "group_removed",
            UserEvent::DmCreated(_) => "dm_created",
            UserEvent::DmUpdated(_) => "dm_updated",
            UserEvent::DmRemoved(_) => "dm_removed",
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            UserEvent::GroupCreated(g) | UserEvent::GroupUpdated(g) => g.check(),
            UserEvent::GroupRemoved(r) => check_id("group id", r.group_id.as_str()),
            UserEvent::DmCreated(dm) | UserEvent::DmUpdated(dm) => dm.check(),
            UserEvent::DmRemoved(r) => check_id("channel id", r.channel_id.as_str()),
        }
    }
}

impl EventSchema for GroupEvent {
    const EVENTS: &'static [&'static str] = &[
        "group_updated",
        "group_deleted",
        "channel_created",
        "channel_updated",
        "channel_deleted",
    ];

    fn name(&self) -> &'static str {
        match self {
            GroupEvent::GroupUpdated(_) => "group_updated",
            GroupEvent::GroupDeleted(_) => "group_deleted",
            GroupEvent::ChannelCreated(_) => "channel_created",
            GroupEvent::ChannelUpdated(_) => "channel_updated",
            GroupEvent::ChannelDeleted(_) => "channel_deleted",
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            GroupEvent::GroupUpdated(g) => g.check(),
            GroupEvent::GroupDeleted(r) => check_id("group id", r.group_id.as_str()),
            GroupEvent::ChannelCreated(c) | GroupEvent::ChannelUpdated(c) => c.check(),
            GroupEvent::ChannelDeleted(r) => {
                check_id("group id", r.group_id.as_str())?;
                check_id("channel id", r.channel_id.as_str())
            }
        }
    }
}

impl EventSchema for ChatEvent {
    const EVENTS: &'static [&'static str] = &[
        "message_sent",
        "message_updated",
        "message_deleted",
        "typing",
    ];

    fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageSent(_) => "message_sent",
            ChatEvent::MessageUpdated(_) => "message_updated",
            ChatEvent::MessageDeleted(_) => "message_deleted",
            ChatEvent::Typing(_) => "typing",
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            ChatEvent::MessageSent(m) => m.check(),
            ChatEvent::MessageUpdated(u) => u.check(),
            ChatEvent::MessageDeleted(r) => {
                check_id("message id", r.id.as_str())?;
                check_id("channel id", r.channel_id.as_str())
            }
            ChatEvent::Typing(t) => {
                check_id("channel id", t.channel_id.as_str())?;
                t.user.check()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Type-erased registry
// ---------------------------------------------------------------------------

/// An event from any registered namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    User(UserEvent),
    Group(GroupEvent),
    Chat(ChatEvent),
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::User(e) => e.name(),
            ChannelEvent::Group(e) => e.name(),
            ChannelEvent::Chat(e) => e.name(),
        }
    }
}

impl From<UserEvent> for ChannelEvent {
    fn from(event: UserEvent) -> Self {
        ChannelEvent::User(event)
    }
}

impl From<GroupEvent> for ChannelEvent {
    fn from(event: GroupEvent) -> Self {
        ChannelEvent::Group(event)
    }
}

impl From<ChatEvent> for ChannelEvent {
    fn from(event: ChatEvent) -> Self {
        ChannelEvent::Chat(event)
    }
}

type DecodeFn = fn(&str, Value) -> Result<ChannelEvent, SchemaError>;

fn decode_erased<N: Namespace>(event: &str, data: Value) -> Result<ChannelEvent, SchemaError> {
    N::decode(event, data).map(Into::into)
}

/// Runtime view of one [`Namespace`].
#[derive(Debug, Clone, Copy)]
pub struct NamespaceDescriptor {
    pub name: &'static str,
    pub arity: usize,
    pub events: &'static [&'static str],
    decode: DecodeFn,
}

impl NamespaceDescriptor {
    pub fn of<N: Namespace>() -> Self {
        Self {
            name: N::NAME,
            arity: N::ARITY,
            events: <N::Event as EventSchema>::EVENTS,
            decode: decode_erased::<N>,
        }
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.contains(&event)
    }

    pub fn resolve<S: AsRef<str>>(&self, args: &[S]) -> Result<Address, SchemaError> {
        if args.len() != self.arity {
            return Err(SchemaError::Arity {
                namespace: self.name.to_string(),
                expected: self.arity,
                actual: args.len(),
            });
        }
        Ok(build_address(self.name, args))
    }

    pub fn validate(&self, event: &str, data: Value) -> Result<ChannelEvent, SchemaError> {
        (self.decode)(event, data)
    }
}

/// Namespace name -> descriptor. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    namespaces: HashMap<&'static str, NamespaceDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `user`, `group` and `chat` namespaces.
    pub fn standard() -> Self {
        let mut namespaces = HashMap::new();
        for descriptor in [
            NamespaceDescriptor::of::<UserNamespace>(),
            NamespaceDescriptor::of::<GroupNamespace>(),
            NamespaceDescriptor::of::<ChatNamespace>(),
        ] {
            namespaces.insert(descriptor.name, descriptor);
        }
        Self { namespaces }
    }

    pub fn define(&mut self, descriptor: NamespaceDescriptor) -> Result<(), SchemaError> {
        if descriptor.name.is_empty() || descriptor.name.contains(ADDRESS_SEPARATOR) {
            return Err(SchemaError::MalformedAddress(descriptor.name.to_string()));
        }
        if self.namespaces.contains_key(descriptor.name) {
            return Err(SchemaError::DuplicateNamespace(descriptor.name.to_string()));
        }
        self.namespaces.insert(descriptor.name, descriptor);
        Ok(())
    }

    pub fn get(&self, namespace: &str) -> Result<&NamespaceDescriptor, SchemaError> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| SchemaError::UnknownNamespace(namespace.to_string()))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.namespaces.keys().copied()
    }

    pub fn resolve<S: AsRef<str>>(&self, namespace: &str, args: &[S]) -> Result<Address, SchemaError> {
        self.get(namespace)?.resolve(args)
    }

    pub fn validate(
        &self,
        namespace: &str,
        event: &str,
        data: Value,
    ) -> Result<ChannelEvent, SchemaError> {
        self.get(namespace)?.validate(event, data)
    }

    /// Decode an envelope received on `address`.
    pub fn decode_inbound(
        &self,
        address: &Address,
        envelope: Envelope,
    ) -> Result<ChannelEvent, SchemaError> {
        let (namespace, args) = parse_address(address)?;
        let descriptor = self.get(namespace)?;
        if args.len() != descriptor.arity {
            return Err(SchemaError::Arity {
                namespace: namespace.to_string(),
                expected: descriptor.arity,
                actual: args.len(),
            });
        }
        descriptor.validate(&envelope.name, envelope.data)
    }
}
