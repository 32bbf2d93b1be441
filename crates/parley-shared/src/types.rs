use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Server-assigned identifiers are opaque strings.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identity of a user account.
    UserId
);

string_id!(
    /// A chat thread: a group text channel or a direct-message channel.
    ChannelId
);

string_id!(
    /// A group (server/guild) owning several chat channels.
    GroupId
);

string_id!(
    /// A confirmed message, assigned by the server.
    MessageId
);

impl MessageId {
    /// Fresh random id, used by the server when it accepts a message.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Client-chosen correlation id linking an optimistic send to its
/// confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved channel address: one subscribable/publishable topic instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let id = MessageId::new("m1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m1\"");
        assert_eq!(serde_json::to_string(&Nonce(7)).unwrap(), "7");
    }

    #[test]
    fn test_generated_message_ids_differ() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
