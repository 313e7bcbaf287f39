use derive_more::{Display, From, Into};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Backend user identifier.
///
/// The backend may encode `id` as a JSON string or number; both are
/// normalized to their string form, which is also what gets persisted
/// under the `user_id` key and used in the channel topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

/// Backend-issued session token.
///
/// Opaque to this crate: it is stored, sent as a bearer token, and used as
/// the channel join payload, but never decoded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct Jwt(String);

impl Jwt {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep tokens out of logs.
impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Jwt(..)")
    }
}

/// The authenticated account as the backend represents it.
///
/// Only `id` is interpreted; every other attribute is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Look up a backend-defined attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Interpret a JSON value as a user snapshot, if it is one.
    #[must_use]
    pub fn from_snapshot(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A complete authenticated session.
///
/// Both halves are always present; a half-written session cannot be
/// represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub jwt: Jwt,
    pub user_id: UserId,
}

impl Session {
    #[must_use]
    pub fn new(jwt: Jwt, user_id: UserId) -> Self {
        Self { jwt, user_id }
    }

    /// Channel topic scoped to this session's user.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("user:{}", self.user_id)
    }
}
