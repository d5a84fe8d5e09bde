//! Castle API request and response types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Events
// =============================================================================

/// Kind of event being reported. See <https://docs.castle.io/docs/events>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "$login")]
    Login,
    #[serde(rename = "$registration")]
    Registration,
    #[serde(rename = "$profile_update")]
    ProfileUpdate,
    #[serde(rename = "$profile_reset")]
    ProfileReset,
    #[serde(rename = "$password_reset_request")]
    PasswordResetRequest,
    #[serde(rename = "$challenge")]
    Challenge,
    #[serde(rename = "$logout")]
    Logout,
    /// Custom event; give it a name with [`Event::named`].
    #[serde(rename = "$custom")]
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "$login",
            EventType::Registration => "$registration",
            EventType::ProfileUpdate => "$profile_update",
            EventType::ProfileReset => "$profile_reset",
            EventType::PasswordResetRequest => "$password_reset_request",
            EventType::Challenge => "$challenge",
            EventType::Logout => "$logout",
            EventType::Custom => "$custom",
        }
    }
}

/// Outcome of the event being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "$attempted")]
    Attempted,
    #[serde(rename = "$succeeded")]
    Succeeded,
    #[serde(rename = "$failed")]
    Failed,
    #[serde(rename = "$requested")]
    Requested,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Attempted => "$attempted",
            EventStatus::Succeeded => "$succeeded",
            EventStatus::Failed => "$failed",
            EventStatus::Requested => "$requested",
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub event_status: EventStatus,
    /// Name for `$custom` events
    pub name: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, event_status: EventStatus) -> Self {
        Self {
            event_type,
            event_status,
            name: None,
        }
    }

    /// Set the event name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// =============================================================================
// Subjects
// =============================================================================

/// Unset and empty values are both left off the wire.
fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

/// Who it happened to.
///
/// `id` is required by the Risk endpoint; it is not checked locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,

    #[serde(skip_serializing_if = "is_blank")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub registered_at: Option<String>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub traits: HashMap<String, String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn registered_at(mut self, registered_at: impl Into<String>) -> Self {
        self.registered_at = Some(registered_at.into());
        self
    }

    /// Add a user trait.
    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }
}

/// Identity-light subject sent to the Filter endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    #[serde(skip_serializing_if = "is_blank")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub phone: Option<String>,

    #[serde(skip_serializing_if = "is_blank")]
    pub username: Option<String>,
}

impl From<&User> for Params {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            phone: None,
            username: user.name.clone(),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Provenance of the originating HTTP call.
///
/// `headers` never holds `cookie` or `authorization`; see
/// [`filter_headers`](crate::context::filter_headers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub ip: String,
    pub headers: HashMap<String, String>,
    pub request_token: String,
}

impl Context {
    /// The caller's user agent, if one was forwarded.
    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.as_str())
    }
}

// =============================================================================
// Request
// =============================================================================

/// Everything [`CastleClient::filter`](crate::CastleClient::filter) and
/// [`CastleClient::risk`](crate::CastleClient::risk) need to describe one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Required; a request without one fails validation.
    pub context: Option<Context>,
    pub event: Event,
    pub user: User,
    pub properties: HashMap<String, String>,
    /// Defaults to the time of the call.
    pub created_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(event: Event, user: User) -> Self {
        Self {
            context: None,
            event,
            user,
            properties: HashMap::new(),
            created_at: None,
        }
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

// =============================================================================
// Wire payload
// =============================================================================

/// Subject of an outgoing payload: Filter sends `params`, Risk sends `user`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Subject<'a> {
    Params(Params),
    User(&'a User),
}

/// JSON body shared by the Filter and Risk endpoints.
#[derive(Debug, Serialize)]
pub(crate) struct EventPayload<'a> {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,

    pub status: EventStatus,

    pub request_token: &'a str,

    #[serde(flatten)]
    pub subject: Subject<'a>,

    pub context: &'a Context,

    #[serde(skip_serializing_if = "is_empty_map")]
    pub properties: &'a HashMap<String, String>,

    pub created_at: DateTime<Utc>,
}

fn is_empty_map(map: &&HashMap<String, String>) -> bool {
    map.is_empty()
}

impl<'a> EventPayload<'a> {
    fn envelope(
        request: &'a Request,
        context: &'a Context,
        subject: Subject<'a>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: request.event.event_type,
            name: request.event.name.as_deref().filter(|name| !name.is_empty()),
            status: request.event.event_status,
            request_token: &context.request_token,
            subject,
            context,
            properties: &request.properties,
            created_at: request.created_at.unwrap_or(now),
        }
    }

    /// Payload for the Filter endpoint.
    pub(crate) fn filter(request: &'a Request, context: &'a Context, now: DateTime<Utc>) -> Self {
        Self::envelope(request, context, Subject::Params(Params::from(&request.user)), now)
    }

    /// Payload for the Risk endpoint.
    pub(crate) fn risk(request: &'a Request, context: &'a Context, now: DateTime<Utc>) -> Self {
        Self::envelope(request, context, Subject::User(&request.user), now)
    }
}

// =============================================================================
// Response
// =============================================================================

/// Action recommended by the matched Castle policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecommendedAction {
    /// No recommendation: unknown action, or the call failed.
    #[default]
    None,
    Allow,
    Challenge,
    Deny,
}

impl RecommendedAction {
    /// Exact match on the policy action string; anything else is `None`.
    pub fn from_policy_action(action: &str) -> Self {
        match action {
            "allow" => RecommendedAction::Allow,
            "deny" => RecommendedAction::Deny,
            "challenge" => RecommendedAction::Challenge,
            _ => RecommendedAction::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::None => "",
            RecommendedAction::Allow => "allow",
            RecommendedAction::Challenge => "challenge",
            RecommendedAction::Deny => "deny",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedAction::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Policy that matched the event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub name: Option<String>,
    pub id: Option<String>,
    pub revision_id: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Device {
    pub token: Option<String>,
}

/// Body of a Filter or Risk response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyResponse {
    /// Error type, set when the API reports a logical error
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: Option<String>,
    pub risk: Option<f64>,
    pub policy: Option<Policy>,
    pub device: Option<Device>,
}

impl PolicyResponse {
    pub fn action(&self) -> RecommendedAction {
        let action = self
            .policy
            .as_ref()
            .and_then(|p| p.action.as_deref())
            .unwrap_or_default();
        RecommendedAction::from_policy_action(action)
    }

    /// `(type, message)` when the body signals an error.
    pub(crate) fn remote_error(&self) -> Option<(String, String)> {
        let kind = self.error_type.as_deref().unwrap_or_default();
        let message = self.message.as_deref().unwrap_or_default();
        if kind.is_empty() && message.is_empty() {
            return None;
        }
        Some((kind.to_string(), message.to_string()))
    }
}
