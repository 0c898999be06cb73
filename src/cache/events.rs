//! Server-pushed events.
//!
//! Every inbound frame decodes into a [`ServerEvent`], one variant per topic.
//! Payload records carry only optional fields and decode leniently: a field of
//! the wrong shape reads as absent instead of failing the whole frame, and an
//! unreadable payload decodes to an empty record.

use std::fmt;

use mangasync_api_types::EventFrame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

/// Named event category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Ad,
    Series,
    Chapter,
    Settings,
    AdIntensity,
    User,
    Subscription,
    BattlePass,
    FlashSale,
    Coupon,
    Package,
    Role,
    Currency,
    System,
    /// A topic this client has no rule for; kept verbatim.
    Other(String),
}

impl Topic {
    /// Every topic the invalidation table knows about.
    pub const KNOWN: [Topic; 14] = [
        Topic::Ad,
        Topic::Series,
        Topic::Chapter,
        Topic::Settings,
        Topic::AdIntensity,
        Topic::User,
        Topic::Subscription,
        Topic::BattlePass,
        Topic::FlashSale,
        Topic::Coupon,
        Topic::Package,
        Topic::Role,
        Topic::Currency,
        Topic::System,
    ];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &str {
        match self {
            Topic::Ad => "ad",
            Topic::Series => "series",
            Topic::Chapter => "chapter",
            Topic::Settings => "settings",
            Topic::AdIntensity => "adIntensity",
            Topic::User => "user",
            Topic::Subscription => "subscription",
            Topic::BattlePass => "battlepass",
            Topic::FlashSale => "flashsale",
            Topic::Coupon => "coupon",
            Topic::Package => "package",
            Topic::Role => "role",
            Topic::Currency => "currency",
            Topic::System => "system",
            Topic::Other(name) => name,
        }
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Topic::KNOWN
            .iter()
            .find(|topic| topic.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Topic::Other(name.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `action` discriminator most payloads carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
    PermissionsUpdated,
    Other(String),
}

impl EventAction {
    pub fn is_deleted(&self) -> bool {
        matches!(self, EventAction::Deleted)
    }
}

impl From<String> for EventAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "created" => EventAction::Created,
            "updated" => EventAction::Updated,
            "deleted" => EventAction::Deleted,
            "permissions_updated" => EventAction::PermissionsUpdated,
            _ => EventAction::Other(value),
        }
    }
}

impl From<&str> for EventAction {
    fn from(value: &str) -> Self {
        EventAction::from(value.to_string())
    }
}

// ============================================================================
// Payload records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub ad_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
    #[serde(default, deserialize_with = "lenient")]
    pub data: Option<AdDetails>,
}

impl AdPayload {
    pub fn placement(&self) -> Option<&str> {
        self.data.as_ref()?.placement.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdDetails {
    #[serde(default, deserialize_with = "lenient_id")]
    pub placement: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub series_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub series_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub chapter_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdIntensityPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub level: Option<u8>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub package_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlePassPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub season_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub role_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

/// Payload of topics whose rules never look at entity ids
/// (flash sales, coupons, packages, currency).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenericPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub action: Option<EventAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemPayload {
    #[serde(default, rename = "type", deserialize_with = "lenient_id")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub message: Option<String>,
    /// The payload as received, forwarded to notification listeners.
    #[serde(skip)]
    pub raw: Value,
}

impl SystemPayload {
    pub fn is_maintenance(&self) -> bool {
        self.kind.as_deref() == Some("maintenance")
    }
}

// ============================================================================
// Events
// ============================================================================

/// A decoded server push, tagged by topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Ad(AdPayload),
    Series(SeriesPayload),
    Chapter(ChapterPayload),
    Settings(SettingsPayload),
    AdIntensity(AdIntensityPayload),
    User(UserPayload),
    Subscription(SubscriptionPayload),
    BattlePass(BattlePassPayload),
    FlashSale(GenericPayload),
    Coupon(GenericPayload),
    Package(GenericPayload),
    Role(RolePayload),
    Currency(GenericPayload),
    System(SystemPayload),
    Unknown { topic: String, payload: Value },
}

impl ServerEvent {
    /// Decode a topic name and its payload. Never fails.
    pub fn from_parts(topic: &str, payload: Value) -> Self {
        match Topic::from(topic) {
            Topic::Ad => ServerEvent::Ad(decode(topic, payload)),
            Topic::Series => ServerEvent::Series(decode(topic, payload)),
            Topic::Chapter => ServerEvent::Chapter(decode(topic, payload)),
            Topic::Settings => ServerEvent::Settings(decode(topic, payload)),
            Topic::AdIntensity => ServerEvent::AdIntensity(decode(topic, payload)),
            Topic::User => ServerEvent::User(decode(topic, payload)),
            Topic::Subscription => ServerEvent::Subscription(decode(topic, payload)),
            Topic::BattlePass => ServerEvent::BattlePass(decode(topic, payload)),
            Topic::FlashSale => ServerEvent::FlashSale(decode(topic, payload)),
            Topic::Coupon => ServerEvent::Coupon(decode(topic, payload)),
            Topic::Package => ServerEvent::Package(decode(topic, payload)),
            Topic::Role => ServerEvent::Role(decode(topic, payload)),
            Topic::Currency => ServerEvent::Currency(decode(topic, payload)),
            Topic::System => {
                let mut system: SystemPayload = decode(topic, payload.clone());
                system.raw = payload;
                ServerEvent::System(system)
            }
            Topic::Other(name) => ServerEvent::Unknown {
                topic: name,
                payload,
            },
        }
    }

    pub fn from_frame(frame: EventFrame) -> Self {
        Self::from_parts(&frame.topic, frame.payload)
    }

    /// Parse a text frame. Fails only when the text is not an event frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<EventFrame>(text).map(Self::from_frame)
    }

    pub fn topic(&self) -> Topic {
        match self {
            ServerEvent::Ad(_) => Topic::Ad,
            ServerEvent::Series(_) => Topic::Series,
            ServerEvent::Chapter(_) => Topic::Chapter,
            ServerEvent::Settings(_) => Topic::Settings,
            ServerEvent::AdIntensity(_) => Topic::AdIntensity,
            ServerEvent::User(_) => Topic::User,
            ServerEvent::Subscription(_) => Topic::Subscription,
            ServerEvent::BattlePass(_) => Topic::BattlePass,
            ServerEvent::FlashSale(_) => Topic::FlashSale,
            ServerEvent::Coupon(_) => Topic::Coupon,
            ServerEvent::Package(_) => Topic::Package,
            ServerEvent::Role(_) => Topic::Role,
            ServerEvent::Currency(_) => Topic::Currency,
            ServerEvent::System(_) => Topic::System,
            ServerEvent::Unknown { topic, .. } => Topic::Other(topic.clone()),
        }
    }

    pub fn action(&self) -> Option<&EventAction> {
        match self {
            ServerEvent::Ad(p) => p.action.as_ref(),
            ServerEvent::Series(p) => p.action.as_ref(),
            ServerEvent::Chapter(p) => p.action.as_ref(),
            ServerEvent::Settings(p) => p.action.as_ref(),
            ServerEvent::AdIntensity(p) => p.action.as_ref(),
            ServerEvent::User(p) => p.action.as_ref(),
            ServerEvent::Subscription(p) => p.action.as_ref(),
            ServerEvent::BattlePass(p) => p.action.as_ref(),
            ServerEvent::FlashSale(p)
            | ServerEvent::Coupon(p)
            | ServerEvent::Package(p)
            | ServerEvent::Currency(p) => p.action.as_ref(),
            ServerEvent::Role(p) => p.action.as_ref(),
            ServerEvent::System(_) | ServerEvent::Unknown { .. } => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.action().is_some_and(EventAction::is_deleted)
    }
}

/// A server event stamped on receipt.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    /// Local identifier, used for deduplication within one batch.
    pub id: Uuid,
    pub received_at: OffsetDateTime,
    pub event: ServerEvent,
}

impl ReceivedEvent {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: OffsetDateTime::now_utc(),
            event,
        }
    }
}

fn decode<T: DeserializeOwned + Default>(topic: &str, payload: Value) -> T {
    if payload.is_null() {
        return T::default();
    }
    match serde_json::from_value(payload) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(topic, error = %err, "Unreadable event payload; treating as empty");
            T::default()
        }
    }
}

/// Any value that does not decode as `T` reads as `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Identifiers arrive as strings or numbers. Empty strings read as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) if !text.is_empty() => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}
