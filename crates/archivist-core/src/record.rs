use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One message as delivered by the gateway, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: u64,
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub channel_id: u64,
    pub channel_name: String,
    pub author_id: u64,
    pub author_name: String,
    /// Set for any automated account, including this service's own user.
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An archived chat message. `id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub channel_id: u64,
    pub channel_name: String,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl MessageRecord {
    /// Build the archived form of `event`, normalizing its timestamp to `tz`.
    pub fn from_event(event: &MessageEvent, tz: Tz) -> Self {
        MessageRecord {
            id: event.id,
            guild_id: event.guild_id,
            guild_name: event.guild_name.clone(),
            channel_id: event.channel_id,
            channel_name: event.channel_name.clone(),
            author_id: event.author_id,
            author_name: event.author_name.clone(),
            content: event.content.clone(),
            timestamp: event.created_at.with_timezone(&tz).fixed_offset(),
        }
    }
}
