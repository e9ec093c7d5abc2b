use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Guardian settings for one supervised user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionSettings {
    pub user_id: Uuid,
    pub enabled: bool,
    /// Quiet hours as local minutes of the day. The window wraps midnight
    /// when start > end; start == end means no quiet hours.
    pub quiet_start_minute: Option<u16>,
    pub quiet_end_minute: Option<u16>,
    /// Offset of the user's local time from UTC
    pub utc_offset_minutes: i32,
    /// Absolute spend ceiling per local day
    pub daily_ceiling_microcents: Option<i64>,
}

impl SupervisionSettings {
    pub fn disabled(user_id: Uuid) -> Self {
        Self {
            user_id,
            enabled: false,
            quiet_start_minute: None,
            quiet_end_minute: None,
            utc_offset_minutes: 0,
            daily_ceiling_microcents: None,
        }
    }
}

/// Annotation a model embeds in guardian-mode output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionMetadata {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub struggle_flag: bool,
}
