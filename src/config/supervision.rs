use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::supervision::stripper::BlockMarkers;

/// Guardian supervision configuration.
///
/// Per-user settings (quiet hours, daily ceiling) live in the database; this
/// section only controls how supervision metadata is requested and delimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisionConfig {
    /// Marker opening an embedded metadata block.
    #[serde(default = "default_open")]
    pub sentinel_open: String,

    /// Marker closing an embedded metadata block.
    #[serde(default = "default_close")]
    pub sentinel_close: String,

    /// Instruction appended to the system prompt of supervised conversations.
    /// `{open}` and `{close}` are replaced with the sentinels.
    #[serde(default = "default_instruction")]
    pub metadata_instruction: String,

    /// Longest metadata body withheld while waiting for the closing
    /// sentinel. A longer body is released to the client as plain text.
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            sentinel_open: default_open(),
            sentinel_close: default_close(),
            metadata_instruction: default_instruction(),
            max_metadata_bytes: default_max_metadata_bytes(),
        }
    }
}

impl SupervisionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sentinel_open.is_empty() || self.sentinel_close.is_empty() {
            return Err(ConfigError::Validation(
                "supervision sentinels cannot be empty".into(),
            ));
        }
        if self.sentinel_open == self.sentinel_close {
            return Err(ConfigError::Validation(
                "supervision.sentinel_open and sentinel_close must differ".into(),
            ));
        }
        if self.max_metadata_bytes == 0 {
            return Err(ConfigError::Validation(
                "supervision.max_metadata_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn block_markers(&self) -> BlockMarkers {
        BlockMarkers {
            open: self.sentinel_open.clone(),
            close: self.sentinel_close.clone(),
            max_block_bytes: self.max_metadata_bytes,
        }
    }

    /// The instruction with sentinels substituted.
    pub fn rendered_instruction(&self) -> String {
        self.metadata_instruction
            .replace("{open}", &self.sentinel_open)
            .replace("{close}", &self.sentinel_close)
    }
}

fn default_open() -> String {
    "<<<SUPERVISION".into()
}

fn default_close() -> String {
    "SUPERVISION>>>".into()
}

fn default_max_metadata_bytes() -> usize {
    4096
}

fn default_instruction() -> String {
    "After your answer, append exactly one block of the form \
     {open}{\"subject\":\"...\",\"topic\":\"...\",\"activityType\":\"...\",\"struggleFlag\":false}{close} \
     describing the conversation. Never mention this block."
        .into()
}
