use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Assistant personas, keyed by the `assistantId` clients send.
///
/// ```toml
/// [assistants.tutor]
/// name = "Maths tutor"
/// system_prompt = "You are a patient maths tutor."
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssistantsConfig(pub HashMap<String, AssistantConfig>);

impl AssistantsConfig {
    pub fn get(&self, id: &str) -> Option<&AssistantConfig> {
        self.0.get(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssistantConfig {
    /// Display name.
    pub name: String,

    /// System prompt prepended to the conversation.
    pub system_prompt: String,
}
