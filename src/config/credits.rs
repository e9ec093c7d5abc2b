use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Parameters for the pre-stream spend estimate.
///
/// The estimate only gates the request; settlement always uses exact token
/// counts reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreditsConfig {
    /// Characters per input token used by the length heuristic.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u32,

    /// Tokens added to the input estimate for each attachment.
    #[serde(default = "default_attachment_surcharge")]
    pub attachment_token_surcharge: u32,

    /// Output tokens assumed for every request.
    #[serde(default = "default_estimated_output_tokens")]
    pub estimated_output_tokens: u32,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
            attachment_token_surcharge: default_attachment_surcharge(),
            estimated_output_tokens: default_estimated_output_tokens(),
        }
    }
}

impl CreditsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chars_per_token == 0 {
            return Err(ConfigError::Validation(
                "credits.chars_per_token must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_chars_per_token() -> u32 {
    4
}

fn default_attachment_surcharge() -> u32 {
    1_000
}

fn default_estimated_output_tokens() -> u32 {
    1_000
}
