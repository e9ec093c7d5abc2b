use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Requester identity configuration.
///
/// The gateway does not authenticate requests itself. It trusts an upstream
/// proxy to authenticate the caller and forward the user id in a header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Header containing the authenticated user id.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        http::HeaderName::from_bytes(self.identity_header.as_bytes()).map_err(|_| {
            ConfigError::Validation(format!(
                "auth.identity_header '{}' is not a valid header name",
                self.identity_header
            ))
        })?;
        Ok(())
    }
}

fn default_identity_header() -> String {
    "x-user-id".into()
}
