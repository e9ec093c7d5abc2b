use crate::config::Tier;

/// Cache key builders. Backends add their own prefix.
pub struct CacheKeys;

impl CacheKeys {
    /// Fixed-window counter for one user on one tier.
    ///
    /// The user id is wrapped in a hash tag so every tier bucket for a user
    /// lands on the same Redis Cluster slot.
    pub fn rate_limit(user_id: &str, tier: Tier) -> String {
        format!("ratelimit:{{{user_id}}}:{}", tier.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_key() {
        assert_eq!(
            CacheKeys::rate_limit("user-1", Tier::Premium),
            "ratelimit:{user-1}:premium"
        );
    }
}
