use rust_decimal::Decimal;

use crate::{
    config::CreditsConfig,
    pricing::{ModelPricing, TokenUsage, compute_cost},
};

/// Pre-stream cost estimate for the spend check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendEstimate {
    pub usage: TokenUsage,
    pub cost_microcents: i64,
}

/// Estimate a request's cost from its text length and attachment count.
///
/// Input tokens are `ceil(chars / chars_per_token)` over every text sent to
/// the provider plus a fixed surcharge per attachment. Output tokens are the
/// configured flat estimate. The cost uses the same formula as settlement.
pub fn estimate_spend<'a>(
    config: &CreditsConfig,
    texts: impl IntoIterator<Item = &'a str>,
    attachments: usize,
    pricing: &ModelPricing,
    markup: Decimal,
) -> SpendEstimate {
    let chars: u64 = texts.into_iter().map(|t| t.chars().count() as u64).sum();
    let text_tokens = chars.div_ceil(u64::from(config.chars_per_token.max(1)));
    let attachment_tokens = attachments as u64 * u64::from(config.attachment_token_surcharge);

    let usage = TokenUsage::new(
        i64::try_from(text_tokens.saturating_add(attachment_tokens)).unwrap_or(i64::MAX),
        i64::from(config.estimated_output_tokens),
    );

    SpendEstimate {
        usage,
        cost_microcents: compute_cost(pricing, &usage, markup),
    }
}
