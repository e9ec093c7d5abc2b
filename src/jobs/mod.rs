//! Background workers.
//!
//! - **Pricing refresh**: reloads database pricing overrides into the shared
//!   catalog on an interval.
//!
//! Workers log and retry on failure and never take the gateway down.
//!
//! ```toml
//! [pricing]
//! refresh_interval_secs = 300
//! ```

mod pricing_refresh;

pub use pricing_refresh::{refresh_pricing, start_pricing_refresh_worker};
