mod conversations;
mod credits;
mod memberships;
mod model_pricing;
mod supervision;
mod usage;
mod users;

pub use conversations::*;
pub use credits::*;
pub use memberships::*;
pub use model_pricing::*;
pub use supervision::*;
pub use usage::*;
pub use users::*;
