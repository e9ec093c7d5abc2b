mod common;
mod conversations;
mod credits;
mod memberships;
mod model_pricing;
mod supervision;
mod usage;
mod users;

pub use conversations::SqliteConversationRepo;
pub use credits::SqliteCreditRepo;
pub use memberships::SqliteMembershipRepo;
pub use model_pricing::SqliteModelPricingRepo;
pub use supervision::SqliteSupervisionRepo;
pub use usage::SqliteUsageRepo;
pub use users::SqliteUserRepo;
