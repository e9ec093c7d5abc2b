mod conversation;
mod credit;
mod model_pricing;
mod organization;
mod supervision;
mod usage;
mod user;

pub use conversation::*;
pub use credit::*;
pub use model_pricing::*;
pub use organization::*;
pub use supervision::*;
pub use usage::*;
pub use user::*;
