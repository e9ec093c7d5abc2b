mod identity;
mod request_id;

pub use identity::{UserIdentity, identity_middleware};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
