//! Guardian supervision: the pre-request policy check and the stripper that
//! pulls embedded metadata out of model output.

mod policy;
pub mod stripper;

pub use policy::{
    Precheck, SupervisionDenial, SupervisionPolicy, in_quiet_hours, local_day_start, local_minute,
};
pub use stripper::{BlockMarkers, Sentinels, StripState};
