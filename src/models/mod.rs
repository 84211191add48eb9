pub mod check;
pub mod token;
pub mod vehicle;

pub use check::{CheckOutcome, CheckResult, FailureReason, MotStatus, MotStatusUpdate};
pub use token::AccessToken;
pub use vehicle::Vrm;
