pub mod call;
pub mod phone_number;
pub mod zid;

pub use call::{CallState, CallTransition, InvalidTransition, SessionDescriptor};
pub use phone_number::PhoneNumberFormatter;
pub use zid::Zid;
