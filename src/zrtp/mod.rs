pub mod socket;

pub use socket::{SecureCall, ZrtpSocket};
