pub mod error;
pub mod retained;
pub mod traits;

pub use error::{Result, StoreError};
pub use retained::RetainedSecretsRecord;
pub use traits::{IdentityStore, RetainedSecretsStore};
