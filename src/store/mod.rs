pub mod filestore;
mod generic;
pub mod memory;

pub use filestore::FileStore;
pub use memory::MemoryStore;
pub use rpcore::store::{IdentityStore, RetainedSecretsStore, StoreError};
