pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use event::Event;
pub use memory::InMemoryStore;
pub use store::{ResourceStore, ResourceStoreExt};
