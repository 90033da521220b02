// src/storage/mod.rs

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{DataStore, StoredRow};
