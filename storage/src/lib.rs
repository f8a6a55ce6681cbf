pub mod reader;
pub mod store;
pub mod writer;

#[cfg(test)]
mod tests;

pub use reader::read_records;
pub use store::ProfileStore;
pub use writer::{write_records, StorageFormat};
