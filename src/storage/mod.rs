mod store;
pub use store::*;

mod memory_store;
pub use memory_store::*;

mod file_store;
pub use file_store::*;
