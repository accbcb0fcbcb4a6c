mod entry;
pub use entry::*;

mod loader;
pub use loader::*;
