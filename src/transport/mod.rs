mod transport;
pub use transport::*;

mod fake_transport;
pub use fake_transport::*;
