mod credentials;
pub use credentials::*;

mod gate;
pub use gate::*;

mod coordinator;
pub use coordinator::*;

mod client;
pub use client::*;
