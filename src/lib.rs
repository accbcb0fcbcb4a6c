pub mod logger;
pub mod settings;

pub mod storage;
pub mod transport;

pub mod auth;
pub mod cache;
