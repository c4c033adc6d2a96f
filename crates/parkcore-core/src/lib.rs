pub mod availability;
pub mod coordinator;
pub mod error;
pub mod lease;
pub mod persistence;

pub use error::CoreError;
