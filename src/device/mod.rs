pub mod btle;
pub mod constants;
pub mod coordinator;
pub mod registry;
pub mod transport;
pub mod types;
