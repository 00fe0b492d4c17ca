pub mod config;
pub mod legacy;
pub mod provision;
pub mod remove;
pub mod session;
pub mod validate;
