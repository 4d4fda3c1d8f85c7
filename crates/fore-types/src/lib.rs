pub mod activity;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
