pub mod clock;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod engine;
pub mod error;
pub mod job;
pub mod limiter;
pub mod observer;
pub mod progress;
pub mod remote;
pub mod retry;
pub mod state;
pub mod store;

#[cfg(test)]
mod testutil;
