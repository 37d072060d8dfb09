pub mod bind;
pub mod commands;
pub mod config;
pub mod context;
pub mod model;
pub mod semaphore;
pub mod shell;
pub mod stream;
pub mod sync;
pub mod telemetry;
pub mod terminal;
pub mod transport;

#[cfg(test)]
mod testing;
