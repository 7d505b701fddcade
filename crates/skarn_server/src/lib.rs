pub mod chunk;
pub mod config;
pub mod generate;
pub mod lifecycle;
pub mod loader;
pub mod persistence;
pub mod runtime;
pub mod store;
pub mod terrain;
pub mod updater;
