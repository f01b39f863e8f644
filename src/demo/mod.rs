mod caps;
mod config;
mod consumer;
mod engine;
mod gameplay;
mod loader;
mod mesh;
mod messages;
mod producer;

pub use config::DemoConfig;
pub use engine::Engine;
