pub mod binding;
pub mod config;
pub mod processor;
pub mod resolver;
pub mod store;
pub mod telegram;
pub mod transform;
pub mod webhook;
