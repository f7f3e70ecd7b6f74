pub mod a2a;
pub mod agent;
pub mod cli;
pub mod config;
pub mod llm;
pub mod logger;
pub mod observer;
pub mod server;
pub mod token;
pub mod tools;

pub use agent::Agent;
