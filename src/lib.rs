pub mod api;
pub mod cache;
pub mod candidate;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;
pub mod orchestrator;
pub mod persist;
pub mod scheduler;
pub mod scoring;
pub mod shutdown;
pub mod worker;
