//! Snippet guessing game library: catalog clients, preview resolution, track
//! pools and the game session shared by all binaries.

pub mod config;
pub mod error;
pub mod guest;
pub mod itunes;
pub mod models;
pub mod normalize;
pub mod player;
pub mod pool;
pub mod progress;
pub mod resolver;
pub mod scoring;
pub mod session;
pub mod spotify;
