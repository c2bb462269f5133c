pub mod client;
pub mod server;

pub use client::Client;
pub use server::{Server, ServerConfig, DEFAULT_MAX_FRAME_BYTES};
