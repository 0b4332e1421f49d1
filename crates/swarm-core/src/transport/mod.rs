pub mod client;
pub mod server;
pub mod types;

pub use client::TransportClient;
pub use server::{build_router, AppState};
