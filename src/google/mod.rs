// src/google/mod.rs
pub mod auth;
pub mod client;
pub mod models;

// Re-export the types the rest of the crate works with
pub use auth::ServiceAccountKey;
pub use client::GoogleClient;
pub use models::DriveFile;
