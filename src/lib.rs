//! Menuflow Server Library
//!
//! Exposes the menu ingestion pipeline: a PDF is uploaded into a staging
//! slot, handed to Gemini for structured extraction, sanitized, and written
//! item by item into Postgres.

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;

// Re-export commonly used types for convenience
pub use config::AppSettings;
pub use error::AppError;
