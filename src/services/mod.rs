pub mod staging_store;
pub mod response_sanitizer;
pub mod menu_persistence;
pub mod menu_pipeline;
