pub mod health;
pub mod menu_handlers;
pub mod upload_handlers;
