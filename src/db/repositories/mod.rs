pub mod menu_item_repository;

pub use menu_item_repository::MenuItemRepository;
