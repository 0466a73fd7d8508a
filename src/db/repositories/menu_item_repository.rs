use async_trait::async_trait;
use log::{debug, error};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::services::menu_persistence::MenuItemWriter;

pub struct MenuItemRepository {
    pool: PgPool,
}

impl MenuItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MenuItemWriter for MenuItemRepository {
    /// Inserts a single extracted menu item for a restaurant. Each row stands
    /// alone; batch semantics live in the persistence service.
    async fn insert_menu_item(&self, restaurant_id: i64, item: &str, info: &str) -> AppResult<()> {
        debug!("Inserting menu item \"{}\" for restaurant {}", item, restaurant_id);

        sqlx::query(
            "INSERT INTO menu_items (restaurant_id, item, info)
             VALUES ($1, $2, $3)",
        )
        .bind(restaurant_id)
        .bind(item)
        .bind(info)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to insert menu item \"{}\" for restaurant {}: {}",
                item, restaurant_id, e
            );
            AppError::Database(format!("Failed to insert menu item: {}", e))
        })?;

        Ok(())
    }
}
