use actix_web::{web, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};

use crate::clients::gemini_client::GeminiClient;
use crate::db::repositories::MenuItemRepository;
use crate::services::menu_persistence::RecordOutcome;
use crate::services::menu_pipeline::{MenuPipeline, PipelineError};

/// Pipeline as wired in production: Gemini for extraction, Postgres for
/// persistence.
pub type AppPipeline = MenuPipeline<GeminiClient, MenuItemRepository>;

#[derive(Debug, Deserialize)]
pub struct ProcessMenuRequest {
    pub restaurant_id: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMenuResponse {
    pub success: bool,
    pub message: String,
    pub total_items: usize,
    pub items_inserted: usize,
    pub errors: usize,
    pub outcomes: Vec<RecordOutcome>,
    pub elapsed_seconds: f64,
}

/// Triggers one processing run against the restaurant's staged document.
pub async fn process_menu(
    pipeline: web::Data<AppPipeline>,
    body: web::Json<ProcessMenuRequest>,
) -> Result<HttpResponse, PipelineError> {
    info!("Processing staged menu for restaurant {}", body.restaurant_id);

    let summary = pipeline.run(body.restaurant_id).await?;

    Ok(HttpResponse::Ok().json(ProcessMenuResponse {
        success: true,
        message: format!(
            "Successfully processed PDF and inserted {} menu items",
            summary.inserted
        ),
        total_items: summary.total,
        items_inserted: summary.inserted,
        errors: summary.errors,
        outcomes: summary.outcomes,
        elapsed_seconds: summary.elapsed_seconds,
    }))
}
