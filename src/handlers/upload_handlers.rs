use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info};
use serde::Serialize;

use crate::error::AppError;
use crate::services::staging_store::{StagedDocument, StagingStore};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMenuResponse {
    pub success: bool,
    pub files: Vec<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Accepts a multipart upload with a `restaurant_id` field and one or more
/// PDF `files` parts. Each accepted file replaces the restaurant's staging
/// slot, so the last file in the request is the one that gets processed.
pub async fn upload_menu(
    mut payload: Multipart,
    staging: web::Data<StagingStore>,
) -> Result<HttpResponse, AppError> {
    let mut restaurant_id: Option<i64> = None;
    let mut files: Vec<(String, String, Vec<u8>)> = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let content_disposition = field.content_disposition().ok_or_else(|| {
            AppError::InvalidArgument("Content-Disposition header missing".to_string())
        })?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::InvalidArgument("Field name missing".to_string()))?
            .to_string();

        match field_name.as_str() {
            "restaurant_id" => {
                let mut id_data = Vec::new();
                while let Some(chunk) = field.next().await {
                    id_data.extend_from_slice(&chunk?);
                }
                let id_str = String::from_utf8(id_data).map_err(|_| {
                    AppError::InvalidArgument("Invalid restaurant_id encoding".to_string())
                })?;
                restaurant_id = Some(id_str.trim().parse::<i64>().map_err(|e| {
                    AppError::InvalidArgument(format!(
                        "Invalid restaurant_id value '{}': {}",
                        id_str.trim(),
                        e
                    ))
                })?);
            }
            "files" | "file" => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("menu.pdf")
                    .to_string();
                let mime_type = field
                    .content_type()
                    .map(|content_type| content_type.to_string())
                    .unwrap_or_default();

                // Non-PDF uploads are rejected before anything is staged
                if mime_type != "application/pdf" {
                    debug!("Rejecting upload \"{}\" with type \"{}\"", file_name, mime_type);
                    return Err(AppError::Validation(
                        "Only PDF files are allowed".to_string(),
                    ));
                }

                let mut file_data = Vec::new();
                while let Some(chunk) = field.next().await {
                    file_data.extend_from_slice(&chunk?);
                }

                if file_data.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Uploaded PDF \"{}\" is empty",
                        file_name
                    )));
                }

                files.push((file_name, mime_type, file_data));
            }
            _ => {
                // Drain unknown fields so the stream can advance
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    let restaurant_id = restaurant_id
        .ok_or_else(|| AppError::BadRequest("restaurant_id field is required".to_string()))?;

    if files.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }

    let mut staged_names = Vec::with_capacity(files.len());
    let mut timestamp = Utc::now();

    for (file_name, mime_type, content) in files {
        let document = StagedDocument::new(file_name.clone(), mime_type, content);
        timestamp = document.staged_at;
        staging.put(restaurant_id, document);
        staged_names.push(file_name);
    }

    info!(
        "Staged {} file(s) for restaurant {}: {:?}",
        staged_names.len(),
        restaurant_id,
        staged_names
    );

    Ok(HttpResponse::Ok().json(UploadMenuResponse {
        success: true,
        files: staged_names,
        message: "Files processed successfully and ready for menu extraction".to_string(),
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use chrono::Duration;

    const BOUNDARY: &str = "------------------------abcdef0123456789";

    fn text_part(name: &str, value: &str) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        )
    }

    fn file_part(name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            BOUNDARY, name, filename, content_type
        )
        .into_bytes();
        part.extend_from_slice(bytes);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn close_body(mut body: Vec<u8>) -> Vec<u8> {
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn post_upload(staging: &StagingStore, body: Vec<u8>) -> actix_web::dev::ServiceResponse {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(staging.clone()))
                .route("/upload", web::post().to(upload_menu)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/upload")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
            .to_request();

        test::call_service(&app, req).await
    }

    #[actix_rt::test]
    async fn test_upload_stages_pdf_for_restaurant() {
        let staging = StagingStore::new(Duration::seconds(300));

        let mut body = text_part("restaurant_id", "7").into_bytes();
        body.extend(file_part("files", "menu.pdf", "application/pdf", b"%PDF-1.4 body"));
        let resp = post_upload(&staging, close_body(body)).await;

        assert!(resp.status().is_success());

        let document = staging.get(7).expect("document should be staged");
        assert_eq!(document.file_name, "menu.pdf");
        assert_eq!(document.mime_type, "application/pdf");
        assert_eq!(document.content, b"%PDF-1.4 body");
    }

    #[actix_rt::test]
    async fn test_upload_rejects_non_pdf() {
        let staging = StagingStore::new(Duration::seconds(300));

        let mut body = text_part("restaurant_id", "7").into_bytes();
        body.extend(file_part("files", "menu.txt", "text/plain", b"just text"));
        let resp = post_upload(&staging, close_body(body)).await;

        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        assert!(staging.get(7).is_none());
    }

    #[actix_rt::test]
    async fn test_upload_requires_restaurant_id() {
        let staging = StagingStore::new(Duration::seconds(300));

        let body = file_part("files", "menu.pdf", "application/pdf", b"%PDF-1.4");
        let resp = post_upload(&staging, close_body(body)).await;

        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_last_file_wins_the_staging_slot() {
        let staging = StagingStore::new(Duration::seconds(300));

        let mut body = text_part("restaurant_id", "7").into_bytes();
        body.extend(file_part("files", "first.pdf", "application/pdf", b"%PDF-1.4 one"));
        body.extend(file_part("files", "second.pdf", "application/pdf", b"%PDF-1.4 two"));
        let resp = post_upload(&staging, close_body(body)).await;

        assert!(resp.status().is_success());
        assert_eq!(staging.get(7).unwrap().file_name, "second.pdf");
    }
}
