use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::json;
use tokio::fs;

use crate::api::types::{AppError, AppState};
use crate::storage::models::{timestamp_now, Chapter};
use crate::storage::reorder::{self, StagedUpload};

struct ChapterForm {
    number: Option<String>,
    title: Option<String>,
    language: Option<String>,
    order: Option<Vec<String>>,
    uploads: Vec<StagedUpload>,
}

async fn read_chapter_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<ChapterForm, AppError> {
    let mut form = ChapterForm {
        number: None,
        title: None,
        language: None,
        order: None,
        uploads: Vec::new(),
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "number" => form.number = Some(read_text(field).await?),
            "title" => form.title = Some(read_text(field).await?),
            "language" => form.language = Some(read_text(field).await?),
            "order" => {
                let raw = read_text(field).await?;
                let order: Vec<String> = serde_json::from_str(&raw)
                    .map_err(|_| AppError::BadRequest("Invalid order format".to_string()))?;
                form.order = Some(order);
            }
            "pages" => {
                let original = field.file_name().unwrap_or("page").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))?;
                form.uploads
                    .push(state.library.stage_upload(&original, &data).await?);
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))
}

pub async fn add_chapter(
    State(state): State<AppState>,
    Path(slug): Path<u64>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut form = read_chapter_form(&state, multipart).await?;
    let number = form
        .number
        .take()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("number is required".to_string()))?;

    let _guard = state.library.lock_chapter(slug, &number).await;

    let mut comics = state.library.load().await?;
    let comic = comics
        .iter_mut()
        .find(|c| c.slug == slug)
        .ok_or_else(|| AppError::NotFound(format!("comic {slug} not found")))?;
    if comic.chapters.iter().any(|c| c.number == number) {
        return Err(AppError::BadRequest(format!(
            "chapter {number} already exists"
        )));
    }

    let chapter_dir = state.library.chapter_dir(slug, &number)?;
    fs::create_dir_all(&chapter_dir)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    // Page files for a fresh chapter follow the client's filenames.
    form.uploads
        .sort_by(|a, b| a.original_name.cmp(&b.original_name));
    let pages = match reorder::reorder_chapter(&chapter_dir, &[], &[], form.uploads).await {
        Ok(pages) => pages,
        Err(e) => {
            tracing::error!("Failed to ingest pages for {}/{}: {:?}", slug, number, e);
            return Err(e.into());
        }
    };

    comic.chapters.push(Chapter {
        number,
        title: form.title.unwrap_or_default(),
        language: form.language.unwrap_or_default(),
        upload_chapter: timestamp_now(),
        pages,
    });
    state.library.save(&comics).await?;

    Ok(Json(json!({ "message": "Chapter added" })))
}

/// Merged edit: chapter metadata, a new page order, and freshly uploaded pages
/// in one request. Without an `order` field the current order stands and
/// uploads are appended.
pub async fn edit_chapter(
    State(state): State<AppState>,
    Path((slug, number)): Path<(u64, String)>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = read_chapter_form(&state, multipart).await?;

    let _guard = state.library.lock_chapter(slug, &number).await;

    let mut comics = state.library.load().await?;
    let comic = comics
        .iter_mut()
        .find(|c| c.slug == slug)
        .ok_or_else(|| AppError::NotFound(format!("comic {slug} not found")))?;
    let chapter = comic
        .chapter_mut(&number)
        .ok_or_else(|| AppError::NotFound(format!("chapter {number} not found")))?;

    let chapter_dir = state.library.chapter_dir(slug, &number)?;
    let current = chapter.pages.clone();
    let order = form
        .order
        .unwrap_or_else(|| current.iter().map(|p| p.filename.clone()).collect());
    match reorder::reorder_chapter(&chapter_dir, &current, &order, form.uploads).await {
        Ok(pages) => chapter.pages = pages,
        Err(e) => {
            tracing::error!("Failed to update pages for {}/{}: {:?}", slug, number, e);
            return Err(e.into());
        }
    }

    if let Some(title) = form.title {
        chapter.title = title;
    }
    if let Some(language) = form.language {
        chapter.language = language;
    }
    chapter.upload_chapter = timestamp_now();
    state.library.save(&comics).await?;

    Ok(Json(json!({ "message": "Chapter updated" })))
}

pub async fn delete_chapter(
    State(state): State<AppState>,
    Path((slug, number)): Path<(u64, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _guard = state.library.lock_chapter(slug, &number).await;
    match state.library.delete_chapter(slug, &number).await {
        Ok(()) => Ok(Json(json!({ "message": "Chapter deleted" }))),
        Err(e) => {
            tracing::error!("Failed to delete chapter {}/{}: {:?}", slug, number, e);
            Err(e.into())
        }
    }
}
