use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::fs;

use crate::api::types::{AppError, AppState};
use crate::storage::models::{timestamp_now, Chapter, Comic};
use crate::storage::reorder::{self, StagedUpload};

#[derive(Deserialize)]
struct ChapterMeta {
    number: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    language: String,
}

#[derive(Default)]
struct ComicForm {
    slug: Option<String>,
    fields: HashMap<String, String>,
    cover: Option<Vec<u8>>,
    chapters: Vec<ChapterMeta>,
    chapter_uploads: HashMap<String, Vec<StagedUpload>>,
}

impl ComicForm {
    fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    // Facet fields arrive as one comma-separated string.
    fn list(&self, name: &str) -> Vec<String> {
        self.text(name)
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

async fn read_comic_form(state: &AppState, mut multipart: Multipart) -> Result<ComicForm, AppError> {
    let mut form = ComicForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "slug" => {
                form.slug = Some(read_text(field).await?);
            }
            "cover" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))?;
                if !data.is_empty() {
                    form.cover = Some(data.to_vec());
                }
            }
            "chapters" => {
                let raw = read_text(field).await?;
                form.chapters = serde_json::from_str(&raw)
                    .map_err(|_| AppError::BadRequest("Invalid chapters format".to_string()))?;
            }
            _ => {
                if let Some(number) = name.strip_prefix("chapter-") {
                    let number = number.to_string();
                    let original = field.file_name().unwrap_or("page").to_string();
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Form parse error: {e}")))?;
                    form.chapter_uploads
                        .entry(number)
                        .or_default()
                        .push(state.library.stage_upload(&original, &data).await?);
                } else {
                    form.fields.insert(name, read_text(field).await?);
                }
            }
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

/// Whole-comic upload: metadata, cover, and every chapter's page files in one
/// multipart request. An existing slug is replaced wholesale.
pub async fn upload_comic(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut form = read_comic_form(&state, multipart).await?;
    let slug: u64 = form
        .slug
        .as_deref()
        .unwrap_or("")
        .parse()
        .map_err(|_| AppError::BadRequest("Slug is required".to_string()))?;

    let comic_dir = state.library.comic_dir(slug);
    fs::create_dir_all(&comic_dir)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    if let Some(cover) = &form.cover {
        fs::write(comic_dir.join("cover.jpg"), cover)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    }

    let uploaded = timestamp_now();
    let mut chapters = Vec::new();
    for meta in std::mem::take(&mut form.chapters) {
        let chapter_dir = state.library.chapter_dir(slug, &meta.number)?;
        let _guard = state.library.lock_chapter(slug, &meta.number).await;
        fs::create_dir_all(&chapter_dir)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        let uploads = form.chapter_uploads.remove(&meta.number).unwrap_or_default();
        let pages = match reorder::reorder_chapter(&chapter_dir, &[], &[], uploads).await {
            Ok(pages) => pages,
            Err(e) => {
                tracing::error!(
                    "Failed to ingest pages for {}/{}: {:?}",
                    slug,
                    meta.number,
                    e
                );
                return Err(e.into());
            }
        };
        chapters.push(Chapter {
            number: meta.number,
            title: meta.title,
            language: meta.language,
            upload_chapter: uploaded.clone(),
            pages,
        });
    }

    let comic = Comic {
        slug,
        title: form.text("title"),
        author: form.list("author"),
        artists: form.list("artists"),
        groups: form.list("groups"),
        parodies: form.list("parodies"),
        characters: form.list("characters"),
        categories: form.list("categories"),
        tags: form.list("tags"),
        status: form.text("status"),
        uploaded,
        cover: format!("/comics/{slug}/cover.jpg"),
        chapters,
    };

    let mut comics = state.library.load().await?;
    match comics.iter_mut().find(|c| c.slug == slug) {
        Some(existing) => *existing = comic,
        None => comics.push(comic),
    }
    state.library.save(&comics).await?;

    Ok(Json(json!({ "message": "Upload successful" })))
}

/// Metadata edit with optional cover replacement. Chapters and pages are left
/// untouched.
pub async fn edit_comic(
    State(state): State<AppState>,
    Path(slug): Path<u64>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = read_comic_form(&state, multipart).await?;

    let mut comics = state.library.load().await?;
    let comic = comics
        .iter_mut()
        .find(|c| c.slug == slug)
        .ok_or_else(|| AppError::NotFound(format!("comic {slug} not found")))?;

    comic.title = form.text("title");
    comic.author = form.list("author");
    comic.artists = form.list("artists");
    comic.groups = form.list("groups");
    comic.parodies = form.list("parodies");
    comic.characters = form.list("characters");
    comic.categories = form.list("categories");
    comic.tags = form.list("tags");
    comic.status = form.text("status");
    comic.uploaded = timestamp_now();

    if let Some(cover) = &form.cover {
        let comic_dir = state.library.comic_dir(slug);
        fs::create_dir_all(&comic_dir)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        fs::write(comic_dir.join("cover.jpg"), cover)
            .await
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    }

    state.library.save(&comics).await?;

    Ok(Json(json!({ "message": "Comic updated" })))
}

pub async fn delete_comic(
    State(state): State<AppState>,
    Path(slug): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.library.delete_comic(slug).await {
        Ok(()) => Ok(Json(json!({ "message": "Comic deleted" }))),
        Err(e) => {
            tracing::error!("Failed to delete comic {}: {:?}", slug, e);
            Err(e.into())
        }
    }
}
