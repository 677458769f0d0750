use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::fs;

use crate::api::types::{AppError, AppState};
use crate::storage::models::parse_page_rank;
use crate::storage::reorder;

#[derive(Serialize)]
pub struct PagesResponse {
    pub pages: Vec<String>,
}

pub async fn list_pages(
    State(state): State<AppState>,
    Path((slug, number)): Path<(u64, String)>,
) -> Result<Json<PagesResponse>, AppError> {
    match state.library.list_pages(slug, &number).await {
        Ok(pages) => Ok(Json(PagesResponse { pages })),
        Err(e) => {
            tracing::error!("Failed to list pages for {}/{}: {:?}", slug, number, e);
            Err(e.into())
        }
    }
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<String>,
}

pub async fn reorder_pages(
    State(state): State<AppState>,
    Path((slug, number)): Path<(u64, String)>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
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
    match reorder::reorder_chapter(&chapter_dir, &current, &payload.order, vec![]).await {
        Ok(pages) => chapter.pages = pages,
        Err(e) => {
            tracing::error!("Failed to reorder {}/{}: {:?}", slug, number, e);
            return Err(e.into());
        }
    }
    state.library.save(&comics).await?;

    Ok(Json(json!({ "message": "Order updated" })))
}

pub async fn get_page(
    State(state): State<AppState>,
    Path((slug, number, filename)): Path<(u64, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    if parse_page_rank(&filename).is_none() {
        return Err(AppError::BadRequest(format!(
            "invalid page filename: {filename:?}"
        )));
    }
    let path = state.library.chapter_dir(slug, &number)?.join(&filename);
    match fs::read(&path).await {
        Ok(data) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, content_type_for(&filename));
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000"),
            );
            Ok((headers, Body::from(data)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::NotFound(format!("page {filename} not found")))
        }
        Err(e) => {
            tracing::error!("Failed to read page {}: {:?}", path.display(), e);
            Err(AppError::InternalServerError(e.to_string()))
        }
    }
}

fn content_type_for(filename: &str) -> HeaderValue {
    let ext = filename.rsplit('.').next().unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "png" => HeaderValue::from_static("image/png"),
        "webp" => HeaderValue::from_static("image/webp"),
        _ => HeaderValue::from_static("image/jpeg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Library;
    use crate::storage::models::{Chapter, Comic, Page};
    use tempfile::TempDir;

    async fn state_with_chapter(tmp: &TempDir, files: &[&str], pages: Vec<Page>) -> AppState {
        let library = Library::open(tmp.path().to_str().unwrap()).await.unwrap();
        let dir = library.chapter_dir(5, "1").unwrap();
        fs::create_dir_all(&dir).await.unwrap();
        for f in files {
            fs::write(dir.join(f), f.as_bytes()).await.unwrap();
        }
        let comic = Comic {
            slug: 5,
            title: "Test".into(),
            author: vec![],
            artists: vec![],
            groups: vec![],
            parodies: vec![],
            characters: vec![],
            categories: vec![],
            tags: vec![],
            status: "ongoing".into(),
            uploaded: String::new(),
            cover: String::new(),
            chapters: vec![Chapter {
                number: "1".into(),
                title: String::new(),
                language: String::new(),
                upload_chapter: String::new(),
                pages,
            }],
        };
        library.save(&[comic]).await.unwrap();
        AppState { library }
    }

    fn page(id: &str, filename: &str) -> Page {
        Page {
            id: id.into(),
            filename: filename.into(),
        }
    }

    #[tokio::test]
    async fn reorder_endpoint_renames_files_and_rewrites_metadata() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_chapter(
            &tmp,
            &["page1.jpg", "page2.jpg"],
            vec![page("a", "page1.jpg"), page("b", "page2.jpg")],
        )
        .await;

        let result = reorder_pages(
            State(state.clone()),
            Path((5, "1".into())),
            Json(ReorderRequest {
                order: vec!["page2.jpg".into(), "page1.jpg".into()],
            }),
        )
        .await;
        assert!(result.is_ok());

        let comics = state.library.load().await.unwrap();
        assert_eq!(
            comics[0].chapters[0].pages,
            vec![page("b", "page1.jpg"), page("a", "page2.jpg")]
        );
        let dir = state.library.chapter_dir(5, "1").unwrap();
        assert_eq!(
            fs::read(dir.join("page1.jpg")).await.unwrap(),
            b"page2.jpg".to_vec()
        );
    }

    #[tokio::test]
    async fn reorder_unknown_comic_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_chapter(&tmp, &[], vec![]).await;
        let result = reorder_pages(
            State(state),
            Path((99, "1".into())),
            Json(ReorderRequest { order: vec![] }),
        )
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_pages_endpoint_matches_reorder_output() {
        let tmp = TempDir::new().unwrap();
        let state = state_with_chapter(
            &tmp,
            &["page1.jpg", "page2.png"],
            vec![page("a", "page1.jpg"), page("b", "page2.png")],
        )
        .await;
        let response = list_pages(State(state), Path((5, "1".into()))).await;
        let Ok(Json(body)) = response else {
            panic!("list_pages failed");
        };
        assert_eq!(body.pages, vec!["page1.jpg", "page2.png"]);
    }
}
