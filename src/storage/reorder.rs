//! Chapter page reordering.
//!
//! The target namespace (`page1.<ext>`, `page2.<ext>`, ...) is already occupied
//! by the files being permuted, so a direct rename pass could overwrite a file
//! that has not been relocated yet. Every source is therefore parked under a
//! temp name first (phase A) and only then renamed to its final rank (phase B).
//! Renames already applied are not rolled back on failure; a journal sidecar
//! marks the directory so an interrupted run can be cleaned up later.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use super::error::StorageError;
use super::models::{parse_page_rank, Page};

pub const TEMP_PREFIX: &str = ".reorder-tmp-";
pub const JOURNAL_FILE: &str = ".reorder.journal";

/// Order tokens carrying this prefix reference a newly uploaded file by its
/// original client filename instead of a file already in the chapter directory.
pub const NEW_UPLOAD_PREFIX: &str = "new:";

const DEFAULT_EXT: &str = "jpg";

/// An uploaded file parked in the staging area, waiting to be merged into a
/// chapter. `original_name` is the filename the client submitted.
#[derive(Debug)]
pub struct StagedUpload {
    pub original_name: String,
    pub path: PathBuf,
}

enum Source {
    Existing { path: PathBuf, filename: String },
    Upload(StagedUpload),
}

struct TempEntry {
    temp: PathBuf,
    ext: String,
    // set for pre-existing pages, used to carry the stable id over
    original_filename: Option<String>,
}

/// Renames the chapter's files so on-disk names follow the requested order
/// (`page1.<ext>` .. `pageN.<ext>`, extension preserved per file) and returns
/// the rebuilt page list. Pre-existing pages keep their stable id; staged
/// uploads get a fresh one. Order entries that resolve to nothing become holes
/// and the output is compacted around them; uploads not referenced by any
/// `new:` token are appended in submission order.
pub async fn reorder_chapter(
    chapter_dir: &Path,
    current_pages: &[Page],
    order: &[String],
    uploads: Vec<StagedUpload>,
) -> Result<Vec<Page>, StorageError> {
    match fs::metadata(chapter_dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(StorageError::ChapterDirMissing(chapter_dir.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StorageError::ChapterDirMissing(chapter_dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    }

    validate_order(order)?;

    // Snapshot before any rename; ids are looked up by the *original* filename.
    let id_by_filename: HashMap<&str, &str> = current_pages
        .iter()
        .map(|p| (p.filename.as_str(), p.id.as_str()))
        .collect();

    let resolved = resolve_order(chapter_dir, order, uploads).await?;

    fs::write(chapter_dir.join(JOURNAL_FILE), b"reorder in progress\n").await?;

    // Phase A: park every source under a rank-tagged temp name. Temp names
    // start with a dot so they can never collide with a `page<N>` target.
    let mut staged: Vec<Option<TempEntry>> = Vec::with_capacity(resolved.len());
    for (rank, source) in resolved.into_iter().enumerate() {
        let Some(source) = source else {
            staged.push(None);
            continue;
        };
        let (src_path, ext, original_filename) = match source {
            Source::Existing { path, filename } => {
                let ext = extension_of(&filename);
                (path, ext, Some(filename))
            }
            Source::Upload(upload) => {
                let ext = extension_of(&upload.original_name);
                (upload.path, ext, None)
            }
        };
        let temp = chapter_dir.join(format!("{TEMP_PREFIX}{rank}.{ext}"));
        match fs::rename(&src_path, &temp).await {
            Ok(()) => staged.push(Some(TempEntry {
                temp,
                ext,
                original_filename,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "Page source {} vanished before rename, leaving a hole",
                    src_path.display()
                );
                staged.push(None);
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Phase B: ascending rank, holes compacted out of the final numbering.
    let mut pages = Vec::new();
    for entry in staged.into_iter().flatten() {
        let filename = format!("page{}.{}", pages.len() + 1, entry.ext);
        fs::rename(&entry.temp, chapter_dir.join(&filename)).await?;
        let id = entry
            .original_filename
            .as_deref()
            .and_then(|name| id_by_filename.get(name))
            .map(|id| (*id).to_string())
            .unwrap_or_else(new_page_id);
        pages.push(Page { id, filename });
    }

    sweep_temp_files(chapter_dir).await?;

    Ok(pages)
}

fn validate_order(order: &[String]) -> Result<(), StorageError> {
    let mut seen = HashSet::new();
    for token in order {
        let name = token.strip_prefix(NEW_UPLOAD_PREFIX).unwrap_or(token);
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::InvalidInput(format!(
                "invalid order entry: {token:?}"
            )));
        }
        if !seen.insert(token.as_str()) {
            return Err(StorageError::InvalidInput(format!(
                "duplicate order entry: {token:?}"
            )));
        }
    }
    Ok(())
}

/// Turns order tokens into concrete sources, using the directory listing as
/// ground truth. Unreferenced uploads are appended in submission order. Every
/// `page<N>` file already on disk must be referenced, otherwise phase B could
/// silently overwrite it.
async fn resolve_order(
    chapter_dir: &Path,
    order: &[String],
    uploads: Vec<StagedUpload>,
) -> Result<Vec<Option<Source>>, StorageError> {
    let mut pending: Vec<Option<StagedUpload>> = uploads.into_iter().map(Some).collect();
    let mut resolved: Vec<Option<Source>> = Vec::with_capacity(order.len() + pending.len());
    let mut referenced: HashSet<&str> = HashSet::new();

    for token in order {
        if let Some(name) = token.strip_prefix(NEW_UPLOAD_PREFIX) {
            let slot = pending
                .iter()
                .position(|s| s.as_ref().is_some_and(|u| u.original_name == name));
            match slot {
                Some(i) => resolved.push(pending[i].take().map(Source::Upload)),
                None => resolved.push(None),
            }
        } else {
            let path = chapter_dir.join(token);
            if fs::try_exists(&path).await? {
                referenced.insert(token.as_str());
                resolved.push(Some(Source::Existing {
                    path,
                    filename: token.clone(),
                }));
            } else {
                resolved.push(None);
            }
        }
    }

    let mut entries = fs::read_dir(chapter_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if parse_page_rank(name).is_some() && !referenced.contains(name) {
            return Err(StorageError::InvalidInput(format!(
                "order does not cover existing page {name:?}"
            )));
        }
    }

    for upload in pending.into_iter().flatten() {
        resolved.push(Some(Source::Upload(upload)));
    }

    Ok(resolved)
}

/// Removes leftover temp files and the journal. Runs after every reorder and
/// from startup recovery for directories an interrupted run left behind.
pub async fn sweep_temp_files(dir: &Path) -> Result<(), StorageError> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(TEMP_PREFIX) || name == JOURNAL_FILE {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

pub async fn has_journal(dir: &Path) -> bool {
    fs::try_exists(dir.join(JOURNAL_FILE)).await.unwrap_or(false)
}

pub fn new_page_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXT.to_string())
}
