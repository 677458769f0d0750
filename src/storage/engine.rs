use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::StorageError;
use super::models::{parse_page_rank, Comic};
use super::reorder::{self, StagedUpload};

const STORE_FILE: &str = "comics.json";
const COMICS_DIR: &str = "comics";
const STAGING_DIR: &str = "tmp_upload";

/// Handle to the on-disk library: the `comics.json` metadata store plus the
/// per-comic directory tree holding covers and chapter page images.
#[derive(Clone)]
pub struct Library {
    data_dir: PathBuf,
    chapter_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Library {
    pub async fn open(data_dir: &str) -> Result<Self, StorageError> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(data_dir.join(COMICS_DIR)).await?;
        fs::create_dir_all(data_dir.join(STAGING_DIR)).await?;
        let library = Self {
            data_dir,
            chapter_locks: Arc::new(Mutex::new(HashMap::new())),
        };
        library.recover_interrupted_reorders().await?;
        Ok(library)
    }

    pub fn comics_root(&self) -> PathBuf {
        self.data_dir.join(COMICS_DIR)
    }

    pub fn comic_dir(&self, slug: u64) -> PathBuf {
        self.comics_root().join(slug.to_string())
    }

    pub fn chapter_dir(&self, slug: u64, number: &str) -> Result<PathBuf, StorageError> {
        if number.is_empty() || number.contains(['/', '\\']) || number == "." || number == ".." {
            return Err(StorageError::InvalidInput(format!(
                "invalid chapter number: {number:?}"
            )));
        }
        Ok(self.comic_dir(slug).join("chapters").join(number))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR)
    }

    fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    /// Whole-file read of the metadata store. An absent store is an empty
    /// library, matching first-run behavior.
    pub async fn load(&self) -> Result<Vec<Comic>, StorageError> {
        match fs::read(self.store_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whole-file replace, via a sibling temp file and rename so a crash
    /// mid-write cannot leave a truncated store behind.
    pub async fn save(&self, comics: &[Comic]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(comics)?;
        let tmp = self.data_dir.join(format!("{STORE_FILE}.tmp"));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, self.store_path()).await?;
        Ok(())
    }

    /// Advisory lock making the single-writer-per-chapter assumption explicit.
    /// The guard must be held across the whole mutation, metadata save
    /// included.
    pub async fn lock_chapter(&self, slug: u64, number: &str) -> OwnedMutexGuard<()> {
        let key = format!("{slug}/{number}");
        let lock = {
            let mut locks = self.chapter_locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Parks an uploaded file in the staging area under a unique name. The
    /// staging area lives inside the data directory so the later move into a
    /// chapter is a same-filesystem rename.
    pub async fn stage_upload(
        &self,
        original_name: &str,
        data: &[u8],
    ) -> Result<StagedUpload, StorageError> {
        let path = self.staging_dir().join(uuid::Uuid::new_v4().to_string());
        fs::write(&path, data).await?;
        Ok(StagedUpload {
            original_name: original_name.to_string(),
            path,
        })
    }

    /// Files in the chapter directory matching `page<digits>.<ext>`, sorted by
    /// the numeric rank. A missing directory reads as an empty chapter.
    pub async fn list_pages(&self, slug: u64, number: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.chapter_dir(slug, number)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut pages: Vec<(u32, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rank) = parse_page_rank(name) {
                pages.push((rank, name.to_string()));
            }
        }
        pages.sort();
        Ok(pages.into_iter().map(|(_, name)| name).collect())
    }

    /// Removes the comic from the store, then its directory tree (cover and
    /// all chapters).
    pub async fn delete_comic(&self, slug: u64) -> Result<(), StorageError> {
        let mut comics = self.load().await?;
        let before = comics.len();
        comics.retain(|c| c.slug != slug);
        if comics.len() == before {
            return Err(StorageError::ComicNotFound(slug));
        }
        self.save(&comics).await?;
        remove_dir_if_present(self.comic_dir(slug)).await?;
        Ok(())
    }

    /// Removes the chapter from its comic's record, then the chapter
    /// directory with all page images.
    pub async fn delete_chapter(&self, slug: u64, number: &str) -> Result<(), StorageError> {
        let dir = self.chapter_dir(slug, number)?;
        let mut comics = self.load().await?;
        let comic = comics
            .iter_mut()
            .find(|c| c.slug == slug)
            .ok_or(StorageError::ComicNotFound(slug))?;
        let before = comic.chapters.len();
        comic.chapters.retain(|c| c.number != number);
        if comic.chapters.len() == before {
            return Err(StorageError::ChapterNotFound(number.to_string()));
        }
        self.save(&comics).await?;
        remove_dir_if_present(dir).await?;
        Ok(())
    }

    /// Walks every chapter directory looking for the journal an interrupted
    /// reorder leaves behind, and sweeps its temp files so the directory is
    /// consistent again.
    async fn recover_interrupted_reorders(&self) -> Result<(), StorageError> {
        let mut slugs = fs::read_dir(self.comics_root()).await?;
        while let Some(slug_entry) = slugs.next_entry().await? {
            let chapters_root = slug_entry.path().join("chapters");
            let mut chapters = match fs::read_dir(&chapters_root).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(chapter_entry) = chapters.next_entry().await? {
                let dir = chapter_entry.path();
                if reorder::has_journal(&dir).await {
                    tracing::warn!(
                        "Interrupted reorder detected in {}, sweeping temp files",
                        dir.display()
                    );
                    reorder::sweep_temp_files(&dir).await?;
                }
            }
        }
        Ok(())
    }
}

async fn remove_dir_if_present(dir: PathBuf) -> Result<(), StorageError> {
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{Chapter, Page};
    use tempfile::TempDir;

    async fn open_library(tmp: &TempDir) -> Library {
        Library::open(tmp.path().to_str().unwrap()).await.unwrap()
    }

    fn sample_comic(slug: u64) -> Comic {
        Comic {
            slug,
            title: format!("Comic {slug}"),
            author: vec!["someone".into()],
            artists: vec![],
            groups: vec![],
            parodies: vec![],
            characters: vec![],
            categories: vec![],
            tags: vec!["action".into()],
            status: "ongoing".into(),
            uploaded: "2024-01-01 00:00:00".into(),
            cover: format!("/comics/{slug}/cover.jpg"),
            chapters: vec![Chapter {
                number: "1".into(),
                title: "First".into(),
                language: "en".into(),
                upload_chapter: "2024-01-01 00:00:00".into(),
                pages: vec![Page {
                    id: "a".into(),
                    filename: "page1.jpg".into(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        let comics = vec![sample_comic(1), sample_comic(2)];
        library.save(&comics).await.unwrap();
        assert_eq!(library.load().await.unwrap(), comics);
        // no temp file left behind by the atomic write
        assert!(!tmp.path().join("comics.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_store_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        assert!(library.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_comic_cascades_to_files() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        library.save(&[sample_comic(5)]).await.unwrap();
        let chapter_dir = library.chapter_dir(5, "1").unwrap();
        fs::create_dir_all(&chapter_dir).await.unwrap();
        fs::write(chapter_dir.join("page1.jpg"), b"x").await.unwrap();

        library.delete_comic(5).await.unwrap();
        assert!(library.load().await.unwrap().is_empty());
        assert!(!library.comic_dir(5).exists());

        let err = library.delete_comic(5).await.unwrap_err();
        assert!(matches!(err, StorageError::ComicNotFound(5)));
    }

    #[tokio::test]
    async fn delete_chapter_cascades_to_files() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        library.save(&[sample_comic(5)]).await.unwrap();
        let chapter_dir = library.chapter_dir(5, "1").unwrap();
        fs::create_dir_all(&chapter_dir).await.unwrap();
        fs::write(chapter_dir.join("page1.jpg"), b"x").await.unwrap();

        library.delete_chapter(5, "1").await.unwrap();
        let comics = library.load().await.unwrap();
        assert!(comics[0].chapters.is_empty());
        assert!(!chapter_dir.exists());

        let err = library.delete_chapter(5, "1").await.unwrap_err();
        assert!(matches!(err, StorageError::ChapterNotFound(_)));
    }

    #[tokio::test]
    async fn open_recovers_interrupted_reorder() {
        let tmp = TempDir::new().unwrap();
        let chapter_dir = tmp.path().join("comics").join("5").join("chapters").join("1");
        fs::create_dir_all(&chapter_dir).await.unwrap();
        fs::write(chapter_dir.join("page1.jpg"), b"keep").await.unwrap();
        fs::write(chapter_dir.join(".reorder-tmp-0.jpg"), b"stale")
            .await
            .unwrap();
        fs::write(chapter_dir.join(".reorder.journal"), b"reorder in progress\n")
            .await
            .unwrap();

        open_library(&tmp).await;
        assert!(chapter_dir.join("page1.jpg").exists());
        assert!(!chapter_dir.join(".reorder-tmp-0.jpg").exists());
        assert!(!chapter_dir.join(".reorder.journal").exists());
    }

    #[tokio::test]
    async fn list_pages_sorts_numerically_and_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        let dir = library.chapter_dir(3, "2").unwrap();
        fs::create_dir_all(&dir).await.unwrap();
        for name in ["page10.jpg", "page2.png", "page1.jpg", "notes.txt", "page.jpg"] {
            fs::write(dir.join(name), b"x").await.unwrap();
        }
        assert_eq!(
            library.list_pages(3, "2").await.unwrap(),
            vec!["page1.jpg", "page2.png", "page10.jpg"]
        );
        // unknown chapter reads as empty, not an error
        assert!(library.list_pages(3, "9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chapter_dir_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        for number in ["..", "a/b", "", "a\\b"] {
            let err = library.chapter_dir(1, number).unwrap_err();
            assert!(matches!(err, StorageError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn staged_upload_lands_in_staging_area() {
        let tmp = TempDir::new().unwrap();
        let library = open_library(&tmp).await;
        let staged = library.stage_upload("scan.png", b"bytes").await.unwrap();
        assert_eq!(staged.original_name, "scan.png");
        assert!(staged.path.starts_with(library.staging_dir()));
        assert_eq!(fs::read(&staged.path).await.unwrap(), b"bytes".to_vec());
    }
}
