use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Comic {
    pub slug: u64,
    pub title: String,
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub parodies: Vec<String>,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub uploaded: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl Comic {
    pub fn chapter_mut(&mut self, number: &str) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.number == number)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub number: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub language: String,
    #[serde(rename = "uploadChapter", default)]
    pub upload_chapter: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// Page descriptor: stable opaque id plus the file's current on-disk name.
/// The position in `Chapter::pages` is the reading order, and after every
/// mutation `pages[i].filename` carries the numeric suffix `i + 1`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Page {
    pub id: String,
    pub filename: String,
}

pub const PAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Parses `page<digits>.<ext>` (case-insensitive) and returns the rank.
pub fn parse_page_rank(filename: &str) -> Option<u32> {
    let lower = filename.to_ascii_lowercase();
    let rest = lower.strip_prefix("page")?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !PAGE_EXTENSIONS.contains(&ext) {
        return None;
    }
    digits.parse().ok()
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_filenames() {
        assert_eq!(parse_page_rank("page1.jpg"), Some(1));
        assert_eq!(parse_page_rank("page42.webp"), Some(42));
        assert_eq!(parse_page_rank("Page3.PNG"), Some(3));
        assert_eq!(parse_page_rank("page.jpg"), None);
        assert_eq!(parse_page_rank("page1.txt"), None);
        assert_eq!(parse_page_rank("cover.jpg"), None);
        assert_eq!(parse_page_rank("page1"), None);
        assert_eq!(parse_page_rank("page1a.jpg"), None);
    }

    #[test]
    fn chapter_timestamp_field_keeps_wire_name() {
        let chapter = Chapter {
            number: "1".into(),
            title: "First".into(),
            language: "en".into(),
            upload_chapter: "2024-01-01 00:00:00".into(),
            pages: vec![],
        };
        let json = serde_json::to_value(&chapter).unwrap();
        assert_eq!(json["uploadChapter"], "2024-01-01 00:00:00");
    }

    #[test]
    fn comic_deserializes_with_missing_optional_fields() {
        let comic: Comic = serde_json::from_str(r#"{ "slug": 7, "title": "Untitled" }"#).unwrap();
        assert_eq!(comic.slug, 7);
        assert!(comic.chapters.is_empty());
        assert!(comic.tags.is_empty());
        assert_eq!(comic.status, "");
    }
}
