/// Broad file categories used by the `FileTypeIs` condition.
///
/// Files are categorized by sniffing their leading bytes with `infer` and
/// falling back to the extension table when the content is not recognized.
///
/// # Examples
///
/// ```
/// use ruletidy::file_category::{Category, FileMapper};
///
/// let mapper = FileMapper::default();
/// assert_eq!(mapper.mime_to_category("image/png"), Some(Category::Image));
/// assert_eq!(mapper.categorize(None, Some("xlsx")), Category::Spreadsheet);
/// ```
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Number of leading bytes read for content sniffing.
const SNIFF_BYTES: u64 = 8192;

/// Represents a broad file category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Audio,
    Video,
    Document,
    Archive,
    Code,
    Spreadsheet,
    Presentation,
    Font,
    Other,
}

impl Category {
    /// Lower-case name used in rule documents and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Document => "document",
            Category::Archive => "archive",
            Category::Code => "code",
            Category::Spreadsheet => "spreadsheet",
            Category::Presentation => "presentation",
            Category::Font => "font",
            Category::Other => "other",
        }
    }
}

const MIME_TABLE: &[(&str, Category)] = &[
    ("image/png", Category::Image),
    ("image/jpeg", Category::Image),
    ("image/gif", Category::Image),
    ("image/webp", Category::Image),
    ("image/bmp", Category::Image),
    ("image/tiff", Category::Image),
    ("image/heif", Category::Image),
    ("image/svg+xml", Category::Image),
    ("audio/mpeg", Category::Audio),
    ("audio/x-wav", Category::Audio),
    ("audio/ogg", Category::Audio),
    ("audio/x-flac", Category::Audio),
    ("audio/aac", Category::Audio),
    ("audio/m4a", Category::Audio),
    ("video/mp4", Category::Video),
    ("video/quicktime", Category::Video),
    ("video/x-msvideo", Category::Video),
    ("video/x-matroska", Category::Video),
    ("video/webm", Category::Video),
    ("video/x-flv", Category::Video),
    ("application/pdf", Category::Document),
    ("application/rtf", Category::Document),
    ("application/msword", Category::Document),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Category::Document,
    ),
    ("application/vnd.oasis.opendocument.text", Category::Document),
    ("application/zip", Category::Archive),
    ("application/vnd.rar", Category::Archive),
    ("application/x-7z-compressed", Category::Archive),
    ("application/x-tar", Category::Archive),
    ("application/gzip", Category::Archive),
    ("application/x-bzip2", Category::Archive),
    ("application/x-xz", Category::Archive),
    ("application/vnd.ms-excel", Category::Spreadsheet),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Category::Spreadsheet,
    ),
    ("application/vnd.oasis.opendocument.spreadsheet", Category::Spreadsheet),
    ("application/vnd.ms-powerpoint", Category::Presentation),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        Category::Presentation,
    ),
    ("application/vnd.oasis.opendocument.presentation", Category::Presentation),
    ("font/ttf", Category::Font),
    ("font/otf", Category::Font),
    ("font/woff", Category::Font),
    ("font/woff2", Category::Font),
];

const EXTENSION_TABLE: &[(&str, Category)] = &[
    ("png", Category::Image),
    ("jpg", Category::Image),
    ("jpeg", Category::Image),
    ("gif", Category::Image),
    ("webp", Category::Image),
    ("svg", Category::Image),
    ("bmp", Category::Image),
    ("tiff", Category::Image),
    ("ico", Category::Image),
    ("heic", Category::Image),
    ("mp3", Category::Audio),
    ("wav", Category::Audio),
    ("ogg", Category::Audio),
    ("flac", Category::Audio),
    ("aac", Category::Audio),
    ("m4a", Category::Audio),
    ("mp4", Category::Video),
    ("mkv", Category::Video),
    ("avi", Category::Video),
    ("mov", Category::Video),
    ("webm", Category::Video),
    ("pdf", Category::Document),
    ("txt", Category::Document),
    ("doc", Category::Document),
    ("docx", Category::Document),
    ("md", Category::Document),
    ("rtf", Category::Document),
    ("odt", Category::Document),
    ("html", Category::Document),
    ("zip", Category::Archive),
    ("rar", Category::Archive),
    ("7z", Category::Archive),
    ("tar", Category::Archive),
    ("gz", Category::Archive),
    ("tgz", Category::Archive),
    ("bz2", Category::Archive),
    ("xz", Category::Archive),
    ("rs", Category::Code),
    ("py", Category::Code),
    ("js", Category::Code),
    ("ts", Category::Code),
    ("c", Category::Code),
    ("cpp", Category::Code),
    ("h", Category::Code),
    ("go", Category::Code),
    ("java", Category::Code),
    ("sh", Category::Code),
    ("json", Category::Code),
    ("toml", Category::Code),
    ("yaml", Category::Code),
    ("yml", Category::Code),
    ("xml", Category::Code),
    ("csv", Category::Spreadsheet),
    ("xls", Category::Spreadsheet),
    ("xlsx", Category::Spreadsheet),
    ("ods", Category::Spreadsheet),
    ("ppt", Category::Presentation),
    ("pptx", Category::Presentation),
    ("odp", Category::Presentation),
    ("ttf", Category::Font),
    ("otf", Category::Font),
    ("woff", Category::Font),
    ("woff2", Category::Font),
];

/// Maps MIME types and file extensions to categories.
#[derive(Debug, Clone)]
pub struct FileMapper {
    mime_map: HashMap<String, Category>,
    extension_map: HashMap<String, Category>,
}

impl FileMapper {
    /// Creates a mapper populated with the standard tables.
    pub fn new() -> Self {
        let mut mapper = Self {
            mime_map: HashMap::new(),
            extension_map: HashMap::new(),
        };
        for (mime, category) in MIME_TABLE {
            mapper.add_mime_mapping(mime, *category);
        }
        for (ext, category) in EXTENSION_TABLE {
            mapper.add_extension_mapping(ext, *category);
        }
        mapper
    }

    /// Shared mapper with the standard tables.
    pub fn shared() -> &'static FileMapper {
        static MAPPER: OnceLock<FileMapper> = OnceLock::new();
        MAPPER.get_or_init(FileMapper::new)
    }

    /// Adds a MIME type to category mapping.
    pub fn add_mime_mapping(&mut self, mime: &str, category: Category) {
        self.mime_map.insert(mime.to_lowercase(), category);
    }

    /// Adds a file extension (without dot) to category mapping.
    pub fn add_extension_mapping(&mut self, ext: &str, category: Category) {
        self.extension_map
            .insert(ext.trim_start_matches('.').to_lowercase(), category);
    }

    /// Maps a MIME type to a category.
    pub fn mime_to_category(&self, mime_type: &str) -> Option<Category> {
        self.mime_map.get(&mime_type.to_lowercase()).copied()
    }

    /// Maps a file extension (with or without dot) to a category.
    pub fn extension_to_category(&self, ext: &str) -> Option<Category> {
        self.extension_map
            .get(&ext.trim_start_matches('.').to_lowercase())
            .copied()
    }

    /// Picks a category from a MIME type first, then the extension, then
    /// `Category::Other`.
    pub fn categorize(&self, mime_type: Option<&str>, ext: Option<&str>) -> Category {
        if let Some(mime) = mime_type
            && let Some(category) = self.mime_to_category(mime)
        {
            return category;
        }

        if let Some(extension) = ext
            && let Some(category) = self.extension_to_category(extension)
        {
            return category;
        }

        Category::Other
    }

    /// Categorizes a file on disk by sniffing its content, falling back to
    /// its extension.
    pub fn categorize_path(&self, path: &Path) -> Category {
        let mime = sniff_mime(path);
        let ext = path.extension().map(|e| e.to_string_lossy().to_string());
        self.categorize(mime, ext.as_deref())
    }
}

impl Default for FileMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Detects a MIME type from the leading bytes of a file.
pub fn sniff_mime(path: &Path) -> Option<&'static str> {
    let mut head = Vec::new();
    File::open(path)
        .and_then(|f| f.take(SNIFF_BYTES).read_to_end(&mut head))
        .ok()?;
    infer::get(&head).map(|kind| kind.mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52,
    ];

    #[test]
    fn test_mime_to_category_case_insensitive() {
        let mapper = FileMapper::default();
        assert_eq!(mapper.mime_to_category("IMAGE/PNG"), Some(Category::Image));
        assert_eq!(mapper.mime_to_category("unknown/type"), None);
    }

    #[test]
    fn test_extension_with_or_without_dot() {
        let mapper = FileMapper::default();
        assert_eq!(mapper.extension_to_category(".PDF"), Some(Category::Document));
        assert_eq!(mapper.extension_to_category("mp3"), Some(Category::Audio));
    }

    #[test]
    fn test_categorize_defaults_to_other() {
        let mapper = FileMapper::default();
        assert_eq!(mapper.categorize(None, None), Category::Other);
        assert_eq!(mapper.categorize(Some("x/y"), Some("xyz")), Category::Other);
    }

    #[test]
    fn test_content_beats_misleading_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("not_really.txt");
        fs::write(&path, PNG_HEADER).expect("Failed to write file");

        assert_eq!(FileMapper::shared().categorize_path(&path), Category::Image);
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&Category::Spreadsheet).expect("Serialize failed");
        assert_eq!(json, "\"spreadsheet\"");
        let back: Category = serde_json::from_str("\"font\"").expect("Deserialize failed");
        assert_eq!(back, Category::Font);
    }
}
