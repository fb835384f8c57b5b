use std::path::Path;

/// The four disjoint conversion domains. An extension that matches none of
/// their accepted sets has no category (`CategoryRegistry::category_of`
/// returns `None`) and the file is rejected as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Image,
    Document,
    Tabular,
    Media,
}

impl FileCategory {
    pub const ALL: [FileCategory; 4] = [
        FileCategory::Image,
        FileCategory::Document,
        FileCategory::Tabular,
        FileCategory::Media,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Tabular => "data",
            FileCategory::Media => "video",
        }
    }

    /// Extensions this category accepts as conversion sources
    pub fn accepted_extensions(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp"],
            FileCategory::Document => &["pdf", "docx", "txt"],
            FileCategory::Tabular => &["csv", "xlsx", "json"],
            FileCategory::Media => &["mp4", "avi", "mov", "mkv", "webm"],
        }
    }

    /// Extensions this category's converter can emit, in offer order
    pub fn producible_extensions(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => &["jpg", "png", "pdf", "webp"],
            FileCategory::Document => &["pdf", "txt", "docx"],
            FileCategory::Tabular => &["csv", "xlsx", "json"],
            FileCategory::Media => &["mp4", "gif", "mp3"],
        }
    }
}

/// Pure lookup over the immutable category tables. No side effects.
pub struct CategoryRegistry;

impl CategoryRegistry {
    /// Case-insensitive extension match against the built-in tables.
    pub fn category_of(extension: &str) -> Option<FileCategory> {
        let ext = extension.to_lowercase();
        FileCategory::ALL
            .into_iter()
            .find(|category| category.accepted_extensions().contains(&ext.as_str()))
    }

    /// The category's producible extensions minus the file's current
    /// extension, in table order. Empty is a valid outcome and means the
    /// file has nothing to be converted to.
    pub fn target_options(category: FileCategory, current_extension: &str) -> Vec<String> {
        let current = current_extension.to_lowercase();
        category
            .producible_extensions()
            .iter()
            .filter(|ext| **ext != current)
            .map(|ext| ext.to_string())
            .collect()
    }
}

/// Lowercased extension of a file name, without the leading dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
