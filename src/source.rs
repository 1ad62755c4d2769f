//! Book model and the text-extraction seam.
//!
//! EPUB (or any richer container) parsing lives behind [`BookSource`]; the
//! core pipeline only ever sees ordered sections plus book metadata. A
//! plain-text implementation ships here so the binary is usable end to end
//! and tests have a real source.

use crate::error::{BookvoxError, Result};
use std::path::Path;

/// Book-level metadata used for embedded tags and cover art.
#[derive(Debug, Clone, PartialEq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub cover_image: Option<Vec<u8>>,
    pub cover_mime_type: Option<String>,
}

impl BookMetadata {
    pub fn untitled() -> Self {
        Self {
            title: "Unknown Title".to_string(),
            author: "Unknown Author".to_string(),
            cover_image: None,
            cover_mime_type: None,
        }
    }
}

/// One ordered section of the book, usually a chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub text: String,
}

/// A fully parsed book: metadata plus ordered sections.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBook {
    pub metadata: BookMetadata,
    pub sections: Vec<Section>,
}

/// Progress callback for parsing: (current_item, total_items, chapter_count).
pub type ParseProgress<'a> = &'a mut dyn FnMut(usize, usize, usize);

/// Trait for extracting text and metadata from a book container.
pub trait BookSource {
    /// Extract metadata only, without walking the full text.
    fn extract_metadata(&self, path: &Path) -> Result<BookMetadata>;

    /// Parse the whole book, reporting per-item progress.
    fn parse(&self, path: &Path, progress: Option<ParseProgress<'_>>) -> Result<ParsedBook>;
}

/// Plain UTF-8 text source.
///
/// Chapters are delimited by lines starting with `# `; text before the
/// first heading becomes an untitled leading section. A first line of the
/// form `Title by Author` is not assumed — metadata defaults to the file
/// stem as title.
pub struct PlainTextSource;

impl PlainTextSource {
    fn metadata_for(path: &Path) -> BookMetadata {
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown Title".to_string());
        BookMetadata {
            title,
            ..BookMetadata::untitled()
        }
    }

    fn read(path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(BookvoxError::InputNotFound {
                path: path.display().to_string(),
            });
        }
        std::fs::read_to_string(path).map_err(|e| BookvoxError::InputParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

impl BookSource for PlainTextSource {
    fn extract_metadata(&self, path: &Path) -> Result<BookMetadata> {
        Self::read(path)?;
        Ok(Self::metadata_for(path))
    }

    fn parse(&self, path: &Path, mut progress: Option<ParseProgress<'_>>) -> Result<ParsedBook> {
        let contents = Self::read(path)?;

        let mut sections: Vec<Section> = Vec::new();
        let mut current_title = String::new();
        let mut current_text = String::new();

        let flush = |sections: &mut Vec<Section>, title: &mut String, text: &mut String| {
            if !text.trim().is_empty() {
                sections.push(Section {
                    title: std::mem::take(title),
                    text: std::mem::take(text),
                });
            } else {
                title.clear();
                text.clear();
            }
        };

        let lines: Vec<&str> = contents.lines().collect();
        let total = lines.len().max(1);
        for (i, line) in lines.iter().enumerate() {
            if let Some(heading) = line.strip_prefix("# ") {
                flush(&mut sections, &mut current_title, &mut current_text);
                current_title = heading.trim().to_string();
            } else {
                current_text.push_str(line);
                current_text.push('\n');
            }
            if let Some(cb) = progress.as_mut() {
                cb(i + 1, total, sections.len());
            }
        }
        flush(&mut sections, &mut current_title, &mut current_text);

        if sections.is_empty() {
            return Err(BookvoxError::EmptyInput);
        }

        Ok(ParsedBook {
            metadata: Self::metadata_for(path),
            sections,
        })
    }
}

/// Pick a book source for an input path by extension.
///
/// Unknown extensions are treated as plain text; a richer container
/// parser would slot in here.
pub fn source_for(_path: &Path) -> Box<dyn BookSource> {
    Box::new(PlainTextSource)
}

/// Infer a cover MIME type from a file extension, defaulting to JPEG.
pub fn infer_cover_mime_type(cover_path: &Path) -> &'static str {
    match cover_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Explicit title/author/cover overrides from the CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataOverrides {
    pub title: Option<String>,
    pub author: Option<String>,
    pub cover: Option<std::path::PathBuf>,
}

impl MetadataOverrides {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.cover.is_none()
    }

    /// Apply the overrides to parsed metadata. A cover path that does not
    /// exist is an input error, not a silent skip.
    pub fn apply(&self, base: BookMetadata) -> Result<BookMetadata> {
        let mut metadata = base;

        if let Some(title) = &self.title {
            metadata.title = title.clone();
        }
        if let Some(author) = &self.author {
            metadata.author = author.clone();
        }
        if let Some(cover) = &self.cover {
            if !cover.exists() {
                return Err(BookvoxError::CoverNotFound {
                    path: cover.display().to_string(),
                });
            }
            metadata.cover_image = Some(std::fs::read(cover)?);
            metadata.cover_mime_type = Some(infer_cover_mime_type(cover).to_string());
        }

        Ok(metadata)
    }
}
