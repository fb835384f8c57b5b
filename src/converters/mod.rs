use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::BytesRef;

use crate::registry::FileCategory;

pub mod document;
pub mod image;
pub mod media;
pub mod tabular;

pub use self::document::DocumentConverter;
pub use self::image::ImageConverter;
pub use self::media::MediaConverter;
pub use self::tabular::TabularConverter;

/// Result of one converter invocation.
///
/// `success` is a hint, not the authoritative signal: on failure the output
/// path is not guaranteed to be absent, and on success the orchestrator still
/// verifies that the output file exists on disk before delivering it.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub success: bool,
    pub diagnostic: String,
}

impl ConversionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            diagnostic: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Uniform per-category conversion contract.
///
/// Implementations write exactly one file at `output` on success. Internal
/// errors propagate as `anyhow::Error` and are normalized to a failed
/// `ConversionOutcome` by `ConverterDispatch`; nothing escapes that boundary.
#[async_trait]
pub trait Converter: Send + Sync {
    fn category(&self) -> FileCategory;

    async fn run(&self, input: &Path, output: &Path, target_ext: &str) -> Result<()>;
}

/// Polymorphic executor: one converter per category.
pub struct ConverterDispatch {
    converters: HashMap<FileCategory, Box<dyn Converter>>,
}

impl ConverterDispatch {
    pub fn new() -> Self {
        let mut dispatch = Self {
            converters: HashMap::new(),
        };
        dispatch.register(Box::new(ImageConverter));
        dispatch.register(Box::new(DocumentConverter));
        dispatch.register(Box::new(TabularConverter));
        dispatch.register(Box::new(MediaConverter));
        dispatch
    }

    /// Replaces the converter registered for the given category.
    pub fn register(&mut self, converter: Box<dyn Converter>) {
        self.converters.insert(converter.category(), converter);
    }

    /// Runs the matching converter, collapsing every internal fault to a
    /// failed outcome with a diagnostic string.
    pub async fn convert(
        &self,
        category: FileCategory,
        input: &Path,
        output: &Path,
        target_ext: &str,
    ) -> ConversionOutcome {
        let Some(converter) = self.converters.get(&category) else {
            return ConversionOutcome::failed(format!(
                "no converter registered for category {}",
                category.name()
            ));
        };

        match converter.run(input, output, target_ext).await {
            Ok(()) => ConversionOutcome::ok(),
            Err(e) => {
                tracing::error!(
                    category = category.name(),
                    target = target_ext,
                    error = %e,
                    "conversion failed"
                );
                ConversionOutcome::failed(e.to_string())
            }
        }
    }
}

impl Default for ConverterDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a general entity reference from an OOXML part. The reader emits
/// these as separate events, so text handlers must append them explicitly or
/// escaped characters are lost from extracted values.
pub(crate) fn resolve_entity(reference: &BytesRef) -> Result<String> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .context("invalid character reference")?
    {
        return Ok(ch.to_string());
    }
    let name = reference.decode().context("malformed entity reference")?;
    let resolved = match name.as_ref() {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "apos" => "'",
        "quot" => "\"",
        other => bail!("unsupported entity reference: &{other};"),
    };
    Ok(resolved.to_string())
}
