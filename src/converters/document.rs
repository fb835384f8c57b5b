use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use zip::ZipArchive;

use super::Converter;
use crate::registry::{extension_of, FileCategory};

// US Letter in points
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const PAGE_MARGIN: i64 = 72;
const FONT_SIZE: i64 = 12;
const LINE_LEADING: i64 = 14;

/// Document conversions support a small fixed set of directed pairs, not a
/// full matrix: pdf→txt, docx→txt and txt→pdf. Anything else is unsupported.
pub struct DocumentConverter;

#[async_trait]
impl Converter for DocumentConverter {
    fn category(&self) -> FileCategory {
        FileCategory::Document
    }

    async fn run(&self, input: &Path, output: &Path, target_ext: &str) -> Result<()> {
        let source_ext = input
            .file_name()
            .and_then(|name| extension_of(&name.to_string_lossy()))
            .unwrap_or_default();
        let input = input.to_owned();
        let output = output.to_owned();
        let target = target_ext.to_lowercase();

        tokio::task::spawn_blocking(move || match (source_ext.as_str(), target.as_str()) {
            ("pdf", "txt") => pdf_to_text(&input, &output),
            ("docx", "txt") => docx_to_text(&input, &output),
            ("txt", "pdf") => text_to_pdf(&input, &output),
            (source, target) => {
                bail!("unsupported document conversion: {source} -> {target}")
            }
        })
        .await
        .context("document worker panicked")?
    }
}

/// Concatenates the extracted text of every page, in page order.
fn pdf_to_text(input: &Path, output: &Path) -> Result<()> {
    let doc = Document::load(input).context("failed to load PDF")?;
    let mut text = String::new();
    for (page_number, _) in doc.get_pages() {
        let page_text = doc
            .extract_text(&[page_number])
            .with_context(|| format!("failed to extract text from page {page_number}"))?;
        text.push_str(&page_text);
        if !text.ends_with('\n') {
            text.push('\n');
        }
    }
    fs::write(output, text).context("failed to write text output")?;
    Ok(())
}

/// Pulls paragraph text out of the OOXML body, one line per paragraph.
fn docx_to_text(input: &Path, output: &Path) -> Result<()> {
    let file = File::open(input).context("failed to open docx")?;
    let mut archive = ZipArchive::new(file).context("docx is not a zip container")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("docx has no document body")?
        .read_to_string(&mut xml)
        .context("failed to read document body")?;

    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"w:t" => in_text_run = false,
            Ok(Event::Text(e)) if in_text_run => {
                current.push_str(&e.decode().context("malformed text run")?);
            }
            Ok(Event::GeneralRef(e)) if in_text_run => {
                current.push_str(&super::resolve_entity(&e)?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:p" => {
                paragraphs.push(std::mem::take(&mut current));
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("malformed document body: {e}"),
            _ => {}
        }
        buf.clear();
    }

    fs::write(output, paragraphs.join("\n")).context("failed to write text output")?;
    Ok(())
}

/// Lays the raw text onto a single page from a fixed top-left origin at a
/// fixed font size. No wrapping or pagination across pages; that is a known
/// simplification of this conversion pair.
fn text_to_pdf(input: &Path, output: &Path) -> Result<()> {
    let text = fs::read_to_string(input).context("failed to read source text")?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
        Operation::new("TL", vec![LINE_LEADING.into()]),
        Operation::new(
            "Td",
            vec![PAGE_MARGIN.into(), (PAGE_HEIGHT - PAGE_MARGIN).into()],
        ),
    ];
    for line in text.lines() {
        operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().context("failed to encode page content")?,
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(output).context("failed to write PDF")?;
    Ok(())
}
