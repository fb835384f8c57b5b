use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use file_convert_bot::converters::{Converter, ConverterDispatch};
use file_convert_bot::registry::FileCategory;
use file_convert_bot::transport::{BotCommand, ChatTransport, InboundEvent, SourceHandle};
use file_convert_bot::{Config, Orchestrator};

#[derive(Debug, Clone)]
enum Action {
    Text(String),
    Choices {
        prompt: String,
        options: Vec<String>,
    },
    Document {
        file_name: String,
        bytes: Vec<u8>,
        caption: String,
    },
}

/// Records every outbound action and serves staged bytes by handle.
#[derive(Default)]
struct RecordingTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    actions: Mutex<Vec<Action>>,
}

impl RecordingTransport {
    fn add_file(&self, id: &str, bytes: Vec<u8>) -> SourceHandle {
        self.files.lock().unwrap().insert(id.to_string(), bytes);
        SourceHandle(id.to_string())
    }

    fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Text(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    fn documents(&self) -> Vec<(String, Vec<u8>, String)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Document {
                    file_name,
                    bytes,
                    caption,
                } => Some((file_name, bytes, caption)),
                _ => None,
            })
            .collect()
    }

    fn last_options(&self) -> Option<Vec<String>> {
        self.actions()
            .into_iter()
            .rev()
            .find_map(|a| match a {
                Action::Choices { options, .. } => Some(options),
                _ => None,
            })
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, _session_key: &str, body: &str) -> Result<()> {
        self.actions
            .lock()
            .unwrap()
            .push(Action::Text(body.to_string()));
        Ok(())
    }

    async fn offer_choices(
        &self,
        _session_key: &str,
        prompt: &str,
        options: &[String],
    ) -> Result<()> {
        self.actions.lock().unwrap().push(Action::Choices {
            prompt: prompt.to_string(),
            options: options.to_vec(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        _session_key: &str,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        self.actions.lock().unwrap().push(Action::Document {
            file_name: file_name.to_string(),
            bytes,
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn fetch_file(&self, source: &SourceHandle) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&source.0)
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {}", source.0))
    }
}

fn engine(config: Config) -> (Arc<Orchestrator>, Arc<RecordingTransport>) {
    engine_with(config, ConverterDispatch::new())
}

fn engine_with(
    config: Config,
    dispatch: ConverterDispatch,
) -> (Arc<Orchestrator>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let orchestrator = Arc::new(Orchestrator::new(dispatch, transport.clone(), config));
    (orchestrator, transport)
}

fn upload(key: &str, name: &str, size: u64, source: SourceHandle) -> InboundEvent {
    InboundEvent::FileUpload {
        session_key: key.to_string(),
        file_name: Some(name.to_string()),
        size_bytes: size,
        source,
    }
}

fn select(key: &str, target: &str) -> InboundEvent {
    InboundEvent::FormatSelection {
        session_key: key.to_string(),
        target_ext: target.to_string(),
    }
}

fn rgba_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut img = image::RgbaImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = image::Rgba([200, 30, 60, if (x + y) % 2 == 0 { 0 } else { 255 }]);
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// A converter that sleeps, then writes a marker file. Used to exercise
/// supersession and timeout behavior without real codecs.
struct SlowImageWriter {
    delay: Duration,
}

#[async_trait]
impl Converter for SlowImageWriter {
    fn category(&self) -> FileCategory {
        FileCategory::Image
    }

    async fn run(&self, _input: &Path, output: &Path, _target_ext: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        tokio::fs::write(output, b"slow output").await?;
        Ok(())
    }
}

#[tokio::test]
async fn unsupported_upload_creates_no_session() {
    let (engine, transport) = engine(Config::default());
    let source = transport.add_file("f1", b"PK\x03\x04".to_vec());

    engine.handle_event(upload("u1", "archive.zip", 128, source)).await;

    assert!(engine.staged_file("u1").is_none());
    let texts = transport.texts();
    assert!(texts[0].contains("Unsupported file type"), "{texts:?}");
}

#[tokio::test]
async fn size_ceiling_is_inclusive() {
    let config = Config {
        max_file_size: 1000,
        ..Config::default()
    };
    let (engine, transport) = engine(config);

    let source = transport.add_file("f1", vec![0u8; 8]);
    engine
        .handle_event(upload("exact", "photo.png", 1000, source.clone()))
        .await;
    assert!(engine.staged_file("exact").is_some());

    engine.handle_event(upload("over", "photo.png", 1001, source)).await;
    assert!(engine.staged_file("over").is_none());
    assert!(transport
        .texts()
        .iter()
        .any(|t| t.contains("File too large")));
}

#[tokio::test]
async fn rgba_png_flattens_to_opaque_jpeg_of_same_dimensions() {
    let (engine, transport) = engine(Config::default());
    let png = rgba_png_bytes(12, 8);
    let source = transport.add_file("f1", png.clone());

    engine
        .handle_event(upload("u1", "photo.png", png.len() as u64, source))
        .await;

    // png itself must not be offered
    let options = transport.last_options().unwrap();
    assert_eq!(options, vec!["jpg", "pdf", "webp"]);

    engine.handle_event(select("u1", "jpg")).await;

    let docs = transport.documents();
    assert_eq!(docs.len(), 1);
    let (name, bytes, caption) = &docs[0];
    assert_eq!(name, "photo.jpg");
    assert_eq!(caption, "✅ Converted to JPG");

    let out = image::load_from_memory(bytes).unwrap();
    assert_eq!((out.width(), out.height()), (12, 8));
    assert!(!out.color().has_alpha());

    // terminal success clears the session
    assert!(engine.staged_file("u1").is_none());
}

#[tokio::test]
async fn pdf_text_extraction_returns_the_page_text() {
    let (engine, transport) = engine(Config::default());

    // produce a pdf through the pipeline itself
    let note = b"hello from the conversion engine".to_vec();
    let source = transport.add_file("f1", note);
    engine
        .handle_event(upload("u1", "note.txt", 32, source))
        .await;
    engine.handle_event(select("u1", "pdf")).await;
    let (pdf_name, pdf_bytes, _) = transport.documents().remove(0);
    assert_eq!(pdf_name, "note.pdf");
    assert!(pdf_bytes.starts_with(b"%PDF"));

    // then feed it back for text extraction
    let source = transport.add_file("f2", pdf_bytes.clone());
    engine
        .handle_event(upload("u2", "report.pdf", pdf_bytes.len() as u64, source))
        .await;
    engine.handle_event(select("u2", "txt")).await;

    let (txt_name, txt_bytes, _) = transport.documents().remove(1);
    assert_eq!(txt_name, "report.txt");
    let text = String::from_utf8(txt_bytes).unwrap();
    assert!(text.contains("hello from the conversion engine"), "{text}");
}

#[tokio::test]
async fn csv_converts_to_a_spreadsheet_with_all_rows() {
    let (engine, transport) = engine(Config::default());

    let mut csv = String::from("id,name,score\n");
    for i in 0..100 {
        csv.push_str(&format!("{i},row {i},{}\n", i * 3));
    }
    let source = transport.add_file("f1", csv.clone().into_bytes());
    engine
        .handle_event(upload("u1", "data.csv", csv.len() as u64, source))
        .await;
    assert_eq!(
        transport.last_options().unwrap(),
        vec!["xlsx", "json"]
    );

    engine.handle_event(select("u1", "xlsx")).await;

    let (name, bytes, _) = transport.documents().remove(0);
    assert_eq!(name, "data.xlsx");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.xlsx");
    std::fs::write(&path, bytes).unwrap();
    let table = file_convert_bot::converters::tabular::read_table(&path, "xlsx").unwrap();
    assert_eq!(table.columns, vec!["id", "name", "score"]);
    assert_eq!(table.rows.len(), 100);
    assert_eq!(table.rows[42], vec!["42", "row 42", "126"]);
}

#[tokio::test]
async fn stale_selection_after_a_second_upload_is_rejected() {
    let (engine, transport) = engine(Config::default());

    let png = transport.add_file("f1", rgba_png_bytes(2, 2));
    engine.handle_event(upload("u1", "photo.png", 64, png)).await;

    let csv = transport.add_file("f2", b"a,b\n1,2\n".to_vec());
    engine.handle_event(upload("u1", "data.csv", 8, csv)).await;

    // "jpg" was offered for the photo, not for the csv
    engine.handle_event(select("u1", "jpg")).await;

    assert!(transport
        .texts()
        .iter()
        .any(|t| t.contains("no longer available")));
    let staged = engine.staged_file("u1").unwrap();
    assert_eq!(staged.file_name, "data.csv");
}

#[tokio::test]
async fn selection_without_a_staged_file_is_rejected() {
    let (engine, transport) = engine(Config::default());
    engine.handle_event(select("u1", "jpg")).await;
    assert!(transport
        .texts()
        .iter()
        .any(|t| t.contains("No file to convert")));
}

#[tokio::test]
async fn superseded_conversion_result_is_dropped() {
    let mut dispatch = ConverterDispatch::new();
    dispatch.register(Box::new(SlowImageWriter {
        delay: Duration::from_millis(300),
    }));
    let (engine, transport) = engine_with(Config::default(), dispatch);

    let png = transport.add_file("f1", rgba_png_bytes(2, 2));
    engine.handle_event(upload("u1", "photo.png", 64, png)).await;

    let slow = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.handle_event(select("u1", "jpg")).await })
    };

    // replace the staged file while the conversion is still running
    tokio::time::sleep(Duration::from_millis(50)).await;
    let csv = transport.add_file("f2", b"a,b\n1,2\n".to_vec());
    engine.handle_event(upload("u1", "data.csv", 8, csv)).await;

    slow.await.unwrap();

    // the stale output was dropped, and the newer staged file survived
    assert!(transport.documents().is_empty());
    let staged = engine.staged_file("u1").unwrap();
    assert_eq!(staged.file_name, "data.csv");
}

#[tokio::test]
async fn conversions_exceeding_the_ceiling_fail_the_session() {
    let mut dispatch = ConverterDispatch::new();
    dispatch.register(Box::new(SlowImageWriter {
        delay: Duration::from_millis(500),
    }));
    let config = Config {
        convert_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let (engine, transport) = engine_with(config, dispatch);

    let png = transport.add_file("f1", rgba_png_bytes(2, 2));
    engine.handle_event(upload("u1", "photo.png", 64, png)).await;
    engine.handle_event(select("u1", "jpg")).await;

    assert!(transport.documents().is_empty());
    assert!(transport
        .texts()
        .iter()
        .any(|t| t.contains("Conversion failed")));
    assert!(engine.staged_file("u1").is_none());
}

#[tokio::test]
async fn commands_reply_with_usage_text() {
    let (engine, transport) = engine(Config::default());
    for command in [BotCommand::Start, BotCommand::Help, BotCommand::Formats] {
        engine
            .handle_event(InboundEvent::Command {
                session_key: "u1".to_string(),
                command,
            })
            .await;
    }
    let texts = transport.texts();
    assert!(texts[0].contains("Welcome to File Converter Bot"));
    assert!(texts[1].contains("Available Commands"));
    assert!(texts[2].contains("Supported File Formats"));
}
