use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::converters::ConverterDispatch;
use crate::error::ConvertError;
use crate::registry::{extension_of, CategoryRegistry, FileCategory};
use crate::session::{SessionState, SessionStore, StagedFile};
use crate::transport::{BotCommand, ChatTransport, InboundEvent, SourceHandle};

/// Drives the end-to-end flow: validate → stage → await selection → acquire
/// temp storage → convert → emit result → release temp storage.
///
/// Per-session event handling is serialized through the store's keyed lock;
/// the lock is never held across a conversion await, so a new upload can
/// re-stage the session while a conversion is in flight. The superseded
/// conversion detects this through its generation stamp and drops its result.
pub struct Orchestrator {
    dispatch: ConverterDispatch,
    store: SessionStore,
    transport: Arc<dyn ChatTransport>,
    config: Config,
    workers: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(dispatch: ConverterDispatch, transport: Arc<dyn ChatTransport>, config: Config) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_conversions));
        Self {
            dispatch,
            store: SessionStore::new(),
            transport,
            config,
            workers,
        }
    }

    /// Current staged file for a session, if any.
    pub fn staged_file(&self, session_key: &str) -> Option<StagedFile> {
        self.store.get(session_key)
    }

    /// Routes one inbound event. Validation and conversion errors are
    /// reported back through the transport; nothing here is process-fatal.
    pub async fn handle_event(&self, event: InboundEvent) {
        let session_key = event.session_key().to_string();
        let result = match event {
            InboundEvent::Command { command, .. } => self.on_command(&session_key, command).await,
            InboundEvent::FileUpload {
                file_name,
                size_bytes,
                source,
                ..
            } => self.on_upload(&session_key, file_name, size_bytes, source).await,
            InboundEvent::FormatSelection { target_ext, .. } => {
                self.on_selection(&session_key, &target_ext).await
            }
        };

        if let Err(e) = result {
            match &e {
                ConvertError::TransportIo(_) | ConvertError::Resource(_) => {
                    error!(session = %session_key, error = %e, "pipeline task failed");
                }
                other => info!(session = %session_key, error = %other, "event rejected"),
            }
            if let Err(send_err) = self.transport.send_text(&session_key, &e.user_message()).await {
                error!(session = %session_key, error = %send_err, "failed to deliver error notice");
            }
        }
    }

    async fn on_command(&self, session_key: &str, command: BotCommand) -> Result<(), ConvertError> {
        let body = match command {
            BotCommand::Start => welcome_text(),
            BotCommand::Help => help_text(),
            BotCommand::Formats => formats_text(),
        };
        self.transport
            .send_text(session_key, &body)
            .await
            .map_err(|e| ConvertError::TransportIo(e.to_string()))
    }

    /// Upload accepted → `Staged` and the target options are offered.
    /// Otherwise the session stays idle and one of three distinct
    /// diagnostics is emitted (oversize, unknown type, no options).
    async fn on_upload(
        &self,
        session_key: &str,
        file_name: Option<String>,
        size_bytes: u64,
        source: SourceHandle,
    ) -> Result<(), ConvertError> {
        let _guard = self.store.lock(session_key).await;

        let file_name = sanitized_file_name(file_name, &source);

        if size_bytes > self.config.max_file_size {
            return Err(ConvertError::FileTooLarge {
                size: size_bytes,
                ceiling: self.config.max_file_size,
            });
        }

        let extension = extension_of(&file_name).unwrap_or_default();
        let category = CategoryRegistry::category_of(&extension)
            .ok_or_else(|| ConvertError::UnsupportedFileType(extension.clone()))?;

        let options = CategoryRegistry::target_options(category, &extension);
        if options.is_empty() {
            return Err(ConvertError::NoTargetOptions(extension));
        }

        let staged = self
            .store
            .stage(session_key, source, file_name, size_bytes, category);
        info!(
            session = %session_key,
            file = %staged.file_name,
            category = category.name(),
            generation = staged.generation,
            "file staged"
        );

        let prompt = upload_prompt(&staged.file_name, category, size_bytes);
        self.transport
            .offer_choices(session_key, &prompt, &options)
            .await
            .map_err(|e| ConvertError::TransportIo(e.to_string()))
    }

    /// Valid selection → `Converting`; any other outcome leaves the staged
    /// file untouched and reports why.
    async fn on_selection(&self, session_key: &str, target_ext: &str) -> Result<(), ConvertError> {
        let target = target_ext.to_lowercase();

        let guard = self.store.lock(session_key).await;

        let Some(staged) = self.store.get(session_key) else {
            drop(guard);
            return self
                .transport
                .send_text(session_key, "❌ No file to convert. Please upload a file first.")
                .await
                .map_err(|e| ConvertError::TransportIo(e.to_string()));
        };

        if staged.state == SessionState::Converting {
            drop(guard);
            return self
                .transport
                .send_text(session_key, "🔄 A conversion is already in progress.")
                .await
                .map_err(|e| ConvertError::TransportIo(e.to_string()));
        }

        let current_ext = extension_of(&staged.file_name).unwrap_or_default();
        let options = CategoryRegistry::target_options(staged.category, &current_ext);
        if !options.contains(&target) {
            return Err(ConvertError::InvalidSelection(target));
        }

        let generation = staged.generation;
        self.store.mark_converting(session_key, generation);
        drop(guard);

        if let Err(e) = self
            .transport
            .send_text(session_key, "🔄 Converting file, please wait...")
            .await
        {
            warn!(session = %session_key, error = %e, "failed to send progress notice");
        }

        let result = self.run_conversion(&staged, &target).await;

        // Delivery happens under the key lock, and only if the session was
        // not superseded while the conversion ran.
        let _guard = self.store.lock(session_key).await;
        if !self.store.is_current(session_key, generation) {
            info!(
                session = %session_key,
                generation,
                "conversion superseded by a newer upload; dropping result"
            );
            return Ok(());
        }

        let terminal = match result {
            Ok((file_name, bytes)) => {
                info!(
                    session = %session_key,
                    file = %file_name,
                    bytes = bytes.len(),
                    "conversion succeeded"
                );
                let caption = format!("✅ Converted to {}", target.to_uppercase());
                match self
                    .transport
                    .send_document(session_key, &file_name, bytes, &caption)
                    .await
                {
                    Ok(()) => self
                        .transport
                        .send_text(session_key, "✅ Conversion completed successfully!")
                        .await
                        .map_err(|e| ConvertError::TransportIo(e.to_string())),
                    Err(e) => Err(ConvertError::TransportIo(e.to_string())),
                }
            }
            Err(e) => Err(e),
        };

        self.store.clear_if_current(session_key, generation);

        if let Err(e) = terminal {
            error!(session = %session_key, error = %e, "conversion pipeline failed");
            self.transport
                .send_text(session_key, &e.user_message())
                .await
                .map_err(|e| ConvertError::TransportIo(e.to_string()))?;
        }
        Ok(())
    }

    /// Materializes the staged source into scoped temp storage, invokes the
    /// matching converter on the bounded worker pool, and verifies the
    /// output. The temp directory is released on every exit path.
    ///
    /// The converter's success flag is a hint; the authoritative success
    /// signal is the presence of the output file on disk.
    async fn run_conversion(
        &self,
        staged: &StagedFile,
        target: &str,
    ) -> Result<(String, Vec<u8>), ConvertError> {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConvertError::Resource(io::Error::other("worker pool closed")))?;

        let temp = tempfile::tempdir().map_err(ConvertError::Resource)?;

        let bytes = self
            .transport
            .fetch_file(&staged.source)
            .await
            .map_err(|e| ConvertError::TransportIo(e.to_string()))?;

        let input_path = temp.path().join(&staged.file_name);
        tokio::fs::write(&input_path, &bytes)
            .await
            .map_err(ConvertError::Resource)?;

        let stem = Path::new(&staged.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| staged.file_name.clone());
        let output_name = format!("{stem}.{target}");
        let output_path = temp.path().join(&output_name);

        let conversion = self
            .dispatch
            .convert(staged.category, &input_path, &output_path, target);
        let outcome = match timeout(self.config.convert_timeout, conversion).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    session = %staged.session_key,
                    timeout_secs = self.config.convert_timeout.as_secs(),
                    "conversion timed out; abandoning worker"
                );
                return Err(ConvertError::ConversionFailure {
                    category: staged.category.name(),
                    cause: "conversion timed out".to_string(),
                });
            }
        };

        if outcome.success && tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            let output = tokio::fs::read(&output_path)
                .await
                .map_err(ConvertError::Resource)?;
            Ok((output_name, output))
        } else {
            Err(ConvertError::ConversionFailure {
                category: staged.category.name(),
                cause: if outcome.diagnostic.is_empty() {
                    "converter reported success but produced no output".to_string()
                } else {
                    outcome.diagnostic
                },
            })
        }
        // temp dir dropped here, success or not
    }
}

/// Keeps only the final path component and synthesizes a name for
/// photo-style uploads that arrive without one.
fn sanitized_file_name(file_name: Option<String>, source: &SourceHandle) -> String {
    match file_name {
        Some(name) => Path::new(&name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone()),
        None => {
            let id: String = source
                .0
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(16)
                .collect();
            format!("image_{id}.jpg")
        }
    }
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn upload_prompt(file_name: &str, category: FileCategory, size_bytes: u64) -> String {
    format!(
        "📁 File received: {file_name}\n🔸 Type: {}\n📊 Size: {:.1} KB\n\nChoose conversion format:",
        title_case(category.name()),
        size_bytes as f64 / 1024.0
    )
}

fn welcome_text() -> String {
    "🤖 Welcome to File Converter Bot!\n\n\
     Send me files and I'll help you convert them to different formats.\n\
     Use /help to see available commands.\n\
     Use /formats to see supported file types."
        .to_string()
}

fn help_text() -> String {
    "📋 Available Commands:\n\n\
     /start - Start the bot\n\
     /help - Show this help message\n\
     /formats - Show supported file formats\n\n\
     📁 How to use:\n\
     1. Send me a file\n\
     2. Choose the target format from the buttons\n\
     3. Wait for conversion to complete\n\
     4. Download your converted file!\n\n\
     Supported conversions: Images, Documents, Videos, Data files"
        .to_string()
}

fn formats_text() -> String {
    let mut body = String::from("📋 Supported File Formats:\n\n");
    for category in FileCategory::ALL {
        let dotted = |exts: &[&str]| {
            exts.iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        body.push_str(&format!(
            "🔸 {}:\n   From: {}\n   To: {}\n\n",
            title_case(category.name()),
            dotted(category.accepted_extensions()),
            dotted(category.producible_extensions()),
        ));
    }
    body
}
