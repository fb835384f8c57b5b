use std::ffi::OsString;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::Converter;
use crate::registry::FileCategory;

/// Animated previews are capped to this many seconds
const PREVIEW_MAX_SECONDS: u32 = 10;
/// Default frame sampling rate for animated previews
const PREVIEW_FPS: u32 = 10;

const AUDIO_TARGETS: &[&str] = &["mp3"];
const ANIMATED_TARGETS: &[&str] = &["gif"];

/// Audiovisual conversions delegate to an ffmpeg child process, with three
/// disjoint paths: audio-track extraction, a time-bounded animated preview,
/// and a full re-encode. The child is always waited on, so the media handle
/// is released on every exit path.
pub struct MediaConverter;

#[async_trait]
impl Converter for MediaConverter {
    fn category(&self) -> FileCategory {
        FileCategory::Media
    }

    async fn run(&self, input: &Path, output: &Path, target_ext: &str) -> Result<()> {
        let args = ffmpeg_args(input, output, &target_ext.to_lowercase());
        let result = Command::new("ffmpeg")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to launch ffmpeg")?;

        if !result.status.success() {
            bail!(
                "ffmpeg exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr)
            );
        }
        Ok(())
    }
}

fn ffmpeg_args(input: &Path, output: &Path, target: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.as_os_str().to_owned()];

    if AUDIO_TARGETS.contains(&target) {
        // discard the video stream, keep only the audio track
        args.push("-vn".into());
    } else if ANIMATED_TARGETS.contains(&target) {
        args.push("-t".into());
        args.push(PREVIEW_MAX_SECONDS.to_string().into());
        args.push("-vf".into());
        args.push(format!("fps={PREVIEW_FPS}").into());
    }

    args.push(output.as_os_str().to_owned());
    args
}
