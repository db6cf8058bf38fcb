//! ffmpeg integration: remuxing downloaded streams and fetching manifests
//! ffmpeg understands natively (DASH, or HLS with the ffmpeg engine).

use std::path::{Path, PathBuf};

use process_utils::{CommandOutput, run_with_cancel, tokio_command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{DownloaderConfig, ProtocolAllowList};
use crate::error::DownloadError;

/// ffmpeg muxer name for an output path, from its extension.
pub fn container_format(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("ts") => "mpegts",
        Some("mkv") => "matroska",
        Some("mov") => "mov",
        Some("webm") => "webm",
        _ => "mp4",
    }
}

/// How the streams of the input are carried into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Copy,
    Transcode,
}

#[derive(Debug, Clone)]
pub struct Muxer {
    ffmpeg: PathBuf,
    allowed: ProtocolAllowList,
    user_agent: String,
    header_lines: Vec<String>,
    http_proxy: Option<String>,
}

impl Muxer {
    pub fn new(config: &DownloaderConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            allowed: config.allowed_protocols.clone(),
            user_agent: config.user_agent.clone(),
            header_lines: config.header_lines(),
            http_proxy: config.proxy.as_ref().and_then(|p| p.ffmpeg_url()),
        }
    }

    fn base_args(whitelist: String) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-protocol_whitelist".to_string(),
            whitelist,
        ]
    }

    fn output_args(codec: Codec, format: &str, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        match codec {
            Codec::Copy => args.extend(["-c".to_string(), "copy".to_string()]),
            Codec::Transcode => args.extend(
                [
                    "-c:v", "libx264", "-preset", "veryfast", "-crf", "20", "-c:a", "aac",
                    "-b:a", "160k",
                ]
                .map(String::from),
            ),
        }
        if format == "mp4" || format == "mov" {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        args.extend(["-f".to_string(), format.to_string()]);
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Arguments remuxing the local file `input` into `output`.
    pub fn remux_args(&self, input: &Path, output: &Path, format: &str, codec: Codec) -> Vec<String> {
        let mut args = Self::base_args("file".to_string());
        args.extend(["-i".to_string(), input.to_string_lossy().into_owned()]);
        args.extend(Self::output_args(codec, format, output));
        args
    }

    /// Arguments letting ffmpeg download `url` into `output` by stream copy.
    pub fn fetch_args(&self, url: &Url, output: &Path, format: &str) -> Vec<String> {
        let mut args = Self::base_args(self.allowed.ffmpeg_whitelist());
        args.extend(["-user_agent".to_string(), self.user_agent.clone()]);
        if let Some(proxy) = &self.http_proxy {
            args.extend(["-http_proxy".to_string(), proxy.clone()]);
        }
        if !self.header_lines.is_empty() {
            let mut headers = self.header_lines.join("\r\n");
            headers.push_str("\r\n");
            args.extend(["-headers".to_string(), headers]);
        }
        args.extend(["-i".to_string(), url.to_string()]);
        args.extend(Self::output_args(Codec::Copy, format, output));
        args
    }

    async fn run(&self, args: Vec<String>, token: &CancellationToken) -> Result<CommandOutput, DownloadError> {
        let mut cmd = tokio_command(&self.ffmpeg);
        cmd.args(&args);
        debug!(ffmpeg = %self.ffmpeg.display(), ?args, "Running ffmpeg");
        Ok(run_with_cancel(cmd, None, token).await?)
    }

    fn failure(output: &CommandOutput) -> DownloadError {
        DownloadError::Mux {
            reason: format!(
                "ffmpeg exited with code {}: {}",
                output.code(),
                output.last_error_line().unwrap_or("no error output")
            ),
        }
    }

    /// Remux `input` into `output` as `format`, stream copy first and
    /// transcode if that fails.
    pub async fn remux(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
        token: &CancellationToken,
    ) -> Result<Codec, DownloadError> {
        let copy = self
            .run(self.remux_args(input, output, format, Codec::Copy), token)
            .await?;
        if copy.success() {
            return Ok(Codec::Copy);
        }

        warn!(
            input = %input.display(),
            error = copy.last_error_line().unwrap_or_default(),
            "Stream copy failed, falling back to transcode"
        );
        let _ = tokio::fs::remove_file(output).await;

        let transcode = self
            .run(self.remux_args(input, output, format, Codec::Transcode), token)
            .await?;
        if transcode.success() {
            info!(output = %output.display(), "Transcoded stream");
            Ok(Codec::Transcode)
        } else {
            Err(Self::failure(&transcode))
        }
    }

    /// Let ffmpeg fetch a manifest URL directly.
    pub async fn fetch(
        &self,
        url: &Url,
        output: &Path,
        format: &str,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        if !self.allowed.allows(url.scheme()) {
            return Err(DownloadError::UnsupportedProtocol {
                protocol: url.scheme().to_string(),
            });
        }
        let result = self.run(self.fetch_args(url, output, format), token).await?;
        if result.success() {
            Ok(())
        } else {
            Err(Self::failure(&result))
        }
    }
}
