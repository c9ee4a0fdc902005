//! Per-job download options and request validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Malformed client input; nothing is created when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid format string")]
    InvalidFormat,
    #[error("invalid value for option `{0}`")]
    InvalidOption(&'static str),
    #[error("unknown job status `{0}`")]
    InvalidStatus(String),
    #[error("{0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    #[serde(rename = "MP4")]
    Mp4,
    #[serde(rename = "WebM")]
    WebM,
    #[serde(rename = "MKV")]
    Mkv,
    #[serde(rename = "MOV")]
    Mov,
}

impl Container {
    pub fn as_arg(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::WebM => "webm",
            Container::Mkv => "mkv",
            Container::Mov => "mov",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionCap {
    Auto,
    #[serde(rename = "2160p")]
    P2160,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
}

impl ResolutionCap {
    pub fn max_height(self) -> Option<u32> {
        match self {
            ResolutionCap::Auto => None,
            ResolutionCap::P2160 => Some(2160),
            ResolutionCap::P1440 => Some(1440),
            ResolutionCap::P1080 => Some(1080),
            ResolutionCap::P720 => Some(720),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Original,
    #[serde(rename = "MP3")]
    Mp3,
    #[serde(rename = "AAC")]
    Aac,
    #[serde(rename = "FLAC")]
    Flac,
    #[serde(rename = "OPUS")]
    Opus,
}

impl AudioFormat {
    /// Extractor `--audio-format` value; `None` keeps the source audio.
    pub fn as_arg(self) -> Option<&'static str> {
        match self {
            AudioFormat::Original => None,
            AudioFormat::Mp3 => Some("mp3"),
            AudioFormat::Aac => Some("aac"),
            AudioFormat::Flac => Some("flac"),
            AudioFormat::Opus => Some("opus"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "2160")]
    Q2160,
    #[serde(rename = "1440")]
    Q1440,
    #[serde(rename = "1080")]
    Q1080,
    #[serde(rename = "720")]
    Q720,
    #[serde(rename = "audio")]
    Audio,
}

impl Quality {
    pub fn max_height(self) -> Option<u32> {
        match self {
            Quality::Q2160 => Some(2160),
            Quality::Q1440 => Some(1440),
            Quality::Q1080 => Some(1080),
            Quality::Q720 => Some(720),
            Quality::Best | Quality::Audio => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Any,
    Mp4,
    Webm,
    Mkv,
    Mov,
    Mp3,
    M4a,
    Aac,
    Opus,
    Flac,
}

impl OutputFormat {
    pub fn as_arg(self) -> &'static str {
        match self {
            OutputFormat::Any => "any",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
            OutputFormat::Aac => "aac",
            OutputFormat::Opus => "opus",
            OutputFormat::Flac => "flac",
        }
    }

    pub fn is_video_container(self) -> bool {
        matches!(
            self,
            OutputFormat::Mp4 | OutputFormat::Webm | OutputFormat::Mkv | OutputFormat::Mov
        )
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            OutputFormat::Mp3
                | OutputFormat::M4a
                | OutputFormat::Aac
                | OutputFormat::Opus
                | OutputFormat::Flac
        )
    }
}

/// Client-supplied options of a download request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_cap: Option<ResolutionCap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_start: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_quality: Option<f64>,
    pub sponsor_block: bool,
    pub subtitles: bool,
    pub split_chapters: bool,
    pub embed_metadata: bool,
    pub embed_thumbnail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
    pub fps60: bool,
    pub hdr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

fn single_line(value: &str) -> bool {
    !value.contains(['\r', '\n'])
}

fn check_text(
    value: Option<&str>,
    max: usize,
    field: &'static str,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.chars().count() > max || !single_line(v) => {
            Err(ValidationError::InvalidOption(field))
        }
        _ => Ok(()),
    }
}

/// `123`, `1.5M`, `800k`; empty means "no limit".
fn is_rate_limit(value: &str) -> bool {
    let digits = value
        .strip_suffix(['K', 'M', 'G', 'k', 'm', 'g'])
        .unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

impl DownloadOptions {
    /// Reject values that are out of range or could smuggle extra arguments.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(folder) = &self.download_folder {
            if folder.chars().count() > 120
                || !single_line(folder)
                || folder.contains(':')
                || folder.contains("..")
            {
                return Err(ValidationError::InvalidOption("downloadFolder"));
            }
        }
        check_text(self.custom_name_prefix.as_deref(), 80, "customNamePrefix")?;
        check_text(self.chapter_template.as_deref(), 300, "chapterTemplate")?;
        check_text(self.proxy.as_deref(), 200, "proxy")?;
        check_text(self.user_agent.as_deref(), 200, "userAgent")?;

        if matches!(self.items_limit, Some(n) if n > 500) {
            return Err(ValidationError::InvalidOption("itemsLimit"));
        }
        if let Some(q) = self.audio_quality {
            if !(0.0..=10.0).contains(&q) {
                return Err(ValidationError::InvalidOption("audioQuality"));
            }
        }
        if let Some(rate) = self.rate_limit.as_deref() {
            if !rate.is_empty() && (rate.len() > 20 || !is_rate_limit(rate)) {
                return Err(ValidationError::InvalidOption("rateLimit"));
            }
        }
        if let Some(referrer) = self.referrer.as_deref() {
            if !referrer.is_empty() && (referrer.len() > 200 || Url::parse(referrer).is_err()) {
                return Err(ValidationError::InvalidOption("referrer"));
            }
        }
        Ok(())
    }
}

/// Extractor format selectors: bounded length, no whitespace or shell metacharacters.
pub fn validate_format(format: &str) -> Result<(), ValidationError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "_+-[]*/=.,:<>|".contains(c);
    if format.is_empty() || format.len() > 200 || !format.chars().all(allowed) {
        return Err(ValidationError::InvalidFormat);
    }
    Ok(())
}
