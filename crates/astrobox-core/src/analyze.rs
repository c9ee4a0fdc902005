//! Metadata probing: run the extractor in JSON mode and reduce its output to
//! preview items and a stream list.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::config::ExtractorConfig;
use crate::control;
use crate::supervisor::ExtractorCommand;

/// Most streams reported for one analysis.
pub const MAX_STREAMS: usize = 40;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Unable to start extractor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Analyze timed out after {0}ms")]
    Timeout(u128),
    #[error("{0}")]
    Failed(String),
    #[error("Invalid extractor output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Analyze failed.")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration: f64,
    pub views: u64,
    pub date: String,
    pub platform: String,
    pub thumbnail: String,
    pub url: String,
    pub avatar: String,
    pub badge: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStream {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub codec: String,
    pub size: u64,
    pub quality: &'static str,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vbr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    pub items: Vec<MediaItem>,
    /// Streams of the first successfully probed URL.
    pub streams: Vec<MediaStream>,
    pub failed: usize,
}

pub struct Analyzer {
    command: ExtractorCommand,
    timeout: Duration,
    concurrency: usize,
    kill_grace: Duration,
}

impl Analyzer {
    pub fn from_config(cfg: &ExtractorConfig) -> Self {
        Self {
            command: ExtractorCommand::from_config(cfg),
            timeout: Duration::from_millis(cfg.analyze_timeout_ms),
            concurrency: cfg.analyze_concurrency.max(1),
            kill_grace: Duration::from_millis(cfg.kill_grace_ms),
        }
    }

    /// Probe one URL and parse the extractor's JSON document.
    pub async fn probe(&self, url: &str) -> Result<Value, AnalyzeError> {
        let mut child = self
            .command
            .spawn(["-J", "--no-playlist", url])
            .map_err(AnalyzeError::Spawn)?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let run = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (_, _) = tokio::join!(
                async {
                    if let Some(s) = stdout.as_mut() {
                        let _ = s.read_to_end(&mut out).await;
                    }
                },
                async {
                    if let Some(s) = stderr.as_mut() {
                        let _ = s.read_to_end(&mut err).await;
                    }
                }
            );
            let status = child.wait().await;
            (out, err, status)
        };

        let finished = tokio::time::timeout(self.timeout, run).await;
        let (out, err, status) = match finished {
            Ok(done) => done,
            Err(_) => {
                if let Err(e) = control::terminate(&mut child, self.kill_grace).await {
                    tracing::warn!(url, "failed to stop timed-out probe: {e}");
                }
                return Err(AnalyzeError::Timeout(self.timeout.as_millis()));
            }
        };

        let ok = status.as_ref().is_ok_and(|s| s.success());
        if !ok || out.is_empty() {
            let message = String::from_utf8_lossy(&err).trim().to_string();
            return Err(AnalyzeError::Failed(if message.is_empty() {
                "extractor failed".to_string()
            } else {
                message
            }));
        }
        Ok(serde_json::from_slice(&out)?)
    }

    /// Probe `urls` with bounded concurrency, preserving input order.
    ///
    /// Fails only when every probe failed, with the first failure.
    pub async fn analyze(&self, urls: &[String]) -> Result<AnalyzeReport, AnalyzeError> {
        let results: Vec<Result<Value, AnalyzeError>> = stream::iter(urls.iter().map(|url| self.probe(url)).collect::<Vec<_>>())
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut items = Vec::new();
        let mut streams = None;
        let mut first_error = None;
        let mut failed = 0;
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(json) => {
                    if streams.is_none() {
                        streams = Some(extract_streams(&json));
                    }
                    items.push(normalize_item(&json, url));
                }
                Err(e) => {
                    tracing::debug!(url = %url, "probe failed: {e}");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }
        if items.is_empty() {
            return Err(first_error.unwrap_or(AnalyzeError::Empty));
        }
        Ok(AnalyzeReport {
            items,
            streams: streams.unwrap_or_default(),
            failed,
        })
    }
}

fn str_field<'a>(json: &'a Value, key: &str) -> Option<&'a str> {
    json.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn num_field(json: &Value, key: &str) -> Option<f64> {
    json.get(key).and_then(Value::as_f64).filter(|n| *n != 0.0)
}

fn uint_field(json: &Value, key: &str) -> Option<u64> {
    num_field(json, key).map(|n| n.max(0.0) as u64)
}

fn id_field(json: &Value, key: &str) -> String {
    match json.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

fn remote_url(value: Option<&Value>) -> String {
    let Some(s) = value.and_then(Value::as_str).map(str::trim) else {
        return String::new();
    };
    if s.starts_with("//") {
        format!("https:{s}")
    } else {
        s.to_string()
    }
}

/// Direct thumbnail, else the largest-area entry of `thumbnails`.
fn select_thumbnail(json: &Value) -> String {
    let direct = remote_url(json.get("thumbnail"));
    if !direct.is_empty() {
        return direct;
    }
    let Some(thumbs) = json.get("thumbnails").and_then(Value::as_array) else {
        return String::new();
    };
    thumbs
        .iter()
        .filter_map(|t| {
            let url = remote_url(t.get("url"));
            let area = t.get("width").and_then(Value::as_f64).unwrap_or(0.0)
                * t.get("height").and_then(Value::as_f64).unwrap_or(0.0);
            (!url.is_empty()).then_some((url, area))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(url, _)| url)
        .unwrap_or_default()
}

/// `YYYYMMDD` becomes `YYYY-MM-DD`; anything else passes through.
fn format_date(date: &str) -> String {
    if date.len() == 8 && date.is_ascii() {
        format!("{}-{}-{}", &date[..4], &date[4..6], &date[6..])
    } else {
        date.to_string()
    }
}

pub fn normalize_item(json: &Value, fallback_url: &str) -> MediaItem {
    let live = json.get("is_live").and_then(Value::as_bool).unwrap_or(false);
    MediaItem {
        id: id_field(json, "id"),
        title: str_field(json, "title").unwrap_or("Untitled").to_string(),
        uploader: str_field(json, "uploader")
            .or_else(|| str_field(json, "channel"))
            .unwrap_or("Unknown")
            .to_string(),
        duration: num_field(json, "duration").unwrap_or(0.0),
        views: uint_field(json, "view_count").unwrap_or(0),
        date: str_field(json, "upload_date").map(format_date).unwrap_or_default(),
        platform: str_field(json, "extractor_key").unwrap_or("YT-DLP").to_string(),
        thumbnail: select_thumbnail(json),
        url: str_field(json, "webpage_url").unwrap_or(fallback_url).to_string(),
        avatar: str_field(json, "uploader_avatar")
            .or_else(|| str_field(json, "channel_favicon"))
            .unwrap_or_default()
            .to_string(),
        badge: if live { "Live" } else { "Video" }.to_string(),
    }
}

/// Video-only and audio-only formats, at most [`MAX_STREAMS`].
pub fn extract_streams(json: &Value) -> Vec<MediaStream> {
    let Some(formats) = json.get("formats").and_then(Value::as_array) else {
        return Vec::new();
    };
    let codec = |f: &Value, key: &str| str_field(f, key).filter(|c| *c != "none").map(str::to_string);

    formats
        .iter()
        .filter_map(|f| {
            let size = uint_field(f, "filesize")
                .or_else(|| uint_field(f, "filesize_approx"))
                .unwrap_or(0);
            let label = str_field(f, "format_note").map(str::to_string);
            match (codec(f, "vcodec"), codec(f, "acodec")) {
                (Some(vcodec), None) => {
                    let width = uint_field(f, "width");
                    let height = uint_field(f, "height");
                    let h = height.unwrap_or(0);
                    Some(MediaStream {
                        id: id_field(f, "format_id"),
                        kind: StreamKind::Video,
                        label: label.unwrap_or_else(|| match height {
                            Some(h) => format!("{h}p"),
                            None => "Video".to_string(),
                        }),
                        resolution: width.zip(height).map(|(w, h)| format!("{w}x{h}")),
                        width,
                        height,
                        fps: num_field(f, "fps"),
                        codec: vcodec,
                        size,
                        quality: if h >= 2160 {
                            "premium"
                        } else if h >= 1440 {
                            "balanced"
                        } else {
                            "economy"
                        },
                        ext: str_field(f, "ext").unwrap_or("mp4").to_string(),
                        hdr: Some(
                            str_field(f, "dynamic_range")
                                .is_some_and(|r| r.to_lowercase().contains("hdr")),
                        ),
                        tbr: num_field(f, "tbr"),
                        vbr: num_field(f, "vbr"),
                        abr: None,
                        channels: None,
                        asr: None,
                    })
                }
                (None, Some(acodec)) => {
                    let asr = uint_field(f, "asr");
                    Some(MediaStream {
                        id: id_field(f, "format_id"),
                        kind: StreamKind::Audio,
                        label: label.unwrap_or_else(|| match asr {
                            Some(r) => format!("{r}Hz"),
                            None => "Audio".to_string(),
                        }),
                        resolution: None,
                        width: None,
                        height: None,
                        fps: None,
                        codec: acodec,
                        size,
                        quality: "balanced",
                        ext: str_field(f, "ext").unwrap_or("m4a").to_string(),
                        hdr: None,
                        tbr: num_field(f, "tbr"),
                        vbr: None,
                        abr: num_field(f, "abr"),
                        channels: uint_field(f, "channels"),
                        asr,
                    })
                }
                _ => None,
            }
        })
        .take(MAX_STREAMS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_item_with_fallbacks() {
        let item = normalize_item(&json!({ "title": "Clip" }), "https://v.example/1");
        assert_eq!(item.title, "Clip");
        assert_eq!(item.uploader, "Unknown");
        assert_eq!(item.platform, "YT-DLP");
        assert_eq!(item.url, "https://v.example/1");
        assert_eq!(item.badge, "Video");
        assert_eq!(item.duration, 0.0);
        assert!(!item.id.is_empty());

        let item = normalize_item(
            &json!({
                "id": 42,
                "channel": "Chan",
                "duration": 61.5,
                "view_count": 1000,
                "upload_date": "20240131",
                "is_live": true,
                "webpage_url": "https://v.example/canonical",
                "thumbnails": [
                    { "url": "//img.example/small.jpg", "width": 10, "height": 10 },
                    { "url": "//img.example/big.jpg", "width": 100, "height": 50 },
                    { "url": "", "width": 1000, "height": 1000 }
                ]
            }),
            "https://v.example/1",
        );
        assert_eq!(item.id, "42");
        assert_eq!(item.uploader, "Chan");
        assert_eq!(item.duration, 61.5);
        assert_eq!(item.views, 1000);
        assert_eq!(item.date, "2024-01-31");
        assert_eq!(item.badge, "Live");
        assert_eq!(item.url, "https://v.example/canonical");
        assert_eq!(item.thumbnail, "https://img.example/big.jpg");
    }

    #[test]
    fn splits_video_and_audio_only_formats() {
        let json = json!({
            "formats": [
                { "format_id": "137", "vcodec": "avc1", "acodec": "none", "width": 3840, "height": 2160,
                  "fps": 60, "filesize": 1000, "dynamic_range": "HDR10", "ext": "mp4" },
                { "format_id": "140", "vcodec": "none", "acodec": "mp4a", "asr": 44100, "abr": 128,
                  "filesize_approx": 500 },
                { "format_id": "18", "vcodec": "avc1", "acodec": "mp4a" },
                { "format_id": "sb0", "vcodec": "none", "acodec": "none" }
            ]
        });
        let streams = extract_streams(&json);
        assert_eq!(streams.len(), 2);

        let video = &streams[0];
        assert_eq!(video.kind, StreamKind::Video);
        assert_eq!(video.label, "2160p");
        assert_eq!(video.resolution.as_deref(), Some("3840x2160"));
        assert_eq!(video.quality, "premium");
        assert_eq!(video.hdr, Some(true));
        assert_eq!(video.size, 1000);

        let audio = &streams[1];
        assert_eq!(audio.kind, StreamKind::Audio);
        assert_eq!(audio.label, "44100Hz");
        assert_eq!(audio.ext, "m4a");
        assert_eq!(audio.size, 500);
        assert_eq!(audio.abr, Some(128.0));
    }

    #[test]
    fn caps_stream_count() {
        let formats: Vec<Value> = (0..60)
            .map(|i| json!({ "format_id": i.to_string(), "vcodec": "vp9", "acodec": "none", "height": 720 }))
            .collect();
        assert_eq!(extract_streams(&json!({ "formats": formats })).len(), MAX_STREAMS);
    }

    #[cfg(unix)]
    fn shell_analyzer(script: &str, timeout_ms: u64) -> Analyzer {
        Analyzer {
            command: ExtractorCommand {
                program: "/bin/sh".into(),
                leading_args: vec!["-c".into(), script.into(), "probe".into()],
            },
            timeout: Duration::from_millis(timeout_ms),
            concurrency: 2,
            kill_grace: Duration::from_millis(200),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn analyze_counts_failures_and_keeps_order() {
        // $3 is the URL: -J --no-playlist <url>
        let script = r#"case "$3" in *bad*) echo "ERROR: unsupported" >&2; exit 1;; esac
printf '{"title":"T %s","formats":[{"format_id":"a","vcodec":"none","acodec":"opus"}]}' "$3""#;
        let analyzer = shell_analyzer(script, 5_000);
        let urls = vec![
            "https://v.example/bad".to_string(),
            "https://v.example/one".to_string(),
            "https://v.example/two".to_string(),
        ];
        let report = analyzer.analyze(&urls).await.unwrap();
        assert_eq!(report.failed, 1);
        let titles: Vec<_> = report.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["T https://v.example/one", "T https://v.example/two"]);
        assert_eq!(report.streams.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn all_failures_surface_first_error() {
        let analyzer = shell_analyzer(r#"echo "ERROR: nope" >&2; exit 1"#, 5_000);
        let err = analyzer
            .analyze(&["https://v.example/x".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ERROR: nope");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_times_out() {
        let analyzer = shell_analyzer("sleep 5", 100);
        let err = analyzer.probe("https://v.example/slow").await.unwrap_err();
        assert!(matches!(err, AnalyzeError::Timeout(100)));
    }
}
