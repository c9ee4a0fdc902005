//! Extractor argument vector for a download job.

use std::path::Path;

use crate::job::{DownloadOptions, Quality};
use crate::url_model::{prefixed_template, sanitize_prefix, sanitize_template};

/// Everything besides the job options that shapes the command line.
#[derive(Debug, Clone)]
pub struct LaunchContext<'a> {
    /// Already contained in the download root.
    pub target_dir: &'a Path,
    /// Passed only when the file exists.
    pub cookie_file: Option<&'a Path>,
    pub ffmpeg_threads: u32,
    pub silent: bool,
    pub output_template: &'a str,
    pub default_chapter_template: &'a str,
}

fn video_capped(height: u32) -> String {
    format!("bestvideo[height<={height}]+bestaudio/best")
}

/// Format selector after quality and resolution-cap overrides.
fn effective_format(format: &str, options: &DownloadOptions) -> String {
    let mut selector = format.to_string();
    match options.quality {
        Some(Quality::Audio) => selector = "bestaudio/best".to_string(),
        Some(q) => {
            if let Some(h) = q.max_height() {
                selector = video_capped(h);
            }
        }
        None => {}
    }
    if let Some(h) = options.resolution_cap.and_then(|c| c.max_height()) {
        selector = video_capped(h);
    }
    selector
}

/// Build the argument list (without the program and its leading args).
/// The URL is always last.
pub fn build_args(
    url: &str,
    format: &str,
    options: &DownloadOptions,
    ctx: &LaunchContext<'_>,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["--newline".into()];
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    if ctx.silent {
        push(&["--no-warnings"]);
    }
    match options.items_limit {
        Some(n) if n > 0 => push(&["--playlist-end", &n.to_string()]),
        _ => push(&["--no-playlist"]),
    }
    if let Some(cookies) = ctx.cookie_file {
        push(&["--cookies", &cookies.to_string_lossy()]);
    }
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
    if let Some(proxy) = non_empty(&options.proxy) {
        push(&["--proxy", &proxy]);
    }
    if let Some(rate) = non_empty(&options.rate_limit) {
        push(&["--rate-limit", &rate]);
    }
    if let Some(ua) = non_empty(&options.user_agent) {
        push(&["--user-agent", &ua]);
    }
    if let Some(referrer) = non_empty(&options.referrer) {
        push(&["--referer", &referrer]);
    }
    push(&[
        "--postprocessor-args",
        &format!("ffmpeg:-threads {} -loglevel warning", ctx.ffmpeg_threads),
    ]);

    let prefix = sanitize_prefix(options.custom_name_prefix.as_deref());
    let output = ctx
        .target_dir
        .join(prefixed_template(&prefix, ctx.output_template));
    push(&["-o", &output.to_string_lossy()]);

    push(&["-f", &effective_format(format, options)]);

    let mut sort = Vec::new();
    if options.hdr {
        sort.push("hdr");
    }
    if options.fps60 {
        sort.push("fps");
    }
    if !sort.is_empty() {
        push(&["-S", &sort.join(",")]);
    }

    if let Some(container) = options.container {
        push(&["--merge-output-format", container.as_arg()]);
    }
    if let Some(fmt) = options.format {
        if fmt.is_video_container() {
            push(&["--merge-output-format", fmt.as_arg()]);
        } else if fmt.is_audio() {
            push(&["--extract-audio", "--audio-format", fmt.as_arg()]);
        }
    }
    if let Some(audio) = options.audio_format.and_then(|a| a.as_arg()) {
        push(&["--extract-audio", "--audio-format", audio]);
    }
    if let Some(q) = options.audio_quality {
        push(&["--audio-quality", &q.to_string()]);
    }
    if options.sponsor_block {
        push(&["--sponsorblock-remove", "all"]);
    }
    if options.subtitles {
        push(&["--write-subs", "--sub-langs", "all", "--embed-subs"]);
    }
    if options.split_chapters {
        let template = sanitize_template(
            options.chapter_template.as_deref(),
            ctx.default_chapter_template,
        );
        let chapter = ctx.target_dir.join(prefixed_template(&prefix, &template));
        push(&["--split-chapters"]);
        push(&["-o", &format!("chapter:{}", chapter.to_string_lossy())]);
    }
    if options.embed_metadata {
        push(&["--embed-metadata"]);
    }
    if options.embed_thumbnail {
        push(&["--embed-thumbnail"]);
    }

    push(&[url]);
    args
}
