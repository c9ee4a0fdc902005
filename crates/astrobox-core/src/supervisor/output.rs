//! Classification of extractor output lines.

use regex_lite::Regex;
use std::sync::OnceLock;

use crate::url_model::strip_quotes;

static RE_PROGRESS: OnceLock<Option<Regex>> = OnceLock::new();
static RE_DESTINATIONS: OnceLock<Vec<Regex>> = OnceLock::new();

/// One parsed `[download] NN.N% ...` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub percent: f64,
    pub size: Option<String>,
    pub speed: String,
    pub eta: String,
}

impl ProgressLine {
    /// Numeric part of the speed string (`1.50MiB/s` -> 1.5), if any.
    pub fn speed_value(&self) -> Option<f64> {
        let digits: String = self
            .speed
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressLine),
    /// Final or intermediate output file path.
    Destination(String),
    Log,
}

fn progress_re() -> Option<&'static Regex> {
    RE_PROGRESS
        .get_or_init(|| {
            Regex::new(
                r"(?i)\[download\]\s+(\d{1,3}(?:\.\d+)?)%(?:\s+of\s+~?\s*(\S+))?.*?\bat\s+(\S+)\s+ETA\s+(\S+)",
            )
            .ok()
        })
        .as_ref()
}

fn destination_res() -> &'static [Regex] {
    RE_DESTINATIONS.get_or_init(|| {
        [
            r"(?i)^\[download\]\s+Destination:\s+(.+)$",
            r"(?i)^\[ExtractAudio\]\s+Destination:\s+(.+)$",
            r#"(?i)^\[Merger\]\s+Merging formats into\s+"(.+)"$"#,
            r#"(?i)^\[VideoRemuxer\]\s+Remuxing video from .+ to "(.+)"$"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn parse_destination(line: &str) -> Option<String> {
    destination_res().iter().find_map(|re| {
        let path = strip_quotes(re.captures(line)?.get(1)?.as_str());
        (!path.is_empty()).then(|| path.to_string())
    })
}

fn parse_progress(line: &str) -> Option<ProgressLine> {
    let caps = progress_re()?.captures(line)?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(ProgressLine {
        percent: percent.min(100.0),
        size: caps.get(2).map(|m| m.as_str().to_string()),
        speed: caps.get(3)?.as_str().to_string(),
        eta: caps.get(4)?.as_str().to_string(),
    })
}

/// Classify one trimmed, non-empty output line.
pub fn classify_line(line: &str) -> OutputLine {
    if let Some(path) = parse_destination(line) {
        return OutputLine::Destination(path);
    }
    match parse_progress(line) {
        Some(p) => OutputLine::Progress(p),
        None => OutputLine::Log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(line: &str) -> ProgressLine {
        match classify_line(line) {
            OutputLine::Progress(p) => p,
            other => panic!("expected progress for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn progress_with_size() {
        let p = progress("[download]  45.3% of  10.00MiB at  1.50MiB/s ETA 00:05");
        assert_eq!(p.percent, 45.3);
        assert_eq!(p.size.as_deref(), Some("10.00MiB"));
        assert_eq!(p.speed, "1.50MiB/s");
        assert_eq!(p.eta, "00:05");
        assert_eq!(p.speed_value(), Some(1.5));
    }

    #[test]
    fn progress_with_estimated_size() {
        let p = progress("[download]   3.0% of ~  250.12MiB at  800.00KiB/s ETA 05:12 (frag 3/90)");
        assert_eq!(p.size.as_deref(), Some("250.12MiB"));
        assert_eq!(p.eta, "05:12");
    }

    #[test]
    fn progress_without_size() {
        let p = progress("[download]  7% at 2.00MiB/s ETA 01:00");
        assert_eq!(p.percent, 7.0);
        assert_eq!(p.size, None);
    }

    #[test]
    fn finished_line_without_eta_is_log() {
        assert_eq!(
            classify_line("[download] 100% of 10.00MiB in 00:00:03 at 3.1MiB/s"),
            OutputLine::Log
        );
    }

    #[test]
    fn destinations() {
        assert_eq!(
            classify_line("[download] Destination: /dl/My Clip.f137.mp4"),
            OutputLine::Destination("/dl/My Clip.f137.mp4".into())
        );
        assert_eq!(
            classify_line("[ExtractAudio] Destination: /dl/Song.mp3"),
            OutputLine::Destination("/dl/Song.mp3".into())
        );
        assert_eq!(
            classify_line(r#"[Merger] Merging formats into "/dl/My Clip.mkv""#),
            OutputLine::Destination("/dl/My Clip.mkv".into())
        );
        assert_eq!(
            classify_line(r#"[VideoRemuxer] Remuxing video from webm to "/dl/a.mp4""#),
            OutputLine::Destination("/dl/a.mp4".into())
        );
    }

    #[test]
    fn other_lines_are_logs() {
        assert_eq!(classify_line("[youtube] abc: Downloading webpage"), OutputLine::Log);
        assert_eq!(classify_line("ERROR: Unsupported URL"), OutputLine::Log);
    }
}
