//! Extractor process plumbing.
//!
//! [`build_args`] turns validated job options into a command line,
//! [`ExtractorCommand`] spawns it, [`read_lines`] pumps stdout and stderr in
//! arrival order, and [`classify_line`] interprets each line. The engine owns
//! what happens with the results.

mod args;
mod output;

pub use args::{build_args, LaunchContext};
pub use output::{classify_line, OutputLine, ProgressLine};

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::ExtractorConfig;

/// Program plus fixed leading arguments (e.g. an interpreter and script).
#[derive(Debug, Clone)]
pub struct ExtractorCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl ExtractorCommand {
    pub fn from_config(cfg: &ExtractorConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            leading_args: cfg.leading_args.clone(),
        }
    }

    /// Spawn with stdin closed and both output streams piped.
    pub fn spawn<I, S>(&self, args: I) -> std::io::Result<Child>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Read lines from both streams until both reach EOF, calling `on_line` with
/// every trimmed non-empty line in the order they arrive.
pub async fn read_lines<O, E, F>(stdout: Option<O>, stderr: Option<E>, mut on_line: F)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut out = stdout.map(BufReader::new);
    let mut err = stderr.map(BufReader::new);
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let mut emit = |buf: &mut Vec<u8>| {
        let line = String::from_utf8_lossy(buf.as_slice());
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            on_line(trimmed.to_string());
        }
        buf.clear();
    };

    loop {
        let (out_done, err_done) = (out.is_none(), err.is_none());
        if out_done && err_done {
            break;
        }
        tokio::select! {
            r = async { out.as_mut()?.read_until(b'\n', &mut out_buf).await.ok() }, if !out_done => {
                match r {
                    Some(n) if n > 0 => emit(&mut out_buf),
                    _ => {
                        if !out_buf.is_empty() {
                            emit(&mut out_buf);
                        }
                        out = None;
                    }
                }
            }
            r = async { err.as_mut()?.read_until(b'\n', &mut err_buf).await.ok() }, if !err_done => {
                match r {
                    Some(n) if n > 0 => emit(&mut err_buf),
                    _ => {
                        if !err_buf.is_empty() {
                            emit(&mut err_buf);
                        }
                        err = None;
                    }
                }
            }
        }
    }
}
