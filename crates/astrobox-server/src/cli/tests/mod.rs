//! CLI parse tests.

use super::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn cli_parse_serve() {
    let cli = parse(&["astrobox", "serve"]);
    assert!(cli.config.is_none());
    assert!(!cli.log_stderr);
    match cli.command {
        CliCommand::Serve { listen } => assert!(listen.is_none()),
        _ => panic!("expected Serve"),
    }
}

#[test]
fn cli_parse_serve_with_listen_and_globals() {
    let cli = parse(&[
        "astrobox",
        "serve",
        "--listen",
        "0.0.0.0:9000",
        "--config",
        "/tmp/astro.toml",
        "--log-stderr",
    ]);
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/astro.toml")));
    assert!(cli.log_stderr);
    match cli.command {
        CliCommand::Serve { listen } => assert_eq!(listen.as_deref(), Some("0.0.0.0:9000")),
        _ => panic!("expected Serve"),
    }
}

#[test]
fn cli_parse_history() {
    match parse(&["astrobox", "history", "--status", "error", "-q", "clip"]).command {
        CliCommand::History {
            status,
            query,
            limit,
        } => {
            assert_eq!(status.as_deref(), Some("error"));
            assert_eq!(query.as_deref(), Some("clip"));
            assert_eq!(limit, 20);
        }
        _ => panic!("expected History"),
    }
}

#[test]
fn cli_parse_config_path() {
    assert!(matches!(
        parse(&["astrobox", "config-path"]).command,
        CliCommand::ConfigPath
    ));
}

#[test]
fn cli_rejects_unknown_command() {
    assert!(Cli::try_parse_from(["astrobox", "bench", "http://x"]).is_err());
}
