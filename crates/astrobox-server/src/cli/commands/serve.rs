//! `astrobox serve` – run the job engine behind the HTTP API.

use anyhow::{Context, Result};
use astrobox_core::config::AppConfig;
use astrobox_core::engine::Engine;
use astrobox_core::store::JobStore;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::http::HttpServer;

/// Resolves on Ctrl-C or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// Resolves with the first fault raised on the engine.
async fn next_fault(faults: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(fault) = faults.borrow_and_update().clone() {
            return fault;
        }
        if faults.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Keep the default panic report and also raise the panic as an engine
/// fault so the server shuts down and exits non-zero.
fn route_panics_to(engine: &Engine) {
    let engine = engine.clone();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        engine.report_fault(format!("panic: {info}"));
    }));
}

pub async fn run_serve(mut cfg: AppConfig, listen: Option<String>) -> Result<()> {
    cfg.apply_env_overrides();
    if let Some(listen) = listen {
        cfg.server.listen = listen;
    }
    let cfg = cfg.normalized();
    let paths = cfg.resolve_paths()?;
    let store = JobStore::open(&paths.history_file, &cfg.store)
        .with_context(|| format!("open history: {}", paths.history_file.display()))?;
    info!(
        downloads = %paths.download_dir.display(),
        history = %paths.history_file.display(),
        "starting astrobox"
    );

    let token = match cfg.server.effective_api_token() {
        Some((token, true)) => {
            warn!("no api_token configured; generated one for this run");
            println!("Generated API token: {token}");
            Some(token)
        }
        Some((token, false)) => Some(token),
        None => {
            warn!("API token disabled; every route is open");
            None
        }
    };

    let engine = Engine::new(cfg, paths, store);
    route_panics_to(&engine);
    let mut faults = engine.faults();
    let server = HttpServer::new(engine.clone(), token);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

    let (reason, fatal) = tokio::select! {
        joined = &mut server_task => {
            let err = match joined {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
            };
            error!("{err:#}");
            ("server error", Some(err))
        }
        signal = shutdown_signal() => {
            info!(signal, "shutdown requested");
            (signal, None)
        }
        fault = next_fault(&mut faults) => {
            error!("engine fault: {fault}");
            ("panic", Some(anyhow::anyhow!("engine fault: {fault}")))
        }
    };

    if let Err(e) = engine.shutdown(reason).await {
        error!("engine shutdown: {e:#}");
    }
    let _ = shutdown_tx.send(());
    if fatal.is_none() {
        match server_task.await {
            Ok(Err(e)) => error!("HTTP server: {e:#}"),
            Err(e) => error!("HTTP server task: {e}"),
            Ok(Ok(())) => {}
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => {
            info!("astrobox stopped");
            Ok(())
        }
    }
}
