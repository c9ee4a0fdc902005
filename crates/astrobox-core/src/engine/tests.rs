#![cfg(unix)]

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use super::*;
use crate::job::{DownloadOptions, Quality};
use crate::origin_guard::OriginError;
use crate::scheduler::{FixedSampler, HostSample};

/// Stand-in extractor: writes the output file into the `-o` directory and
/// reports progress. URLs containing `fail` exit non-zero, `slow` blocks,
/// `regress` reports a lower percentage after a higher one and blocks, `flaky`
/// reports progress and then exits non-zero.
const EXTRACTOR: &str = r#"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ] && [ -z "$out" ]; then out="$arg"; fi
  prev="$arg"
  url="$arg"
done
dir=$(dirname "$out")
case "$url" in
  *fail*) echo "ERROR: video unavailable" >&2; exit 1 ;;
  *slow*) echo "[download]   5.0% of 10.00MiB at 1.00MiB/s ETA 00:09"; exec sleep 30 ;;
  *regress*)
    echo "[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05"
    echo "[download]  30.0% of 10.00MiB at 1.00MiB/s ETA 00:07"
    exec sleep 30 ;;
  *flaky*) echo "[download]  40.0% of 10.00MiB at 1.00MiB/s ETA 00:06"; exit 1 ;;
esac
file="$dir/Test Clip.mp4"
echo data > "$file"
echo "[download] Destination: $file"
echo "[download]  50.0% of 1.00MiB at 2.00MiB/s ETA 00:01"
echo "[download] 100% of 1.00MiB at 2.00MiB/s ETA 00:00"
"#;

struct StaticResolver;

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        match host {
            "internal.example" => Ok(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]),
            _ => Ok(vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]),
        }
    }
}

struct Harness {
    engine: Engine,
    _dir: TempDir,
}

fn harness(tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let downloads = dir.path().join("downloads");
    let state = dir.path().join("state");
    std::fs::create_dir_all(&downloads).unwrap();
    std::fs::create_dir_all(&state).unwrap();
    let script = dir.path().join("extractor.sh");
    std::fs::write(&script, EXTRACTOR).unwrap();

    let mut cfg = AppConfig::default();
    cfg.extractor.program = "/bin/sh".into();
    cfg.extractor.leading_args = vec![script.to_string_lossy().into_owned()];
    cfg.extractor.kill_grace_ms = 300;
    cfg.retry.max_attempts = 3;
    cfg.retry.base_delay_ms = 20;
    cfg.retry.max_delay_ms = 200;
    cfg.resources.max_resource_units = Some(8);
    cfg.scheduler.max_concurrent = 2;
    tweak(&mut cfg);

    let paths = ResolvedPaths {
        download_dir: downloads.canonicalize().unwrap(),
        history_file: state.join("history.json"),
        cookie_file: state.join("cookies.txt"),
        state_dir: state,
    };
    let store = JobStore::open(&paths.history_file, &cfg.store).unwrap();
    let sampler = Arc::new(FixedSampler(HostSample {
        cpu_cores: 8,
        free_mem_mb: 64_000,
        total_mem_mb: 64_000,
    }));
    let engine =
        Engine::with_collaborators(cfg, paths, store, sampler, Arc::new(StaticResolver));
    Harness { engine, _dir: dir }
}

fn request(url: &str) -> SubmitRequest {
    SubmitRequest {
        url: url.to_string(),
        ..Default::default()
    }
}

fn with_options(url: &str, options: DownloadOptions) -> SubmitRequest {
    SubmitRequest {
        url: url.to_string(),
        format: None,
        options: Some(options),
    }
}

async fn wait_for(engine: &Engine, id: JobId, pred: impl Fn(&JobSnapshot) -> bool) -> JobSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(snap) = engine.snapshot(id) {
            if pred(&snap) {
                return snap;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting; last state {:?}",
            engine.snapshot(id)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn has_log(snap: &JobSnapshot, needle: &str) -> bool {
    snap.logs.iter().any(|l| l.contains(needle))
}

#[tokio::test]
async fn download_completes_and_records_file() {
    let h = harness(|_| {});
    let receipt = h.engine.submit(request("https://media.example/ok")).await.unwrap();
    assert_eq!(receipt.status, JobStatus::Queued);
    assert_eq!(receipt.resource_units, 1);
    assert_eq!(receipt.resource_budget_units, 8);

    let snap = wait_for(&h.engine, receipt.id, |s| s.status == JobStatus::Completed).await;
    assert_eq!(snap.progress, 100.0);
    assert_eq!(snap.eta, "00:00");
    assert_eq!(snap.title, "Test Clip");
    assert_eq!(snap.size, "1.00MiB");
    assert_eq!(snap.resource_units, 0);
    assert!(snap.finished_at.is_some());
    assert!(!snap.speed_history.is_empty());
    assert!(snap.file_path.as_deref().unwrap().ends_with("Test Clip.mp4"));
    assert!(has_log(&snap, "[resource] Reserved 1 units."));
    assert!(has_log(&snap, "[done] Download completed."));
    assert_eq!(h.engine.system().active_resource_units, 0);

    let path = h.engine.completed_file(receipt.id).await.unwrap();
    assert!(path.starts_with(&h.engine.paths().download_dir));

    let (record, logs) = h.engine.history_item(receipt.id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(logs.iter().any(|l| l.starts_with("[download] Destination:")));
}

#[tokio::test]
async fn unsafe_or_invalid_requests_create_nothing() {
    let h = harness(|_| {});
    let err = h.engine.submit(request("http://127.0.0.1/video")).await.unwrap_err();
    assert!(matches!(err, EngineError::Origin(OriginError::PrivateAddress)));

    let err = h.engine.submit(request("https://internal.example/v")).await.unwrap_err();
    assert!(matches!(err, EngineError::Origin(OriginError::ResolvesToPrivate)));

    let err = h.engine.submit(request("not a url")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let bad_format = SubmitRequest {
        url: "https://media.example/ok".into(),
        format: Some("best; rm -rf /".into()),
        options: None,
    };
    let err = h.engine.submit(bad_format).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert!(h.engine.snapshots().is_empty());
    assert!(h.engine.store().is_empty());
}

#[tokio::test]
async fn paused_job_waits_for_start() {
    let h = harness(|_| {});
    let options = DownloadOptions {
        auto_start: Some(false),
        ..Default::default()
    };
    let receipt = h.engine.submit(with_options("https://media.example/ok", options)).await.unwrap();
    assert_eq!(receipt.status, JobStatus::Paused);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = h.engine.snapshot(receipt.id).unwrap();
    assert_eq!(snap.status, JobStatus::Paused);
    assert_eq!(h.engine.system().queued_jobs, 0);

    assert_eq!(h.engine.start(receipt.id).unwrap(), JobStatus::Queued);
    let snap = wait_for(&h.engine, receipt.id, |s| s.status == JobStatus::Completed).await;
    assert!(has_log(&snap, "[queue] Job started."));
    assert_eq!(h.engine.start(receipt.id).unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn failing_job_retries_with_growing_delay_then_errors() {
    let h = harness(|_| {});
    let receipt = h.engine.submit(request("https://media.example/fail")).await.unwrap();
    let snap = wait_for(&h.engine, receipt.id, |s| s.status == JobStatus::Error).await;

    assert_eq!(snap.attempts, 3);
    assert_eq!(snap.resource_units, 0);
    assert!(has_log(&snap, "[retry] Attempt 1 scheduled in 0.02s."));
    assert!(has_log(&snap, "[retry] Attempt 2 scheduled in 0.04s."));
    assert!(!has_log(&snap, "[retry] Attempt 3"));
    assert!(has_log(&snap, "ERROR: video unavailable"));
    assert!(has_log(&snap, "[error] Download failed (exit code 1)."));
    assert_eq!(h.engine.system().active_resource_units, 0);
    assert!(matches!(
        h.engine.start(receipt.id),
        Err(EngineError::CannotStart(JobStatus::Error))
    ));
    assert!(matches!(
        h.engine.cancel(receipt.id),
        Err(EngineError::NotCancellable(JobStatus::Error))
    ));
}

#[tokio::test]
async fn retry_delays_grow_between_attempts() {
    let h = harness(|cfg| {
        cfg.retry.base_delay_ms = 100;
        cfg.retry.max_delay_ms = 1_000;
    });
    let options = DownloadOptions {
        auto_start: Some(false),
        ..Default::default()
    };
    let receipt = h.engine.submit(with_options("https://media.example/fail", options)).await.unwrap();
    let mut stream = h.engine.subscribe(receipt.id).unwrap();
    h.engine.start(receipt.id).unwrap();

    let mut launches = Vec::new();
    loop {
        let update = tokio::time::timeout(Duration::from_secs(10), stream.updates.recv())
            .await
            .unwrap()
            .unwrap();
        if update.status == Some(JobStatus::Downloading) {
            launches.push(Instant::now());
        }
        if update.is_terminal() {
            break;
        }
    }
    assert_eq!(launches.len(), 3);
    let first_gap = launches[1] - launches[0];
    let second_gap = launches[2] - launches[1];
    assert!(first_gap >= Duration::from_millis(100), "first gap {first_gap:?}");
    assert!(second_gap >= Duration::from_millis(200), "second gap {second_gap:?}");
    assert!(second_gap > first_gap, "{first_gap:?} then {second_gap:?}");
}

#[tokio::test]
async fn progress_never_moves_backwards_within_a_run() {
    let h = harness(|_| {});
    let receipt = h.engine.submit(request("https://media.example/regress")).await.unwrap();
    let snap = wait_for(&h.engine, receipt.id, |s| has_log(s, "30.0%")).await;
    assert_eq!(snap.progress, 50.0);
    assert_eq!(snap.eta, "00:07");
    h.engine.cancel(receipt.id).unwrap();
}

#[tokio::test]
async fn retry_resets_progress_before_new_output() {
    let h = harness(|cfg| {
        cfg.retry.base_delay_ms = 500;
        cfg.retry.max_delay_ms = 2_000;
    });
    let receipt = h.engine.submit(request("https://media.example/flaky")).await.unwrap();
    let snap = wait_for(&h.engine, receipt.id, |s| {
        s.attempts == 1 && s.status == JobStatus::Queued
    })
    .await;
    assert!(has_log(&snap, "40.0%"));
    assert_eq!(snap.progress, 0.0);
    assert_eq!(snap.resource_units, 0);
    assert!(has_log(&snap, "[retry] Attempt 1 scheduled in 0.5s."));
    h.engine.cancel(receipt.id).unwrap();
}

#[tokio::test]
async fn panicking_supervisor_fails_job_and_releases_units() {
    let h = harness(|_| {});
    let mut faults = h.engine.faults();
    let receipt = h.engine.submit(request("https://media.example/slow")).await.unwrap();
    wait_for(&h.engine, receipt.id, |s| {
        s.status == JobStatus::Downloading && s.progress > 0.0
    })
    .await;
    assert_eq!(h.engine.system().active_resource_units, 1);
    assert!(h.engine.fault().is_none());

    let run_id = {
        let st = h.engine.inner.state.lock();
        st.jobs[&receipt.id].run.as_ref().unwrap().run_id
    };
    let task = tokio::spawn(async { panic!("supervisor blew up") });
    h.engine.inner.watch_run(receipt.id, run_id, task).await.unwrap();

    let snap = h.engine.snapshot(receipt.id).unwrap();
    assert_eq!(snap.status, JobStatus::Error);
    assert_eq!(snap.resource_units, 0);
    assert!(has_log(&snap, "[error] Supervisor failed unexpectedly."));
    let report = h.engine.system();
    assert_eq!(report.active_resource_units, 0);
    assert_eq!(report.active_jobs, 0);
    assert_eq!(h.engine.store().get(receipt.id).unwrap().status, JobStatus::Error);

    tokio::time::timeout(Duration::from_secs(1), faults.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(h.engine.fault().unwrap().contains(&receipt.id.to_string()));

    // the real extractor exits after the stop and must not revive the job
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.snapshot(receipt.id).unwrap().status, JobStatus::Error);
    assert_eq!(h.engine.system().active_resource_units, 0);
}

#[tokio::test]
async fn cancel_releases_units_immediately() {
    let h = harness(|_| {});
    let receipt = h.engine.submit(request("https://media.example/slow")).await.unwrap();
    let snap = wait_for(&h.engine, receipt.id, |s| {
        s.status == JobStatus::Downloading && s.progress > 0.0
    })
    .await;
    assert_eq!(snap.resource_units, 1);
    assert_eq!(h.engine.system().active_resource_units, 1);

    h.engine.cancel(receipt.id).unwrap();
    let snap = h.engine.snapshot(receipt.id).unwrap();
    assert_eq!(snap.status, JobStatus::Cancelled);
    assert_eq!(snap.resource_units, 0);
    assert!(has_log(&snap, "[cancel] Job cancelled."));
    assert_eq!(h.engine.system().active_resource_units, 0);
    assert_eq!(h.engine.system().active_jobs, 0);

    // idempotent, and the exiting process does not overwrite the status
    h.engine.cancel(receipt.id).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snap = h.engine.snapshot(receipt.id).unwrap();
    assert_eq!(snap.status, JobStatus::Cancelled);
    assert_eq!(snap.attempts, 0);
    assert!(matches!(
        h.engine.start(receipt.id),
        Err(EngineError::CannotStart(JobStatus::Cancelled))
    ));
}

#[tokio::test]
async fn concurrency_limit_holds_jobs_in_queue() {
    let h = harness(|cfg| cfg.scheduler.max_concurrent = 1);
    let first = h.engine.submit(request("https://media.example/slow/1")).await.unwrap();
    let second = h.engine.submit(request("https://media.example/slow/2")).await.unwrap();

    wait_for(&h.engine, first.id, |s| s.status == JobStatus::Downloading).await;
    let report = h.engine.system();
    assert_eq!(report.active_jobs, 1);
    assert_eq!(report.queued_jobs, 1);
    assert_eq!(h.engine.snapshot(second.id).unwrap().status, JobStatus::Queued);

    h.engine.cancel(first.id).unwrap();
    wait_for(&h.engine, second.id, |s| s.status == JobStatus::Downloading).await;
    h.engine.cancel(second.id).unwrap();
}

#[tokio::test]
async fn head_of_queue_waits_for_unit_budget() {
    let h = harness(|cfg| {
        cfg.resources.max_resource_units = Some(2);
        cfg.scheduler.max_concurrent = 3;
    });
    let heavy = || DownloadOptions {
        quality: Some(Quality::Q1080),
        ..Default::default()
    };
    let first = h.engine.submit(with_options("https://media.example/slow/a", heavy())).await.unwrap();
    assert_eq!(first.resource_units, 2);
    let second = h.engine.submit(with_options("https://media.example/slow/b", heavy())).await.unwrap();

    wait_for(&h.engine, first.id, |s| s.status == JobStatus::Downloading).await;
    let report = h.engine.system();
    assert_eq!(report.active_resource_units, 2);
    assert_eq!(report.queued_jobs, 1);
    assert_eq!(h.engine.snapshot(second.id).unwrap().status, JobStatus::Queued);

    h.engine.cancel(first.id).unwrap();
    let snap = wait_for(&h.engine, second.id, |s| s.status == JobStatus::Downloading).await;
    assert_eq!(snap.resource_units, 2);
    assert_eq!(h.engine.system().active_resource_units, 2);
    h.engine.cancel(second.id).unwrap();
}

#[tokio::test]
async fn subscriber_sees_snapshot_then_updates_until_terminal() {
    let h = harness(|_| {});
    let options = DownloadOptions {
        auto_start: Some(false),
        ..Default::default()
    };
    let receipt = h.engine.submit(with_options("https://media.example/ok", options)).await.unwrap();
    let mut stream = h.engine.subscribe(receipt.id).unwrap();
    assert_eq!(stream.status, JobStatus::Paused);
    assert_eq!(stream.snapshot.status, Some(JobStatus::Paused));

    h.engine.start(receipt.id).unwrap();
    let mut statuses = Vec::new();
    loop {
        let update = tokio::time::timeout(Duration::from_secs(10), stream.updates.recv())
            .await
            .unwrap()
            .unwrap();
        if let Some(status) = update.status {
            statuses.push(status);
        }
        if update.is_terminal() {
            break;
        }
    }
    assert_eq!(
        statuses,
        [JobStatus::Queued, JobStatus::Downloading, JobStatus::Completed]
    );
    assert!(h.engine.subscribe(JobId::new_v4()).is_none());
}

#[tokio::test]
async fn tickets_are_bound_to_known_jobs() {
    let h = harness(|_| {});
    let unknown = JobId::new_v4();
    assert!(matches!(
        h.engine.issue_ticket(TicketScope::Stream, unknown),
        Err(EngineError::NotFound)
    ));

    let receipt = h.engine.submit(request("https://media.example/ok")).await.unwrap();
    wait_for(&h.engine, receipt.id, |s| s.status == JobStatus::Completed).await;

    let ticket = h.engine.issue_ticket(TicketScope::File, receipt.id).unwrap();
    assert!(!h.engine.verify_ticket(&ticket.ticket, receipt.id, TicketScope::Stream));
    assert!(h.engine.verify_ticket(&ticket.ticket, receipt.id, TicketScope::File));
    assert!(!h.engine.verify_ticket(&ticket.ticket, receipt.id, TicketScope::File));
}

#[tokio::test]
async fn completed_file_checks_state_and_disk() {
    let h = harness(|_| {});
    assert!(matches!(
        h.engine.completed_file(JobId::new_v4()).await,
        Err(EngineError::NotFound)
    ));

    let slow = h.engine.submit(request("https://media.example/slow")).await.unwrap();
    assert!(matches!(
        h.engine.completed_file(slow.id).await,
        Err(EngineError::FileNotReady)
    ));
    h.engine.cancel(slow.id).unwrap();

    let done = h.engine.submit(request("https://media.example/ok")).await.unwrap();
    let snap = wait_for(&h.engine, done.id, |s| s.status == JobStatus::Completed).await;
    std::fs::remove_file(PathBuf::from(snap.file_path.unwrap())).unwrap();
    assert!(matches!(
        h.engine.completed_file(done.id).await,
        Err(EngineError::FileMissing)
    ));
}

#[tokio::test]
async fn analyze_rejects_bad_payloads_before_probing() {
    let h = harness(|_| {});
    let err = h.engine.analyze(Vec::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let too_many = vec!["https://media.example/x".to_string(); MAX_ANALYZE_URLS + 1];
    assert!(matches!(
        h.engine.analyze(too_many).await,
        Err(EngineError::Validation(_))
    ));

    let err = h
        .engine
        .analyze(vec!["http://localhost/x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Origin(OriginError::InternalHostname)));
}

#[tokio::test]
async fn shutdown_fails_running_jobs_and_flushes() {
    let h = harness(|_| {});
    let receipt = h.engine.submit(request("https://media.example/slow")).await.unwrap();
    wait_for(&h.engine, receipt.id, |s| s.status == JobStatus::Downloading).await;

    h.engine.shutdown("SIGTERM").await.unwrap();
    let snap = h.engine.snapshot(receipt.id).unwrap();
    assert_eq!(snap.status, JobStatus::Error);
    assert!(has_log(&snap, "[error] Server shutdown unexpectedly (SIGTERM)."));
    assert_eq!(h.engine.system().active_resource_units, 0);

    let record = h.engine.store().get(receipt.id).unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(h.engine.store().flush_state(), crate::store::FlushState::Clean);

    assert!(matches!(
        h.engine.submit(request("https://media.example/ok")).await,
        Err(EngineError::ShuttingDown)
    ));
    h.engine.shutdown("again").await.unwrap();
}
