//! yt-dlp acquisition: discovery, download jobs, python-module fallback.
//!
//! Discovery runs once per process and the result (found or not) is cached
//! until restart. Downloads are owned job tasks: they stream progress as push
//! events, honour cooperative cancellation (kill and forget, late events are
//! never emitted after a cancel), and resolve exactly once by construction.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use stagelit_core::error::StageError;
use stagelit_core::platform;
use stagelit_core::protocol::{DownloaderOrigin, DownloaderStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Probe timeout for bundled and common-install candidates. Generous because
/// OS security layers scan fresh binaries on first run.
const BUNDLED_PROBE_TIMEOUT: Duration = Duration::from_secs(15);
/// Probe timeout for PATH and python-module candidates.
const PATH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How many trailing stderr lines are carried into an error message.
const STDERR_TAIL_LINES: usize = 3;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

// ── discovery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Downloader {
    /// Executable path, or a bare name resolved through PATH, or the python
    /// launcher for module invocation.
    pub command: String,
    pub origin: DownloaderOrigin,
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub downloader: Option<Downloader>,
}

impl Discovery {
    pub fn not_found() -> Self {
        Self { downloader: None }
    }

    pub fn status(&self) -> DownloaderStatus {
        match &self.downloader {
            Some(d) => DownloaderStatus {
                found: true,
                command: Some(d.command.clone()),
                origin: Some(d.origin),
                version: d.version.clone(),
            },
            None => DownloaderStatus {
                found: false,
                command: None,
                origin: None,
                version: None,
            },
        }
    }
}

static DISCOVERY: OnceCell<Discovery> = OnceCell::const_new();

/// Locate a usable downloader. The search runs at most once per process;
/// both positive and negative results are permanent until restart.
pub async fn discover() -> &'static Discovery {
    DISCOVERY.get_or_init(run_discovery).await
}

/// Outcome of executing a candidate with `--version`.
enum Probe {
    Version(String),
    TimedOut,
    Failed,
}

async fn probe(cmd: &str, args: &[&str], timeout: Duration) -> Probe {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => Probe::TimedOut,
        Ok(Err(_)) => Probe::Failed,
        Ok(Ok(out)) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if version.is_empty() {
                Probe::Failed
            } else {
                Probe::Version(version)
            }
        }
        Ok(Ok(_)) => Probe::Failed,
    }
}

/// Best-effort fixes before executing a binary found on disk: downloaded
/// binaries are often non-executable, and macOS quarantines them.
async fn prepare_binary(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755));
    }
    #[cfg(target_os = "macos")]
    {
        let _ = Command::new("xattr")
            .arg("-dr")
            .arg("com.apple.quarantine")
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
    #[cfg(windows)]
    {
        let _ = path;
    }
}

fn found(command: String, origin: DownloaderOrigin, version: Option<String>) -> Discovery {
    info!(
        "downloader found: {} (origin {:?}, version {:?})",
        command, origin, version
    );
    Discovery {
        downloader: Some(Downloader {
            command,
            origin,
            version,
        }),
    }
}

async fn run_discovery() -> Discovery {
    let packaged = platform::is_packaged_build();
    info!(
        "downloader discovery: packaged={} platform={}",
        packaged,
        std::env::consts::OS
    );

    // 1) Bundled binary, highest priority.
    for dir in platform::bundled_dirs() {
        for name in platform::bundled_binary_names() {
            let p = dir.join(name);
            let meta = match std::fs::metadata(&p) {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            // Packaged builds trust existence + size: executing the binary
            // can be blocked by Gatekeeper / code signing / a read-only
            // filesystem even when it would run fine for a real download.
            if packaged && meta.len() > platform::BUNDLED_MIN_SIZE_BYTES {
                return found(
                    p.display().to_string(),
                    DownloaderOrigin::Bundled,
                    Some("bundled".to_string()),
                );
            }

            prepare_binary(&p).await;
            let cmd = p.display().to_string();
            match probe(&cmd, &["--version"], BUNDLED_PROBE_TIMEOUT).await {
                Probe::Version(v) => return found(cmd, DownloaderOrigin::Bundled, Some(v)),
                Probe::TimedOut => {
                    // Inconclusive, not necessarily broken: first-run OS
                    // security scans are slow. Trust it, with a distinct
                    // version marker.
                    warn!("bundled downloader {:?} timed out on version probe", p);
                    return found(
                        cmd,
                        DownloaderOrigin::Bundled,
                        Some("unknown (scan timeout)".to_string()),
                    );
                }
                Probe::Failed => {
                    info!("bundled candidate {:?} failed verification", p);
                }
            }
        }
    }

    // 2) System PATH.
    for name in platform::system_binary_names() {
        if let Probe::Version(v) = probe(name, &["--version"], PATH_PROBE_TIMEOUT).await {
            return found(name.to_string(), DownloaderOrigin::SystemPath, Some(v));
        }
    }

    // 3) Python module.
    let py = platform::python_launcher();
    if let Probe::Version(v) = probe(py, &["-m", "yt_dlp", "--version"], PATH_PROBE_TIMEOUT).await
    {
        return found(py.to_string(), DownloaderOrigin::PythonModule, Some(v));
    }

    // 4) Common install locations.
    for p in platform::common_install_paths() {
        if !p.exists() {
            continue;
        }
        prepare_binary(&p).await;
        let cmd = p.display().to_string();
        match probe(&cmd, &["--version"], BUNDLED_PROBE_TIMEOUT).await {
            Probe::Version(v) => return found(cmd, DownloaderOrigin::CommonInstall, Some(v)),
            Probe::TimedOut => {
                warn!("downloader {:?} timed out on version probe", p);
                return found(
                    cmd,
                    DownloaderOrigin::CommonInstall,
                    Some("unknown (scan timeout)".to_string()),
                );
            }
            Probe::Failed => {}
        }
    }

    info!("downloader not found anywhere; caching negative result for this run");
    Discovery::not_found()
}

// ── download jobs ─────────────────────────────────────────────────────────────

/// Argument list for a download. Reproduced exactly for both direct and
/// module invocation (the module path prepends `-m yt_dlp`).
pub fn download_args(format: &str, output: &Path, url: &str) -> Vec<String> {
    vec![
        "--no-warnings".to_string(),
        "--no-playlist".to_string(),
        "--no-check-certificates".to_string(),
        "--newline".to_string(),
        "--progress".to_string(),
        "-f".to_string(),
        format.to_string(),
        "-o".to_string(),
        output.display().to_string(),
        url.to_string(),
    ]
}

/// How an attempt invokes the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Direct(String),
    PythonModule,
}

/// Ordered attempt list for a job: the discovered command first, then one
/// transparent python-module retry. A downloader that already *is* the
/// python module gets no fallback, so a job makes at most two attempts.
pub fn candidates_for(downloader: &Downloader) -> Vec<Invocation> {
    match downloader.origin {
        DownloaderOrigin::PythonModule => vec![Invocation::PythonModule],
        _ => vec![
            Invocation::Direct(downloader.command.clone()),
            Invocation::PythonModule,
        ],
    }
}

/// Extract a completion percentage from a progress line, e.g.
/// `[download]  45.2% of ~10.5MiB at 2.3MiB/s`.
pub fn parse_percent(line: &str) -> Option<f32> {
    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = PERCENT_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("valid regex"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

#[derive(Debug)]
pub enum DownloadEvent {
    Progress { percent: f32, line: String },
    Finished(Result<PathBuf, StageError>),
}

/// Event from a job task, tagged with the job id so the session loop can
/// drop anything from a job it no longer tracks.
#[derive(Debug)]
pub struct JobUpdate {
    pub job_id: u64,
    pub event: DownloadEvent,
}

/// Live handle to a download job. Cancelling signals the subprocess to die
/// and forgets it: the task emits nothing after a cancel, and the caller
/// does not wait for confirmation of process death.
pub struct DownloadHandle {
    pub id: u64,
    token: CancellationToken,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

pub fn spawn_download(
    downloader: &Downloader,
    url: String,
    output: PathBuf,
    format: String,
    updates: mpsc::Sender<JobUpdate>,
) -> DownloadHandle {
    spawn_with_candidates(candidates_for(downloader), url, output, format, updates)
}

fn spawn_with_candidates(
    candidates: Vec<Invocation>,
    url: String,
    output: PathBuf,
    format: String,
    updates: mpsc::Sender<JobUpdate>,
) -> DownloadHandle {
    let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
    let token = CancellationToken::new();

    info!("download job {} starting for {}", id, url);
    tokio::spawn(run_job(
        id,
        candidates,
        url,
        output,
        format,
        updates,
        token.clone(),
    ));

    DownloadHandle { id, token }
}

enum AttemptOutcome {
    Success(PathBuf),
    /// Exit 0 but a zero-byte file. Terminal: the process "worked", so the
    /// fallback would fetch the same restricted content again.
    EmptyFile,
    Cancelled,
    Failed(StageError),
}

async fn run_job(
    id: u64,
    candidates: Vec<Invocation>,
    url: String,
    output: PathBuf,
    format: String,
    updates: mpsc::Sender<JobUpdate>,
    token: CancellationToken,
) {
    let args = download_args(&format, &output, &url);
    let mut last_err: Option<StageError> = None;

    for (attempt, invocation) in candidates.iter().enumerate() {
        // A cancelled job must go silent: no fallback attempt, no Finished.
        if token.is_cancelled() {
            return;
        }
        if attempt > 0 {
            info!("job {}: retrying via python module", id);
        }
        match run_attempt(id, invocation, &args, &output, &updates, &token).await {
            AttemptOutcome::Success(path) => {
                info!("job {}: download complete: {:?}", id, path);
                let _ = updates
                    .send(JobUpdate {
                        job_id: id,
                        event: DownloadEvent::Finished(Ok(path)),
                    })
                    .await;
                return;
            }
            AttemptOutcome::EmptyFile => {
                let _ = updates
                    .send(JobUpdate {
                        job_id: id,
                        event: DownloadEvent::Finished(Err(StageError::DownloadEmptyResult)),
                    })
                    .await;
                return;
            }
            AttemptOutcome::Cancelled => {
                info!("job {}: cancelled", id);
                return;
            }
            AttemptOutcome::Failed(err) => {
                warn!("job {}: attempt {} failed: {}", id, attempt + 1, err);
                last_err = Some(err);
            }
        }
    }

    if token.is_cancelled() {
        return;
    }
    let err = last_err.unwrap_or_else(|| StageError::process_failure(None, &[]));
    let _ = updates
        .send(JobUpdate {
            job_id: id,
            event: DownloadEvent::Finished(Err(err)),
        })
        .await;
}

async fn run_attempt(
    id: u64,
    invocation: &Invocation,
    args: &[String],
    output: &Path,
    updates: &mpsc::Sender<JobUpdate>,
    token: &CancellationToken,
) -> AttemptOutcome {
    let mut cmd = match invocation {
        Invocation::Direct(command) => {
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        }
        Invocation::PythonModule => {
            let mut cmd = Command::new(platform::python_launcher());
            cmd.arg("-m").arg("yt_dlp").args(args);
            cmd
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return AttemptOutcome::Failed(StageError::DownloadLaunchFailure(e.to_string())),
    };

    // stderr collector: bounded tail for diagnostics, plus the ERROR marker.
    // The marker flags the job but never aborts it; we still wait for exit.
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            let mut saw_error = false;
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!("yt-dlp stderr: {}", line);
                if line.contains("ERROR") {
                    saw_error = true;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            (tail, saw_error)
        })
    });

    // stdout: push a progress event for every line carrying a percentage.
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.start_kill();
                    return AttemptOutcome::Cancelled;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        debug!("yt-dlp: {}", line);
                        if let Some(percent) = parse_percent(&line) {
                            let _ = updates
                                .send(JobUpdate {
                                    job_id: id,
                                    event: DownloadEvent::Progress { percent, line },
                                })
                                .await;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }

    let status = tokio::select! {
        _ = token.cancelled() => {
            let _ = child.start_kill();
            return AttemptOutcome::Cancelled;
        }
        status = child.wait() => match status {
            Ok(s) => s,
            Err(e) => {
                return AttemptOutcome::Failed(StageError::DownloadLaunchFailure(e.to_string()))
            }
        }
    };

    let (stderr_tail, saw_error) = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Default::default(),
    };
    if saw_error {
        warn!("job {}: downloader wrote ERROR to stderr", id);
    }

    if status.success() {
        match std::fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => return AttemptOutcome::Success(output.to_path_buf()),
            Ok(_) => return AttemptOutcome::EmptyFile,
            // Exit 0 with no file at all: treat as a process failure so the
            // fallback still gets its chance.
            Err(_) => {}
        }
    }
    AttemptOutcome::Failed(StageError::process_failure(status.code(), &stderr_tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_parsing() {
        assert_eq!(
            parse_percent("[download]  45.2% of ~10.5MiB at 2.3MiB/s"),
            Some(45.2)
        );
        assert_eq!(parse_percent("[download] 100% of 3.50MiB"), Some(100.0));
        assert_eq!(parse_percent("[download] Destination: out.mp4"), None);
        assert_eq!(parse_percent(""), None);
    }

    #[test]
    fn args_reproduce_cli_contract() {
        let args = download_args(
            "best[ext=mp4]",
            Path::new("/tmp/stagelit/out.mp4"),
            "https://youtu.be/abc",
        );
        assert_eq!(
            args,
            vec![
                "--no-warnings",
                "--no-playlist",
                "--no-check-certificates",
                "--newline",
                "--progress",
                "-f",
                "best[ext=mp4]",
                "-o",
                "/tmp/stagelit/out.mp4",
                "https://youtu.be/abc",
            ]
        );
    }

    #[test]
    fn candidate_chain_allows_at_most_one_retry() {
        let system = Downloader {
            command: "yt-dlp".to_string(),
            origin: DownloaderOrigin::SystemPath,
            version: None,
        };
        assert_eq!(
            candidates_for(&system),
            vec![
                Invocation::Direct("yt-dlp".to_string()),
                Invocation::PythonModule
            ]
        );

        let module = Downloader {
            command: platform::python_launcher().to_string(),
            origin: DownloaderOrigin::PythonModule,
            version: None,
        };
        assert_eq!(candidates_for(&module), vec![Invocation::PythonModule]);
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;
        use tokio::time::{timeout, Duration};

        /// Write an executable shell script standing in for yt-dlp. With the
        /// contract argument list, the output path is `$9` (after `-o`).
        fn fake_script(dir: &std::path::Path, name: &str, body: &str) -> Invocation {
            let script = dir.join(name);
            std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            Invocation::Direct(script.display().to_string())
        }

        fn start(
            candidates: Vec<Invocation>,
            output: &std::path::Path,
        ) -> (DownloadHandle, mpsc::Receiver<JobUpdate>) {
            let (tx, rx) = mpsc::channel(16);
            let handle = spawn_with_candidates(
                candidates,
                "https://example.com/v".to_string(),
                output.to_path_buf(),
                "best".to_string(),
                tx,
            );
            (handle, rx)
        }

        async fn drain(rx: &mut mpsc::Receiver<JobUpdate>) -> Vec<JobUpdate> {
            let mut out = Vec::new();
            while let Ok(Some(update)) = timeout(Duration::from_secs(10), rx.recv()).await {
                let finished = matches!(update.event, DownloadEvent::Finished(_));
                out.push(update);
                if finished {
                    break;
                }
            }
            out
        }

        #[tokio::test]
        async fn streams_progress_then_succeeds() {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("out.mp4");
            let script = fake_script(
                dir.path(),
                "fake-yt-dlp",
                "echo '[download]  12.5% of 4MiB'\n\
                 echo '[download] 100% of 4MiB'\n\
                 printf data > \"$9\"",
            );

            let (handle, mut rx) = start(vec![script], &output);
            let updates = drain(&mut rx).await;
            assert!(updates.iter().all(|u| u.job_id == handle.id));

            let percents: Vec<f32> = updates
                .iter()
                .filter_map(|u| match &u.event {
                    DownloadEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect();
            assert_eq!(percents, vec![12.5, 100.0]);

            match &updates.last().unwrap().event {
                DownloadEvent::Finished(Ok(path)) => assert_eq!(path, &output),
                other => panic!("expected success, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn empty_output_is_distinct_failure_without_retry() {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("out.mp4");
            let empty = fake_script(dir.path(), "empty", ": > \"$9\"\nexit 0");
            // A second candidate that would succeed. It must never run,
            // because an exit-0 empty file is terminal.
            let never = fake_script(dir.path(), "never", "printf data > \"$9\"\ntouch \"$9.ran\"");

            let (_handle, mut rx) = start(vec![empty, never], &output);
            let updates = drain(&mut rx).await;
            match &updates.last().unwrap().event {
                DownloadEvent::Finished(Err(StageError::DownloadEmptyResult)) => {}
                other => panic!("expected empty-result failure, got {:?}", other),
            }
            assert!(!dir.path().join("out.mp4.ran").exists());
        }

        #[tokio::test]
        async fn stderr_tail_reaches_the_error() {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("out.mp4");
            let failing = fake_script(
                dir.path(),
                "failing",
                "echo 'ERROR: Video unavailable' >&2\nexit 1",
            );

            let (_handle, mut rx) = start(vec![failing], &output);
            let updates = drain(&mut rx).await;
            match &updates.last().unwrap().event {
                DownloadEvent::Finished(Err(StageError::DownloadProcess { detail })) => {
                    assert!(detail.contains("Video unavailable"), "detail: {}", detail);
                }
                other => panic!("expected process failure, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn failed_attempt_falls_back_exactly_once() {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("out.mp4");
            let marker = dir.path().join("first-ran");
            let failing = fake_script(
                dir.path(),
                "failing",
                &format!("touch {}\nexit 1", marker.display()),
            );
            let fallback = fake_script(dir.path(), "fallback", "printf data > \"$9\"");

            let (_handle, mut rx) = start(vec![failing, fallback], &output);
            let updates = drain(&mut rx).await;

            assert!(marker.exists(), "primary candidate never ran");
            match &updates.last().unwrap().event {
                DownloadEvent::Finished(Ok(path)) => assert_eq!(path, &output),
                other => panic!("expected fallback success, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn cancel_kills_and_goes_silent() {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("out.mp4");
            let slow = fake_script(dir.path(), "slow", "echo '[download] 10.0%'\nsleep 30");

            let (handle, mut rx) = start(vec![slow], &output);

            // First progress proves the job is live.
            let first = timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(first.event, DownloadEvent::Progress { .. }));

            handle.cancel();

            // No Finished (or any other) event may arrive after the cancel.
            let late = timeout(Duration::from_millis(500), rx.recv()).await;
            assert!(late.is_err(), "got event after cancel: {:?}", late);
        }
    }
}
