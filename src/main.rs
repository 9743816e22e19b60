//! CLI entry point for netsession.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use netsession_core::{
    DataTaskResult, DownloadObserver, DownloadTaskResult, Request, Session, SessionConfig, Task,
    TaskInfo,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

mod app_config;
mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = app_config::load_file_config(args.config.as_deref())?;
    let mut config = file_config.apply_to(SessionConfig::default())?;
    if let Some(secs) = args.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    for (name, value) in &args.headers {
        config.additional_headers.insert(name.clone(), value.clone());
    }
    debug!(?config, "session configuration resolved");

    match args.command {
        Command::Get { url, output } => {
            let session = Session::builder().config(config).build()?;
            let request = parse_request(&url)?;
            let result = run_data(&session, request, None).await?;
            write_body(&result, output.as_deref())
        }
        Command::Upload {
            url,
            file,
            data,
            method,
        } => {
            let body = match (file, data) {
                (Some(path), _) => fs::read(&path)
                    .with_context(|| format!("Failed to read upload body '{}'", path.display()))?,
                (None, Some(data)) => data.into_bytes(),
                (None, None) => bail!("upload needs --file or --data"),
            };
            let session = Session::builder().config(config).build()?;
            let request = parse_request(&url)?.with_method(method);
            let result = run_data(&session, request, Some(body)).await?;
            write_body(&result, None)
        }
        Command::Download { url, output } => {
            let progress = Arc::new(ProgressReporter::new(args.quiet));
            let session = Session::builder()
                .config(config)
                .download_observer(Arc::clone(&progress) as Arc<dyn DownloadObserver>)
                .build()?;
            let request = parse_request(&url)?;
            let destination = output.unwrap_or_else(|| default_destination(request.url()));
            let result = run_download(&session, request).await?;
            progress.finish();
            let (location, response) = result.into_result()?;
            move_file(&location, &destination)?;
            info!(
                status = response.status().as_u16(),
                path = %destination.display(),
                "Download complete"
            );
            Ok(())
        }
    }
}

fn parse_request(url: &str) -> Result<Request> {
    Request::get(url).with_context(|| format!("Invalid URL '{url}'"))
}

/// Runs a data or upload task to completion. Ctrl-C cancels it.
async fn run_data(
    session: &Session,
    request: Request,
    body: Option<Vec<u8>>,
) -> Result<DataTaskResult> {
    let (tx, rx) = oneshot::channel();
    let deliver = move |result: DataTaskResult| {
        let _ = tx.send(result);
    };
    let task: Box<dyn Task> = match body {
        Some(body) => Box::new(session.upload_task(request, body, deliver)),
        None => Box::new(session.data_task(request, deliver)),
    };
    await_result(task.as_ref(), rx).await
}

async fn run_download(session: &Session, request: Request) -> Result<DownloadTaskResult> {
    let (tx, rx) = oneshot::channel();
    let task = session.download_task(request, move |result: DownloadTaskResult| {
        let _ = tx.send(result);
    });
    await_result(&task, rx).await
}

async fn await_result<T>(task: &dyn Task, mut rx: oneshot::Receiver<T>) -> Result<T> {
    info!(task_id = %task.id(), url = %task.original_request().url(), "Starting request");
    task.resume();
    tokio::select! {
        result = &mut rx => return result.context("task dropped its result"),
        _ = tokio::signal::ctrl_c() => {}
    }
    warn!("Interrupted; cancelling");
    task.cancel();
    rx.await.context("task dropped its result")
}

fn write_body(result: &DataTaskResult, output: Option<&Path>) -> Result<()> {
    if let Some(error) = result.error() {
        bail!("request failed: {error}");
    }
    if let Some(response) = result.response() {
        info!(status = response.status().as_u16(), bytes = result.body().len(), "Response received");
    }
    match output {
        Some(path) => fs::write(path, result.body())
            .with_context(|| format!("Failed to write '{}'", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(result.body())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn default_destination(url: &Url) -> PathBuf {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("download");
    PathBuf::from(name)
}

/// Moves the finished temporary file into place, copying across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("Failed to write '{}'", to.display()))?;
    if let Err(e) = fs::remove_file(from) {
        warn!(path = %from.display(), error = %e, "Failed to remove temporary file");
    }
    Ok(())
}

/// Drives a progress bar from download observer events.
struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template("{bytes}/{total_bytes} {wide_bar} {bytes_per_sec}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl DownloadObserver for ProgressReporter {
    fn did_write_data(
        &self,
        _session: &Session,
        _task: &TaskInfo,
        _bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    ) {
        if let Some(total) = total_bytes_expected {
            self.bar.set_length(total);
        }
        self.bar.set_position(total_bytes_written);
    }

    fn did_finish_downloading(&self, _session: &Session, task: &TaskInfo, location: &Path) {
        debug!(task_id = %task.id(), path = %location.display(), "download landed");
    }
}
