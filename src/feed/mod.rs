use std::{io, mem, path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    exchange::Exchange,
    perf::{DEFAULT_BATCH_SIZE, batch::process_in_batches_yielding},
    protocol::{self, ProtocolError},
    state::CaptureState,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub path: PathBuf,
    /// Keep polling the file for appended records after the first pass.
    pub follow: bool,
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl FeedConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            follow: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Sent after every ingested chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedUpdate {
    pub recorded: usize,
    pub rejected: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub recorded: usize,
    pub rejected: usize,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read capture file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("feed task failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
pub struct FeedHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<FeedSummary, FeedError>>>,
}

impl FeedHandle {
    /// Waits for the feed to reach the end of its input. A feed following
    /// a line-delimited capture only ends after [`shutdown`](Self::shutdown).
    pub async fn wait(mut self) -> Result<FeedSummary, FeedError> {
        match self.join_handle.take() {
            Some(handle) => handle.await?,
            None => Ok(FeedSummary::default()),
        }
    }

    pub async fn shutdown(mut self) -> Result<FeedSummary, FeedError> {
        if let Some(tx) = self.shutdown.take() {
            if tx.send(()).is_err() {
                debug!("feed already finished before shutdown");
            }
        }

        let mut join_handle = match self.join_handle.take() {
            Some(handle) => handle,
            None => return Ok(FeedSummary::default()),
        };

        tokio::select! {
            join_result = &mut join_handle => join_result?,
            _ = time::sleep(Duration::from_secs(2)) => {
                warn!("capture feed shutdown timed out; aborting");
                join_handle.abort();
                Ok(FeedSummary::default())
            }
        }
    }
}

/// Opens the capture file and starts ingesting it into `state` in the
/// background. Opening happens up front so a missing file fails here.
pub async fn spawn(
    state: Arc<CaptureState>,
    config: FeedConfig,
    updates: Option<mpsc::UnboundedSender<FeedUpdate>>,
) -> Result<FeedHandle, FeedError> {
    let file = File::open(&config.path)
        .await
        .map_err(|source| FeedError::Open {
            path: config.path.clone(),
            source,
        })?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    info!(path = %config.path.display(), follow = config.follow, "capture feed started");

    let join_handle = tokio::spawn(async move {
        let result = run_feed(file, &state, &config, updates.as_ref(), shutdown_rx).await;
        match &result {
            Ok(summary) => info!(
                recorded = summary.recorded,
                rejected = summary.rejected,
                "capture feed finished"
            ),
            Err(error) => warn!(?error, "capture feed terminated with error"),
        }
        result
    });

    Ok(FeedHandle {
        shutdown: Some(shutdown_tx),
        join_handle: Some(join_handle),
    })
}

async fn run_feed(
    file: File,
    state: &CaptureState,
    config: &FeedConfig,
    updates: Option<&mpsc::UnboundedSender<FeedUpdate>>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<FeedSummary, FeedError> {
    let mut summary = FeedSummary::default();
    let mut reader = BufReader::new(file);

    let mut text = String::new();
    reader.read_to_string(&mut text).await?;
    if text.trim_start().starts_with('[') {
        let decoded = protocol::decode_document(&text);
        ingest(state, decoded, config.batch_size, updates, &mut summary).await;
        if config.follow {
            warn!(
                path = %config.path.display(),
                "capture is a JSON array; appended records will not be followed"
            );
        }
        return Ok(summary);
    }

    // An unterminated last line may still be mid-write when following.
    let mut partial = if config.follow {
        let complete = text.rfind('\n').map_or(0, |index| index + 1);
        text.split_off(complete)
    } else {
        String::new()
    };

    let lines: Vec<&str> = text.lines().collect();
    if !config.follow || !lines.is_empty() {
        let decoded = decode_lines(&lines, config.batch_size).await;
        ingest(state, decoded, config.batch_size, updates, &mut summary).await;
    }
    if !config.follow {
        return Ok(summary);
    }

    loop {
        let lines = read_available_lines(&mut reader, &mut partial).await?;
        if !lines.is_empty() {
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            let decoded = decode_lines(&lines, config.batch_size).await;
            ingest(state, decoded, config.batch_size, updates, &mut summary).await;
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = time::sleep(config.poll_interval) => {}
        }
    }

    Ok(summary)
}

async fn decode_lines(lines: &[&str], batch_size: usize) -> Vec<Result<Exchange, ProtocolError>> {
    process_in_batches_yielding(lines, batch_size, |chunk| {
        chunk
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| protocol::decode_line(line))
            .collect()
    })
    .await
}

async fn ingest(
    state: &CaptureState,
    decoded: Vec<Result<Exchange, ProtocolError>>,
    batch_size: usize,
    updates: Option<&mpsc::UnboundedSender<FeedUpdate>>,
    summary: &mut FeedSummary,
) {
    let mut accepted = Vec::with_capacity(decoded.len());
    let mut rejected = 0;
    for result in decoded {
        match result {
            Ok(exchange) => accepted.push(exchange),
            Err(error) => {
                rejected += 1;
                warn!(%error, "skipping undecodable exchange record");
            }
        }
    }

    let recorded = accepted.len();
    let mut total = state.len().await;
    let mut remaining = accepted.into_iter().peekable();
    while remaining.peek().is_some() {
        let chunk: Vec<Exchange> = remaining.by_ref().take(batch_size.max(1)).collect();
        total = state.record_batch(chunk).await;
        tokio::task::yield_now().await;
    }

    summary.recorded += recorded;
    summary.rejected += rejected;
    debug!(recorded, rejected, total, "ingested capture chunk");

    if let Some(updates) = updates {
        let _ = updates.send(FeedUpdate {
            recorded,
            rejected,
            total,
        });
    }
}

/// Reads every complete line currently available. A trailing line without
/// a newline stays in `partial` until the rest of it is written.
async fn read_available_lines<R>(reader: &mut R, partial: &mut String) -> io::Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let read = reader.read_line(partial).await?;
        if read == 0 {
            break;
        }
        if partial.ends_with('\n') {
            lines.push(mem::take(partial));
        }
    }
    Ok(lines)
}
