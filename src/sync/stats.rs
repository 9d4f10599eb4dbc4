use super::events::{Observer, ZsyncEvent};
use crate::transport::ContentRange;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counters and timings of one zsync invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZsyncStats {
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub total_bytes_downloaded: u64,
    pub bytes_downloaded_for_control_file: u64,
    pub bytes_downloaded_from_remote_file: u64,
    pub bytes_read_by_input_file: BTreeMap<PathBuf, u64>,
    pub bytes_written_by_input_file: BTreeMap<PathBuf, u64>,
    pub total_elapsed_ms: u64,
    pub elapsed_downloading_ms: u64,
    pub elapsed_downloading_control_file_ms: u64,
    pub elapsed_downloading_remote_file_ms: u64,
    pub range_requests: Vec<RangeRequestStats>,
}

/// Timing of one range request
#[derive(Debug, Clone, Serialize)]
pub struct RangeRequestStats {
    pub ranges: Vec<ContentRange>,
    pub elapsed_ms: u64,
}

impl ZsyncStats {
    /// Target bytes recovered from local inputs
    pub fn bytes_matched_from_seeds(&self) -> u64 {
        self.bytes_written_by_input_file.values().sum()
    }
}

#[derive(Debug, Default)]
struct State {
    stats: ZsyncStats,
    started: Option<Instant>,
    finished: bool,
    download_started: Option<Instant>,
    downloaded: u64,
    ranges: Vec<ContentRange>,
    input: Option<InputFile>,
}

#[derive(Debug)]
struct InputFile {
    path: PathBuf,
    read_before: u64,
    written_before: u64,
}

/// Observer that accumulates [`ZsyncStats`]
#[derive(Debug, Default)]
pub struct StatsObserver {
    state: Mutex<State>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the statistics gathered so far
    pub fn stats(&self) -> ZsyncStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        if !state.finished {
            if let Some(started) = state.started {
                stats.total_elapsed_ms = millis(started.elapsed());
            }
        }
        stats
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn finish_download(&mut self) -> (u64, u64) {
        let elapsed = self
            .download_started
            .take()
            .map(|started| millis(started.elapsed()))
            .unwrap_or(0);
        let bytes = std::mem::take(&mut self.downloaded);
        self.stats.elapsed_downloading_ms += elapsed;
        self.stats.total_bytes_downloaded += bytes;
        (elapsed, bytes)
    }
}

impl Observer for StatsObserver {
    fn on_event(&self, event: &ZsyncEvent) {
        let mut state = self.lock();
        match event {
            ZsyncEvent::ZsyncStarted { .. } => {
                state.started = Some(Instant::now());
            }
            ZsyncEvent::ControlFileDownloadInitiated { .. } => {
                state.download_started = Some(Instant::now());
                state.downloaded = 0;
            }
            ZsyncEvent::ControlFileDownloadComplete => {
                let (elapsed, bytes) = state.finish_download();
                state.stats.elapsed_downloading_control_file_ms += elapsed;
                state.stats.bytes_downloaded_for_control_file += bytes;
            }
            ZsyncEvent::RemoteFileDownloadInitiated { ranges, .. } => {
                state.download_started = Some(Instant::now());
                state.downloaded = 0;
                state.ranges = ranges.clone();
            }
            ZsyncEvent::RemoteFileDownloadComplete => {
                let (elapsed, bytes) = state.finish_download();
                state.stats.elapsed_downloading_remote_file_ms += elapsed;
                state.stats.bytes_downloaded_from_remote_file += bytes;
                let ranges = std::mem::take(&mut state.ranges);
                state.stats.range_requests.push(RangeRequestStats {
                    ranges,
                    elapsed_ms: elapsed,
                });
            }
            ZsyncEvent::InputFileReadStarted { path, .. } => {
                state.input = Some(InputFile {
                    path: path.clone(),
                    read_before: state.stats.total_bytes_read,
                    written_before: state.stats.total_bytes_written,
                });
            }
            ZsyncEvent::InputFileReadComplete { .. } => {
                if let Some(input) = state.input.take() {
                    let read = state.stats.total_bytes_read - input.read_before;
                    let written = state.stats.total_bytes_written - input.written_before;
                    *state
                        .stats
                        .bytes_read_by_input_file
                        .entry(input.path.clone())
                        .or_default() += read;
                    *state
                        .stats
                        .bytes_written_by_input_file
                        .entry(input.path)
                        .or_default() += written;
                }
            }
            ZsyncEvent::BytesRead { bytes } => state.stats.total_bytes_read += bytes,
            ZsyncEvent::BytesWritten { bytes } => state.stats.total_bytes_written += bytes,
            ZsyncEvent::BytesDownloaded { bytes } => state.downloaded += bytes,
            ZsyncEvent::ZsyncComplete { .. } | ZsyncEvent::ZsyncFailed { .. } => {
                if let Some(started) = state.started {
                    state.stats.total_elapsed_ms = millis(started.elapsed());
                }
                state.finished = true;
            }
            _ => {}
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
