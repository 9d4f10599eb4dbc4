use crate::transport::{ContentRange, TransferListener};
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Lifecycle event of a zsync invocation
///
/// Serialized as NDJSON with a `type` tag for machine consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZsyncEvent {
    ZsyncStarted {
        uri: String,
    },
    ControlFileDownloadInitiated {
        url: String,
    },
    ControlFileDownloadStarted {
        url: String,
        length: Option<u64>,
    },
    ControlFileDownloadComplete,
    ControlFileReadStarted {
        uri: String,
        length: Option<u64>,
    },
    ControlFileReadComplete,
    OutputFileWriteStarted {
        path: PathBuf,
        length: u64,
    },
    OutputFileWriteComplete {
        path: PathBuf,
    },
    InputFileReadStarted {
        path: PathBuf,
        length: Option<u64>,
    },
    InputFileReadComplete {
        path: PathBuf,
    },
    RemoteFileDownloadInitiated {
        url: String,
        ranges: Vec<ContentRange>,
    },
    RemoteFileDownloadStarted {
        url: String,
        length: Option<u64>,
    },
    RemoteFileRangeReceived {
        range: ContentRange,
    },
    RemoteFileDownloadComplete,
    BytesRead {
        bytes: u64,
    },
    BytesDownloaded {
        bytes: u64,
    },
    BytesWritten {
        bytes: u64,
    },
    ZsyncFailed {
        error: String,
    },
    ZsyncComplete {
        path: PathBuf,
    },
}

/// Receiver of lifecycle events
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &ZsyncEvent);
}

/// Fans events out to every registered observer, in registration order
#[derive(Clone, Default)]
pub struct EventDispatcher {
    observers: Vec<Arc<dyn Observer>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add(observer);
        dispatcher
    }

    pub fn add(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: ZsyncEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Prints every event as one JSON line on stdout
///
/// Byte counter events are frequent; they are only printed when
/// `include_counters` is set.
#[derive(Debug, Default)]
pub struct JsonObserver {
    include_counters: bool,
}

impl JsonObserver {
    pub fn new(include_counters: bool) -> Self {
        Self { include_counters }
    }
}

impl ZsyncEvent {
    /// Emit this event as JSON to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(
            self,
            ZsyncEvent::BytesRead { .. }
                | ZsyncEvent::BytesDownloaded { .. }
                | ZsyncEvent::BytesWritten { .. }
        )
    }
}

impl Observer for JsonObserver {
    fn on_event(&self, event: &ZsyncEvent) {
        if self.include_counters || !event.is_counter() {
            event.emit();
        }
    }
}

/// Which download a [`DownloadListener`] reports on
#[derive(Debug, Clone)]
enum Download {
    ControlFile,
    RemoteFile { ranges: Vec<ContentRange> },
}

/// Turns transfer callbacks into download events
#[derive(Debug, Clone)]
pub struct DownloadListener {
    events: EventDispatcher,
    download: Download,
}

impl DownloadListener {
    pub fn control_file(events: EventDispatcher) -> Self {
        Self {
            events,
            download: Download::ControlFile,
        }
    }

    pub fn remote_file(events: EventDispatcher, ranges: Vec<ContentRange>) -> Self {
        Self {
            events,
            download: Download::RemoteFile { ranges },
        }
    }
}

impl TransferListener for DownloadListener {
    fn initiating(&mut self, url: &Url) {
        let url = url.to_string();
        let event = match &mut self.download {
            Download::ControlFile => ZsyncEvent::ControlFileDownloadInitiated { url },
            Download::RemoteFile { ranges } => ZsyncEvent::RemoteFileDownloadInitiated {
                url,
                ranges: std::mem::take(ranges),
            },
        };
        self.events.emit(event);
    }

    fn started(&mut self, url: &Url, length: Option<u64>) {
        let url = url.to_string();
        let event = match self.download {
            Download::ControlFile => ZsyncEvent::ControlFileDownloadStarted { url, length },
            Download::RemoteFile { .. } => ZsyncEvent::RemoteFileDownloadStarted { url, length },
        };
        self.events.emit(event);
    }

    fn transferred(&mut self, bytes: u64) {
        self.events.emit(ZsyncEvent::BytesDownloaded { bytes });
    }

    fn closed(&mut self) {
        let event = match self.download {
            Download::ControlFile => ZsyncEvent::ControlFileDownloadComplete,
            Download::RemoteFile { .. } => ZsyncEvent::RemoteFileDownloadComplete,
        };
        self.events.emit(event);
    }
}

/// Reader that reports every read as a `BytesRead` event
pub struct ObservedReader<'a, R> {
    inner: R,
    events: &'a EventDispatcher,
}

impl<'a, R: Read> ObservedReader<'a, R> {
    pub fn new(inner: R, events: &'a EventDispatcher) -> Self {
        Self { inner, events }
    }
}

impl<R: Read> Read for ObservedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.events.emit(ZsyncEvent::BytesRead { bytes: n as u64 });
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ZsyncEvent>>);

    impl Observer for Recording {
        fn on_event(&self, event: &ZsyncEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_serialize_started_event() {
        let event = ZsyncEvent::ZsyncStarted {
            uri: "http://example.com/file.zsync".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"zsync_started"#));
        assert!(json.contains(r#""uri":"http://example.com/file.zsync""#));
    }

    #[test]
    fn test_serialize_range_event() {
        let event = ZsyncEvent::RemoteFileDownloadInitiated {
            url: "http://example.com/file".to_string(),
            ranges: vec![ContentRange::new(0, 2047), ContentRange::new(4096, 4097)],
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"remote_file_download_initiated"#));
        assert!(json.contains(r#""ranges":[{"first":0,"last":2047},{"first":4096,"last":4097}]"#));
    }

    #[test]
    fn test_serialize_unit_event() {
        let json = serde_json::to_string(&ZsyncEvent::ControlFileReadComplete).unwrap();
        assert_eq!(json, r#"{"type":"control_file_read_complete"}"#);
    }

    #[test]
    fn test_serialize_counter_event() {
        let event = ZsyncEvent::BytesWritten { bytes: 2048 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"bytes_written","bytes":2048}"#);
        assert!(event.is_counter());
    }

    #[test]
    fn test_dispatcher_fans_out_in_order() {
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());

        let mut dispatcher = EventDispatcher::with_observer(first.clone());
        dispatcher.add(second.clone());
        let cloned = dispatcher.clone();

        dispatcher.emit(ZsyncEvent::BytesRead { bytes: 1 });
        cloned.emit(ZsyncEvent::BytesRead { bytes: 2 });

        for recording in [first, second] {
            let events = recording.0.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert!(matches!(events[1], ZsyncEvent::BytesRead { bytes: 2 }));
        }
    }

    #[test]
    fn test_download_listener_events() {
        let recording = Arc::new(Recording::default());
        let events = EventDispatcher::with_observer(recording.clone());
        let url = Url::parse("http://example.com/file").unwrap();

        let mut listener =
            DownloadListener::remote_file(events, vec![ContentRange::new(0, 9)]);
        listener.initiating(&url);
        listener.started(&url, Some(10));
        listener.transferred(10);
        listener.closed();

        let events = recording.0.lock().unwrap();
        assert!(matches!(
            &events[0],
            ZsyncEvent::RemoteFileDownloadInitiated { ranges, .. } if ranges.len() == 1
        ));
        assert!(matches!(
            events[1],
            ZsyncEvent::RemoteFileDownloadStarted { length: Some(10), .. }
        ));
        assert!(matches!(events[2], ZsyncEvent::BytesDownloaded { bytes: 10 }));
        assert!(matches!(events[3], ZsyncEvent::RemoteFileDownloadComplete));
    }

    #[test]
    fn test_observed_reader_counts_bytes() {
        let recording = Arc::new(Recording::default());
        let events = EventDispatcher::with_observer(recording.clone());

        let mut reader = ObservedReader::new(&b"hello"[..], &events);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();

        let total: u64 = recording
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                ZsyncEvent::BytesRead { bytes } => *bytes,
                _ => 0,
            })
            .sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_empty_dispatcher() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.is_empty());
        dispatcher.emit(ZsyncEvent::ControlFileDownloadComplete);
    }
}
