use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::{mpsc, Mutex},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::{
    device::{
        open_serial, pump_lines, run_clock_sync, DeviceLink, FanCommand, CLOCK_SYNC_INTERVAL,
        DEFAULT_BAUD_RATE,
    },
    error::{CaptureError, DeviceError, ValidationError},
    gate::{local_now, Admission, GateOutcome, Sample, SampleGate},
};

/// Lines buffered between the serial reader thread and the gate.
const LINE_BUFFER: usize = 64;

/// Where raw readings come from. Character devices are opened as serial
/// ports at `baud_rate`; anything else (FIFO, plain file) is read as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingSource {
    pub path: PathBuf,
    pub baud_rate: u32,
}

impl ReadingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStart {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CaptureStatus {
    pub running: bool,
    pub source: String,
    pub baud_rate: u32,
    /// True while a serial device is open and accepting commands.
    pub device_connected: bool,
    /// `hourly` or the list of `HH:MM` instants.
    pub policy: String,
}

/// Owns the Reading Source listener task. Cheap to clone.
#[derive(Clone)]
pub struct CaptureController {
    inner: Arc<Inner>,
}

struct Inner {
    gate: Arc<SampleGate>,
    source: ReadingSource,
    running: Mutex<Option<Listener>>,
}

struct Listener {
    task: JoinHandle<()>,
    /// Write half of a serial source; `None` for files and FIFOs.
    link: Option<DeviceLink>,
}

impl Listener {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

impl CaptureController {
    pub fn new(gate: Arc<SampleGate>, source: ReadingSource) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate,
                source,
                running: Mutex::new(None),
            }),
        }
    }

    /// Open the source and spawn the listener, unless one is still running.
    pub async fn start(&self) -> Result<CaptureStart, CaptureError> {
        let mut running = self.inner.running.lock().await;
        if running.as_ref().is_some_and(Listener::is_live) {
            return Ok(CaptureStart::AlreadyRunning);
        }

        let source = &self.inner.source;
        let gate = self.inner.gate.clone();
        let listener = if is_char_device(&source.path).await? {
            spawn_serial(gate, source).await?
        } else {
            spawn_stream(gate, &source.path).await?
        };
        info!(
            source = %source.path.display(),
            serial = listener.link.is_some(),
            policy = %self.inner.gate.policy(),
            "Capture started"
        );
        *running = Some(listener);
        Ok(CaptureStart::Started)
    }

    pub async fn status(&self) -> CaptureStatus {
        let running = self.inner.running.lock().await;
        let live = running.as_ref().filter(|l| l.is_live());
        CaptureStatus {
            running: live.is_some(),
            source: self.inner.source.path.display().to_string(),
            baud_rate: self.inner.source.baud_rate,
            device_connected: live.is_some_and(|l| l.link.is_some()),
            policy: self.inner.gate.policy().to_string(),
        }
    }

    /// Switch the device fan. Needs a running serial capture.
    pub async fn set_fan(&self, command: FanCommand) -> Result<(), DeviceError> {
        let link = {
            let running = self.inner.running.lock().await;
            running
                .as_ref()
                .filter(|l| l.is_live())
                .and_then(|l| l.link.clone())
        };
        link.ok_or(DeviceError::NotConnected)?.set_fan(command).await
    }

    /// Stand in for an open serial device.
    #[cfg(test)]
    pub(crate) async fn attach_device(&self, link: DeviceLink) {
        *self.inner.running.lock().await = Some(Listener {
            task: tokio::spawn(std::future::pending::<()>()),
            link: Some(link),
        });
    }
}

async fn is_char_device(path: &Path) -> Result<bool, CaptureError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| CaptureError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        Ok(meta.file_type().is_char_device())
    }
    #[cfg(not(unix))]
    {
        Ok(!meta.is_file())
    }
}

/// Serial source: a blocking reader thread feeds lines to the gate while
/// the device clock is kept in sync. Both stop when the port closes.
async fn spawn_serial(
    gate: Arc<SampleGate>,
    source: &ReadingSource,
) -> Result<Listener, CaptureError> {
    let path = source.path.clone();
    let baud_rate = source.baud_rate;
    let (port, link) = tokio::task::spawn_blocking(move || open_serial(&path, baud_rate))
        .await
        .map_err(|e| CaptureError::Open {
            path: source.path.clone(),
            source: io::Error::other(e),
        })??;

    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::task::spawn_blocking(move || pump_lines(port, tx));

    let sync = link.clone();
    let path = source.path.clone();
    let task = tokio::spawn(async move {
        tokio::select! {
            _ = run_lines(gate, rx, local_now) => {}
            _ = run_clock_sync(sync, CLOCK_SYNC_INTERVAL, local_now) => {}
        }
        info!(source = %path.display(), "Serial device closed, capture stopped");
    });
    Ok(Listener {
        task,
        link: Some(link),
    })
}

async fn spawn_stream(gate: Arc<SampleGate>, path: &Path) -> Result<Listener, CaptureError> {
    let file = File::open(path).await.map_err(|source| CaptureError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let path = path.to_path_buf();
    let task = tokio::spawn(async move {
        run_source(gate, BufReader::new(file), local_now).await;
        info!(source = %path.display(), "Reading source closed, capture stopped");
    });
    Ok(Listener { task, link: None })
}

/// Feed every line of `reader` through the gate until EOF.
///
/// Lines are split on raw bytes, so a line that is not UTF-8 is discarded
/// like any other invalid reading. Only EOF or an I/O error ends the feed.
pub async fn run_source<R, C>(gate: Arc<SampleGate>, mut reader: R, clock: C)
where
    R: AsyncBufRead + Unpin,
    C: Fn() -> NaiveDateTime,
{
    let mut feed = LineFeed::new(gate, clock);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => feed.push(&buf),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Reading source failed");
                break;
            }
        }
    }

    feed.finish().await;
}

/// Same as [`run_source`] for lines already split by a reader thread.
pub async fn run_lines<C>(gate: Arc<SampleGate>, mut lines: mpsc::Receiver<Vec<u8>>, clock: C)
where
    C: Fn() -> NaiveDateTime,
{
    let mut feed = LineFeed::new(gate, clock);
    while let Some(line) = lines.recv().await {
        feed.push(&line);
    }
    feed.finish().await;
}

/// Decodes lines and hands captures to the gate. Writes run on their own
/// tasks so the reader never waits on the store.
struct LineFeed<C> {
    gate: Arc<SampleGate>,
    clock: C,
    commits: JoinSet<GateOutcome>,
}

impl<C: Fn() -> NaiveDateTime> LineFeed<C> {
    fn new(gate: Arc<SampleGate>, clock: C) -> Self {
        Self {
            gate,
            clock,
            commits: JoinSet::new(),
        }
    }

    fn push(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                let e = ValidationError::Malformed(format!("line is not UTF-8: {e}"));
                error!(error = %e, "Discarding invalid raw reading");
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        let sample = match Sample::from_line(line) {
            Ok(sample) => sample,
            Err(e) => {
                error!(error = %e, "Discarding invalid raw reading");
                return;
            }
        };

        let now = (self.clock)();
        match self.gate.admit(&sample, now) {
            Admission::Skipped(reason) => debug!(at = %now, ?reason, "Raw reading not captured"),
            Admission::Pending(pending) => {
                let gate = self.gate.clone();
                self.commits.spawn(async move { gate.commit(pending).await });
            }
        }

        while let Some(done) = self.commits.try_join_next() {
            log_join(done);
        }
    }

    async fn finish(mut self) {
        while let Some(done) = self.commits.join_next().await {
            log_join(done);
        }
    }
}

fn log_join(done: Result<GateOutcome, tokio::task::JoinError>) {
    if let Err(e) = done {
        error!(error = %e, "Commit task panicked");
    }
}
