//! Serial link to the microcontroller.
//!
//! The device streams one JSON reading per line and accepts newline
//! terminated commands: `ventilo:ON` / `ventilo:OFF` for the fan and a bare
//! `HH:MM:SS` to set its clock.

use std::{
    fmt,
    io::{self, BufRead, BufReader, ErrorKind, Read, Write},
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::error::{CaptureError, DeviceError, ValidationError};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// How often the device clock is reset from the server clock.
pub const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Read timeout on the port; bounds how long the reader thread takes to
/// notice that capture has stopped.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanCommand {
    On,
    Off,
}

impl FanCommand {
    fn line(self) -> String {
        format!("ventilo:{self}")
    }
}

impl fmt::Display for FanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FanCommand::On => "ON",
            FanCommand::Off => "OFF",
        })
    }
}

/// `ON` or `OFF`, case-insensitive.
impl FromStr for FanCommand {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(FanCommand::On),
            "OFF" => Ok(FanCommand::Off),
            _ => Err(ValidationError::parameter("action", s, "expected ON or OFF")),
        }
    }
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

/// Shared write half of the device connection. Cheap to clone.
#[derive(Clone)]
pub struct DeviceLink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl DeviceLink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write `line` plus a newline. Serial writes block, so they run on the
    /// blocking pool.
    pub async fn send_line(&self, line: String) -> Result<(), DeviceError> {
        let writer = self.writer.clone();
        let written = tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()
        })
        .await
        .map_err(io::Error::other)?;
        Ok(written?)
    }

    pub async fn set_fan(&self, command: FanCommand) -> Result<(), DeviceError> {
        self.send_line(command.line()).await?;
        info!(%command, "Fan command sent to device");
        Ok(())
    }

    pub async fn sync_clock(&self, now: NaiveDateTime) -> Result<(), DeviceError> {
        let time = now.format("%H:%M:%S").to_string();
        self.send_line(time.clone()).await?;
        debug!(%time, "Device clock synchronised");
        Ok(())
    }
}

/// Push the server time to the device every `every`, first tick at once.
/// Runs until dropped; failed writes are logged and retried next tick.
pub async fn run_clock_sync<C>(link: DeviceLink, every: Duration, clock: C)
where
    C: Fn() -> NaiveDateTime,
{
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = link.sync_clock(clock()).await {
            warn!(error = %e, "Device clock sync failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Open a serial device in raw mode, returning the read half and a
/// [`DeviceLink`] over a clone of the same port.
pub fn open_serial(
    path: &Path,
    baud_rate: u32,
) -> Result<(Box<dyn SerialPort>, DeviceLink), CaptureError> {
    let serial_error = |source| CaptureError::Serial {
        path: path.to_path_buf(),
        baud_rate,
        source,
    };
    let port = serialport::new(path.to_string_lossy(), baud_rate)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
        .map_err(serial_error)?;
    let writer = port.try_clone().map_err(serial_error)?;
    info!(path = %path.display(), baud_rate, "Serial port opened");
    Ok((port, DeviceLink::new(writer)))
}

/// Split a blocking byte stream into lines and hand them to `lines`.
///
/// Lines are forwarded as raw bytes; decoding is the consumer's job so a
/// corrupt line never ends the stream. Read timeouts are idle periods, not
/// errors. Returns at EOF, on a hard read error, or once the receiver is
/// gone.
pub fn pump_lines<R: Read>(reader: R, lines: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if lines.blocking_send(std::mem::take(&mut buf)).is_err() {
                    break;
                }
            }
            // A partial line stays in `buf` and is completed by the next read.
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                if lines.is_closed() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Serial read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use chrono::NaiveDate;

    use super::*;

    /// In-memory device: records every byte written to it.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingDevice(Arc<Mutex<Vec<u8>>>);

    impl RecordingDevice {
        pub(crate) fn written(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for RecordingDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Replays scripted reads, one chunk or error per call.
    struct ScriptedPort(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedPort {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    out[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, 20)
            .unwrap()
            .and_hms_opt(12, 5, 9)
            .unwrap()
    }

    async fn pumped(port: ScriptedPort) -> Vec<Vec<u8>> {
        let (tx, mut rx) = mpsc::channel(16);
        tokio::task::spawn_blocking(move || pump_lines(port, tx))
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn fan_command_parses_on_and_off_only() {
        assert_eq!("ON".parse::<FanCommand>().unwrap(), FanCommand::On);
        assert_eq!(" off ".parse::<FanCommand>().unwrap(), FanCommand::Off);
        assert!("TOGGLE".parse::<FanCommand>().is_err());
        assert!("".parse::<FanCommand>().is_err());
    }

    #[tokio::test]
    async fn fan_commands_are_newline_terminated() {
        let device = RecordingDevice::default();
        let link = DeviceLink::new(device.clone());
        link.set_fan(FanCommand::On).await.unwrap();
        link.set_fan(FanCommand::Off).await.unwrap();
        assert_eq!(device.written(), "ventilo:ON\nventilo:OFF\n");
    }

    #[tokio::test]
    async fn clock_sync_writes_server_time() {
        let device = RecordingDevice::default();
        let link = DeviceLink::new(device.clone());
        link.sync_clock(noon()).await.unwrap();
        assert_eq!(device.written(), "12:05:09\n");
    }

    #[tokio::test]
    async fn clock_sync_loop_repeats_every_interval() {
        let device = RecordingDevice::default();
        let link = DeviceLink::new(device.clone());
        let _ = tokio::time::timeout(
            Duration::from_millis(250),
            run_clock_sync(link, Duration::from_millis(50), noon),
        )
        .await;
        let written = device.written();
        assert!(written.lines().count() >= 2, "{written:?}");
        assert!(written.lines().all(|l| l == "12:05:09"));
    }

    #[tokio::test]
    async fn pump_splits_lines_and_survives_timeouts() {
        let port = ScriptedPort(VecDeque::from([
            Ok(b"{\"temperature\":2".to_vec()),
            Err(io::Error::new(ErrorKind::TimedOut, "idle")),
            Ok(b"0.0}\n\xff\xfe\n".to_vec()),
            Ok(b"tail".to_vec()),
        ]));
        let lines = pumped(port).await;
        assert_eq!(
            lines,
            vec![
                b"{\"temperature\":20.0}\n".to_vec(),
                b"\xff\xfe\n".to_vec(),
                b"tail".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn pump_stops_on_hard_read_error() {
        let port = ScriptedPort(VecDeque::from([
            Ok(b"one\n".to_vec()),
            Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
            Ok(b"never\n".to_vec()),
        ]));
        assert_eq!(pumped(port).await, vec![b"one\n".to_vec()]);
    }
}
