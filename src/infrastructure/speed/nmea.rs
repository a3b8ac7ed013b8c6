//! NMEA 0183 speed backend
//!
//! Reads sentences from a GNSS receiver (a serial character device or a
//! capture file) on a background thread and keeps the latest speed over
//! ground. Handles `RMC` (knots) and `VTG` (km/h) from any talker.
//!
//! A reader parked in a blocking read cannot be interrupted, so the provider
//! keeps at most one reader for its lifetime: `stop` pauses it and a later
//! `start` resumes it instead of opening the source a second time.

use crate::domain::errors::ProviderError;
use crate::domain::models::SpeedSample;
use crate::domain::speed::{
    AuthorizationCheck, LatestSpeed, SpeedProvider, KMH_TO_MPH, KNOTS_TO_MPH,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

pub const SOURCE_NAME: &str = "GPS";
pub const LOCATION_CAPABILITY: &str = "location";

pub struct NmeaSpeedProvider {
    path: PathBuf,
    authorization: Arc<dyn AuthorizationCheck>,
    latest: Arc<LatestSpeed>,
    reader: Option<Reader>,
    started: bool,
    reader_spawns: usize,
}

struct Reader {
    thread: JoinHandle<()>,
    control: Arc<ReaderControl>,
}

#[derive(Debug, Default)]
struct ReaderControl {
    /// Lines read while inactive are discarded
    active: AtomicBool,
    /// The reader exits on the next line
    shutdown: AtomicBool,
}

impl Drop for NmeaSpeedProvider {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.control.active.store(false, Ordering::Release);
            reader.control.shutdown.store(true, Ordering::Release);
        }
    }
}

impl NmeaSpeedProvider {
    pub fn new(path: impl Into<PathBuf>, authorization: Arc<dyn AuthorizationCheck>) -> Self {
        Self {
            path: path.into(),
            authorization,
            latest: Arc::new(LatestSpeed::default()),
            reader: None,
            started: false,
            reader_spawns: 0,
        }
    }

    /// Reader threads spawned over the provider's lifetime
    pub(crate) fn reader_spawns(&self) -> usize {
        self.reader_spawns
    }

    fn spawn_reader(&mut self) -> Result<(), ProviderError> {
        let unavailable = |source| ProviderError::SourceUnavailable {
            path: self.path.display().to_string(),
            source,
        };
        let file = File::open(&self.path).map_err(unavailable)?;

        let control = Arc::new(ReaderControl::default());
        control.active.store(true, Ordering::Release);
        let latest = self.latest.clone();
        let reader_control = control.clone();
        let thread = thread::Builder::new()
            .name("nmea-reader".to_string())
            .spawn(move || read_sentences(BufReader::new(file), &latest, &reader_control))
            .map_err(unavailable)?;

        self.reader = Some(Reader { thread, control });
        self.reader_spawns += 1;
        Ok(())
    }
}

impl SpeedProvider for NmeaSpeedProvider {
    fn source(&self) -> &'static str {
        SOURCE_NAME
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        if self.started {
            return Ok(());
        }

        if !self.authorization.has_capability(LOCATION_CAPABILITY) {
            warn!("gps_start_blocked(no_{})", LOCATION_CAPABILITY);
            return Err(ProviderError::CapabilityDenied(LOCATION_CAPABILITY));
        }

        match &self.reader {
            Some(reader) if !reader.thread.is_finished() => {
                reader.control.active.store(true, Ordering::Release);
                debug!("Resuming NMEA reader");
            }
            _ => self.spawn_reader()?,
        }

        self.started = true;
        info!("gps_started ({})", self.path.display());
        Ok(())
    }

    fn stop(&mut self) {
        if !std::mem::take(&mut self.started) {
            return;
        }
        if let Some(reader) = &self.reader {
            reader.control.active.store(false, Ordering::Release);
        }
        info!("gps_stopped");
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn latest(&self) -> SpeedSample {
        self.latest.sample(SOURCE_NAME)
    }
}

/// Feed every parsable sentence into `latest` until EOF, an I/O error, or
/// shutdown. Lines read while paused are dropped.
fn read_sentences<R: BufRead>(reader: R, latest: &LatestSpeed, control: &ReaderControl) {
    for line in reader.lines() {
        if control.shutdown.load(Ordering::Acquire) {
            break;
        }
        if !control.active.load(Ordering::Acquire) {
            continue;
        }
        match line {
            Ok(line) => {
                if let Some(raw_mph) = parse_sentence(&line) {
                    trace!("gps_mph={:.2}", raw_mph);
                    latest.store_mph(raw_mph);
                }
            }
            Err(e) => {
                warn!("NMEA source read failed: {}", e);
                return;
            }
        }
    }
    debug!("NMEA reader finished");
}

/// Speed over ground in mph from an `RMC` or `VTG` sentence.
///
/// Returns `None` for other sentences, void fixes, empty speed fields and
/// checksum mismatches.
pub fn parse_sentence(line: &str) -> Option<f64> {
    let body = line.trim().strip_prefix('$')?;
    let body = match body.split_once('*') {
        Some((body, checksum)) if checksum_matches(body, checksum) => body,
        Some(_) => return None,
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    match fields[0].get(2..)? {
        // $xxRMC,time,status,lat,N,lon,E,speed_knots,course,...
        "RMC" => {
            if fields.len() < 8 || fields[2] != "A" {
                return None;
            }
            fields[7].parse::<f64>().ok().map(|knots| knots * KNOTS_TO_MPH)
        }
        // $xxVTG,course,T,course,M,speed,N,speed_kmh,K[,mode]
        "VTG" => {
            if fields.len() < 8 || fields.get(9) == Some(&"N") {
                return None;
            }
            fields[7].parse::<f64>().ok().map(|kmh| kmh * KMH_TO_MPH)
        }
        _ => None,
    }
}

fn checksum_matches(body: &str, checksum: &str) -> bool {
    match u8::from_str_radix(checksum.trim(), 16) {
        Ok(expected) => body.bytes().fold(0u8, |acc, b| acc ^ b) == expected,
        Err(_) => false,
    }
}
