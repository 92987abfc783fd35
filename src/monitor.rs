//! Periodic monitoring of a supply from a background thread.
//!
//! The link carries strictly paired request/response exchanges, so a supply that is
//! polled in the background and also driven from elsewhere must be shared through
//! [`SharedSupply`]: every access holds one lock for the whole write, delay and read.
//!
//! Each monitor cycle:
//! 1. measures voltage and current under the lock
//! 2. appends the sample to an in-memory window (older samples are dropped)
//! 3. writes a CSV row
//! 4. raises an [`Alert`] for each reading strictly above its threshold
//!
//! # Example
//! ```no_run
//! use bk_psu::config::{LinkConfig, MonitorConfig, ProtocolTiming};
//! use bk_psu::instrument::Bk1697b;
//! use bk_psu::monitor::{Monitor, SharedSupply};
//!
//! # fn main() -> bk_psu::error::PsuResult<()> {
//! let psu = Bk1697b::open(&LinkConfig::new("/dev/ttyACM0"), ProtocolTiming::default())?;
//! let shared = SharedSupply::new(psu);
//! let (tx, rx) = std::sync::mpsc::channel();
//!
//! let monitor = Monitor::start(shared.clone(), &MonitorConfig::default(), tx)?;
//! for alert in rx.iter().take(1) {
//!     println!("{}", alert);
//! }
//! let samples = monitor.stop();
//! println!("{} samples", samples);
//! shared.close()?;
//! # Ok(())
//! # }
//! ```

use crate::config::MonitorConfig;
use crate::data::{CsvLog, Sample};
use crate::error::{PsuError, PsuResult};
use crate::instrument::{Bk1697b, SerialTransport, Transport};
use chrono::Local;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A supply shared between threads. Clones refer to the same device.
pub struct SharedSupply<T: Transport = SerialTransport> {
    inner: Arc<Mutex<Bk1697b<T>>>,
}

impl<T: Transport> Clone for SharedSupply<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedSupply<T> {
    /// Wrap a supply for shared use.
    pub fn new(supply: Bk1697b<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(supply)),
        }
    }

    /// Run `f` with exclusive access to the supply.
    ///
    /// The lock is held for the whole closure, so several exchanges in one closure are
    /// never interleaved with another thread's.
    pub fn with<R>(&self, f: impl FnOnce(&mut Bk1697b<T>) -> PsuResult<R>) -> PsuResult<R> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    /// Close the link for every holder.
    pub fn close(&self) -> PsuResult<()> {
        self.lock()?.close();
        Ok(())
    }

    fn lock(&self) -> PsuResult<MutexGuard<'_, Bk1697b<T>>> {
        self.inner.lock().map_err(|_| PsuError::LockPoisoned)
    }
}

/// Which reading crossed its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Measured voltage
    Voltage,
    /// Measured current
    Current,
}

/// A reading above its configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Which reading
    pub kind: AlertKind,
    /// Measured value
    pub value: f64,
    /// Configured threshold
    pub threshold: f64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AlertKind::Voltage => write!(
                f,
                "Voltage {:.3} V exceeds {} V",
                self.value, self.threshold
            ),
            AlertKind::Current => write!(
                f,
                "Current {:.3} A exceeds {} A",
                self.value, self.threshold
            ),
        }
    }
}

/// Alerts for every reading in `sample` strictly above its threshold.
pub fn check_thresholds(sample: &Sample, config: &MonitorConfig) -> Vec<Alert> {
    let checks = [
        (AlertKind::Voltage, sample.voltage, config.voltage_threshold),
        (AlertKind::Current, sample.current, config.current_threshold),
    ];
    checks
        .into_iter()
        .filter_map(|(kind, value, threshold)| {
            value
                .filter(|v| *v > threshold)
                .map(|value| Alert {
                    kind,
                    value,
                    threshold,
                })
        })
        .collect()
}

type Window = Arc<Mutex<VecDeque<Sample>>>;

/// Handle to a running monitor thread.
pub struct Monitor {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<usize>>,
    window: Window,
    csv_path: PathBuf,
}

impl Monitor {
    /// Start polling `supply` on a new thread.
    ///
    /// # Errors
    /// Fails if the configuration is invalid, the CSV log cannot be created or the thread
    /// cannot be spawned.
    pub fn start<T: Transport + 'static>(
        supply: SharedSupply<T>,
        config: &MonitorConfig,
        alerts: Sender<Alert>,
    ) -> PsuResult<Self> {
        config.validate()?;
        let log = CsvLog::create(&config.log_dir)?;
        let csv_path = log.path().to_path_buf();
        let window: Window = Arc::new(Mutex::new(VecDeque::new()));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = Worker {
            supply,
            config: config.clone(),
            log,
            window: Arc::clone(&window),
            alerts,
        };
        let handle = std::thread::Builder::new()
            .name("psu-monitor".to_string())
            .spawn(move || worker.run(stop_rx))?;

        info!(
            "Monitoring started (every {:?}), logging to '{}'",
            config.interval,
            csv_path.display()
        );

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            window,
            csv_path,
        })
    }

    /// Copy of the samples currently in the window, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        lock_window(&self.window).iter().cloned().collect()
    }

    /// Path of the CSV log being written.
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Whether the polling thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and wait for the thread. Returns the number of samples taken.
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        // dropping the sender wakes the worker immediately
        self.stop_tx.take();
        let samples = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(samples)) => samples,
            Some(Err(_)) => {
                error!("Monitor thread panicked");
                0
            }
            None => 0,
        };
        info!("Monitoring stopped after {} samples", samples);
        samples
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

struct Worker<T: Transport> {
    supply: SharedSupply<T>,
    config: MonitorConfig,
    log: CsvLog,
    window: Window,
    alerts: Sender<Alert>,
}

impl<T: Transport> Worker<T> {
    fn run(mut self, stop_rx: mpsc::Receiver<()>) -> usize {
        let mut samples = 0;
        loop {
            match self.poll() {
                Ok(sample) => {
                    samples += 1;
                    self.record(sample);
                }
                Err(e) => {
                    error!("Monitor stopping: {}", e);
                    break;
                }
            }

            match stop_rx.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        samples
    }

    /// Read one sample. Recoverable reading failures become missing values; a closed
    /// link or poisoned lock is returned as an error and ends the monitor.
    fn poll(&self) -> PsuResult<Sample> {
        let (voltage, current) = self.supply.with(|psu| {
            let voltage = reading(psu.measure_voltage())?;
            let current = reading(psu.measure_current())?;
            Ok((voltage, current))
        })?;
        Ok(Sample {
            timestamp: Local::now(),
            voltage,
            current,
        })
    }

    fn record(&mut self, sample: Sample) {
        {
            let mut window = lock_window(&self.window);
            window.push_back(sample.clone());
            let max_age = chrono::Duration::from_std(self.config.window)
                .unwrap_or(chrono::Duration::MAX);
            while window
                .front()
                .is_some_and(|oldest| sample.timestamp - oldest.timestamp > max_age)
            {
                window.pop_front();
            }
        }

        if let Err(e) = self.log.append(&sample) {
            error!("Failed to write CSV row: {}", e);
        }

        for alert in check_thresholds(&sample, &self.config) {
            warn!("Threshold alert: {}", alert);
            if self.alerts.send(alert).is_err() {
                debug!("No alert receiver");
            }
        }
    }
}

fn reading(result: PsuResult<f64>) -> PsuResult<Option<f64>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!("Monitor reading failed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn lock_window(window: &Window) -> MutexGuard<'_, VecDeque<Sample>> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
