//! Background execution of assay runs.
//!
//! Each submission runs on its own thread and reports back over a channel,
//! tagged with a generation number. Only the newest generation is ever
//! handed to the caller; results of superseded submissions are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;

use super::AssayRun;
use crate::config::AssayConfig;
use crate::data::calibration::CalibrationInput;
use crate::data::detections::RegionDetector;
use crate::error::{AssayError, Result};

/// What a background job produced
#[derive(Debug)]
pub enum WorkerOutput {
    /// Detection, extraction and normalization of a new image
    Analysis(Result<AssayRun>),
    /// Fit and estimate on an existing run. The run is returned either way;
    /// after a failure it sits at `AwaitingCalibration`.
    Calibration { run: AssayRun, outcome: Result<()> },
}

type Message = (u64, WorkerOutput);

pub struct AssayWorker {
    generation: Arc<AtomicU64>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Default for AssayWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl AssayWorker {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            tx,
            rx,
        }
    }

    /// Generation of the most recent submission (0 before any)
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Analyze a new image up to the calibration step.
    pub fn submit_analysis<D>(
        &self,
        image: RgbImage,
        detector: D,
        config: AssayConfig,
        source: String,
    ) -> u64
    where
        D: RegionDetector + Send + 'static,
    {
        let generation = self.next_generation();
        let tx = self.tx.clone();
        let latest = Arc::clone(&self.generation);

        thread::spawn(move || {
            let result = AssayRun::run_to_calibration(image, &detector, config, &source);
            send_if_current(&tx, &latest, generation, WorkerOutput::Analysis(result));
        });
        generation
    }

    /// Fit and estimate on a run that is waiting for calibration.
    pub fn submit_calibration(&self, mut run: AssayRun, input: CalibrationInput) -> u64 {
        let generation = self.next_generation();
        let tx = self.tx.clone();
        let latest = Arc::clone(&self.generation);

        thread::spawn(move || {
            let outcome = run.calibrate(&input).map(|_| ());
            send_if_current(
                &tx,
                &latest,
                generation,
                WorkerOutput::Calibration { run, outcome },
            );
        });
        generation
    }

    /// Newest pending result, if it has arrived. Never blocks.
    pub fn try_recv(&self) -> Option<WorkerOutput> {
        let mut newest = None;
        while let Ok((generation, output)) = self.rx.try_recv() {
            if generation == self.current_generation() {
                newest = Some(output);
            } else {
                log::debug!("Discarding result of superseded generation {}", generation);
            }
        }
        newest
    }

    /// Block until the newest submission reports back or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Result<WorkerOutput> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok((generation, output)) if generation == self.current_generation() => {
                    return Ok(output);
                }
                Ok((generation, _)) => {
                    log::debug!("Discarding result of superseded generation {}", generation);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(AssayError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no result from assay worker",
                    )));
                }
            }
        }
    }
}

fn send_if_current(
    tx: &Sender<Message>,
    latest: &AtomicU64,
    generation: u64,
    output: WorkerOutput,
) {
    if latest.load(Ordering::SeqCst) != generation {
        log::debug!("Generation {} superseded before it finished", generation);
        return;
    }
    // Receiver gone means the worker was dropped; nobody is waiting
    let _ = tx.send((generation, output));
}
