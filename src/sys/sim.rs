//! Simulated acquisition device, producing synthetic frames on a background thread at the
//! configured scan rate.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{Error, Result};
use crate::capture::RawSampleBuffer;
use crate::channel::{ChannelKind, ChannelMetadata};
use crate::config::{ProgressDelivery, TriggerDescriptor, TriggerKind};
use crate::params::{self, Scale};
use crate::sys::{Driver, FaultCode, ProgressUpdate, ScanRequest};

// How far into the synthetic signal a trigger condition is searched for, in seconds.
const TRIGGER_SEARCH_SECONDS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorOptions {
    /// Frequency of the sine wave on analog slots, in Hz.
    pub frequency: f64,
    /// Cold junction temperature, in °C.
    pub ambient: f64,
    /// Thermocouple junction temperature around which the reading wanders, in °C.
    pub junction: f64,
    pub open_thermocouples: bool,
    /// Raise a fault once this many frames have been written.
    pub fault_after: Option<(u64, FaultCode)>,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        SimulatorOptions {
            frequency: 1.0,
            ambient: 22.5,
            junction: 100.0,
            open_thermocouples: false,
            fault_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    running: bool,
    frames: u64,
    fault: Option<FaultCode>,
}

#[derive(Debug, Clone)]
struct Generator {
    channels: Vec<ChannelMetadata>,
    resolution: u8,
    rate: f64,
    options: SimulatorOptions,
}

impl Generator {
    fn code(&self, slot: usize, frame: u64) -> u32 {
        let max_code = params::max_code(self.resolution);
        let time = frame as f64 / self.rate;
        let phase = 2.0 * PI * self.options.frequency * time + slot as f64;
        let channel = &self.channels[slot];
        match (channel.kind, channel.scale) {
            (ChannelKind::Digital, _) =>
                (frame & 0xff) as u32 & max_code,
            (ChannelKind::Counter, _) =>
                frame as u32 & max_code,
            (ChannelKind::Analog, Scale::Range(range)) => {
                let (low, high) = range.limits();
                let volts = (low + high) / 2.0 + 0.4 * range.span() * phase.sin();
                range.volts_to_code(volts, self.resolution)
            }
            (ChannelKind::ThermocoupleReference(_), Scale::Linear { gain, offset }) =>
                ((self.options.ambient - offset) / gain).round().clamp(0.0, max_code as f64) as u32,
            (ChannelKind::Thermocouple(_), Scale::Thermocouple { range, sensor }) => {
                if self.options.open_thermocouples {
                    max_code
                } else {
                    let celsius = self.options.junction + 5.0 * phase.sin();
                    range.volts_to_code((celsius - self.options.ambient) * sensor.seebeck(),
                        self.resolution)
                }
            }
            _ => max_code / 2,
        }
    }

    fn frame(&self, frame: u64) -> Vec<u32> {
        (0..self.channels.len()).map(|slot| self.code(slot, frame)).collect()
    }

    /// Frame at which the first recorded sample is taken: the first frame satisfying `trigger`
    /// that is preceded by at least `pretrigger` frames, minus `pretrigger`.
    fn trigger_start(&self, trigger: &TriggerDescriptor, pretrigger: u64, limit: u64) -> Option<u64> {
        let level = match self.channels[trigger.channel].scale {
            Scale::Range(range) | Scale::Thermocouple { range, .. } =>
                trigger.level_code(range, self.resolution),
            _ => trigger.level.round().clamp(0.0, params::max_code(self.resolution) as f64) as u32,
        };
        let edge = matches!(trigger.kind, TriggerKind::PositiveEdge | TriggerKind::NegativeEdge);
        let first = if edge { pretrigger.max(1) } else { pretrigger };
        (first..limit)
            .find(|&frame| {
                let current = self.code(trigger.channel, frame);
                match trigger.kind {
                    TriggerKind::PositiveEdge =>
                        self.code(trigger.channel, frame - 1) < level && current >= level,
                    TriggerKind::NegativeEdge =>
                        self.code(trigger.channel, frame - 1) > level && current <= level,
                    TriggerKind::High  => current >= level,
                    TriggerKind::Above => current > level,
                    TriggerKind::Low   => current <= level,
                    TriggerKind::Below => current < level,
                }
            })
            .map(|frame| frame - pretrigger)
    }
}

struct Worker {
    generator: Generator,
    buffer: Arc<RawSampleBuffer>,
    progress: Arc<Mutex<Progress>>,
    halt: Arc<AtomicBool>,
    sink: Option<Sender<ProgressUpdate>>,
    // frames written per iteration
    chunk: u64,
    // frames to write in total, for finite scans
    points: Option<u64>,
    // signal frame of the first recorded frame; `None` while waiting for a trigger that never fires
    start: Option<u64>,
}

impl Worker {
    fn notify(&self, update: ProgressUpdate) {
        if let Some(sink) = &self.sink {
            if sink.send(update).is_err() {
                log::trace!("simulator: nobody is listening for {:?}", update);
            }
        }
    }

    fn run(self) {
        let channel_count = self.generator.channels.len();
        let buffer_length = self.buffer.write_capacity();
        let mut frames = 0u64;
        let Some(start) = self.start else {
            log::info!("simulator: waiting for a trigger that never fires");
            while !self.halt.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
            return
        };
        log::debug!("simulator: started at frame {}, {} frames per chunk", start, self.chunk);
        while !self.halt.load(Ordering::Relaxed) {
            let chunk = match self.points {
                Some(points) => self.chunk.min(points - frames),
                None => self.chunk,
            };
            for frame in frames..frames + chunk {
                let offset = (frame as usize * channel_count) % buffer_length;
                if let Err(error) = self.buffer.write(offset, &self.generator.frame(start + frame)) {
                    log::error!("simulator: {}", error);
                    return
                }
            }
            frames += chunk;

            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((after, code)) = self.generator.options.fault_after {
                if frames >= after {
                    log::debug!("simulator: injecting {} after {} frames", code, frames);
                    *progress = Progress { running: false, frames, fault: Some(code) };
                    drop(progress);
                    self.notify(ProgressUpdate::Fault(code));
                    break
                }
            }
            let finished = self.points.is_some_and(|points| frames >= points);
            *progress = Progress { running: !finished, frames, fault: None };
            drop(progress);
            if finished {
                self.notify(ProgressUpdate::EndOfScan { frames: chunk });
                break
            }
            self.notify(ProgressUpdate::DataAvailable { frames: chunk });
            thread::sleep(Duration::from_secs_f64(chunk as f64 / self.generator.rate));
        }
        log::debug!("simulator: stopped after {} frames", frames);
    }
}

/// Producer writing synthetic data: sine waves on analog slots, counting patterns on digital
/// and counter slots, and a steady temperature on thermocouples.
#[derive(Debug)]
pub struct Simulator {
    options: SimulatorOptions,
    sink: Option<Sender<ProgressUpdate>>,
    progress: Arc<Mutex<Progress>>,
    halt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    channel_count: usize,
    buffer_length: usize,
}

impl Simulator {
    pub fn new(options: SimulatorOptions) -> Simulator {
        Simulator {
            options,
            sink: None,
            progress: Arc::new(Mutex::new(Progress::default())),
            halt: Arc::new(AtomicBool::new(false)),
            worker: None,
            channel_count: 0,
            buffer_length: 0,
        }
    }

    fn join(&mut self) -> Result<()> {
        self.halt.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| Error::Driver("simulator thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(SimulatorOptions::default())
    }
}

impl Driver for Simulator {
    fn start_scan(&mut self, request: ScanRequest<'_>, buffer: Arc<RawSampleBuffer>) -> Result<()> {
        self.join()?;
        let config = request.config;
        let generator = Generator {
            channels: request.channels.to_vec(),
            resolution: config.resolution,
            rate: config.rate,
            options: self.options,
        };
        let start = match config.trigger {
            Some(trigger) => {
                let limit = (config.rate * TRIGGER_SEARCH_SECONDS) as u64;
                let start = generator.trigger_start(&trigger,
                    config.pretrigger_samples_per_channel as u64, limit);
                log::debug!("simulator: {:?} fires with the scan starting at frame {:?}", trigger, start);
                start
            }
            None => {
                if config.is_triggered() {
                    log::debug!("simulator: external trigger fires immediately");
                }
                Some(0)
            }
        };
        let chunk = match config.delivery {
            ProgressDelivery::Events { every } => every,
            // about a hundred chunks per second
            ProgressDelivery::Polling { .. } => (config.rate / 100.0) as usize,
        }.max(1) as u64;
        self.channel_count = request.channels.len();
        self.buffer_length = buffer.write_capacity();
        self.halt = Arc::new(AtomicBool::new(false));
        self.progress = Arc::new(Mutex::new(Progress { running: true, ..Default::default() }));
        let worker = Worker {
            generator,
            buffer,
            progress: self.progress.clone(),
            halt: self.halt.clone(),
            sink: self.sink.clone(),
            chunk,
            points: (!config.is_continuous()).then(|| config.points_per_channel() as u64),
            start,
        };
        self.worker = Some(thread::Builder::new()
            .name("simulator".to_owned())
            .spawn(move || worker.run())?);
        Ok(())
    }

    fn poll_status(&mut self) -> Result<ProgressUpdate> {
        let progress = *self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(code) = progress.fault {
            return Ok(ProgressUpdate::Fault(code))
        }
        let channel_count = self.channel_count as u64;
        let total_transferred = progress.frames * channel_count;
        let cursor = if total_transferred >= channel_count && self.buffer_length > 0 {
            ((total_transferred - channel_count) % self.buffer_length as u64) as usize
        } else {
            0
        };
        Ok(ProgressUpdate::Status { running: progress.running, total_transferred, cursor })
    }

    fn subscribe(&mut self, sink: Sender<ProgressUpdate>) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<()> {
        let result = self.join();
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).running = false;
        self.sink = None;
        result
    }

    fn release_buffer(&mut self, buffer: Arc<RawSampleBuffer>) -> Result<()> {
        log::debug!("simulator: released buffer of {} elements", buffer.write_capacity());
        Ok(())
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Err(error) = self.join() {
            log::warn!("simulator: {}", error);
        }
    }
}
