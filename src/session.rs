//! Scan session: arms a scan, tracks its progress, and serves decoded windows.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::{Error, Result};
use crate::capture::RawSampleBuffer;
use crate::channel::{validate_channels, ChannelMetadata};
use crate::config::{ProgressDelivery, ScanConfiguration};
use crate::decode::{Decoder, Window};
use crate::sys::{Driver, FaultCode, ProgressUpdate, ScanRequest};
use crate::window::{self, WindowMode, WindowRequest};

// How long the event listener waits for a notification before checking whether its scan ended.
const LISTENER_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Armed,
    Running,
    Completed,
    Errored(FaultCode),
    Stopped,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored(_) | Self::Stopped)
    }
}

/// Progress of the scan as last reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatus {
    pub running: bool,
    pub error: Option<FaultCode>,
    /// Elements transferred since the scan started; never decreases.
    pub total_transferred: u64,
    /// Buffer offset of the start of the most recently completed frame.
    pub cursor: usize,
}

#[derive(Debug)]
struct Scan {
    channels: Vec<ChannelMetadata>,
    config: ScanConfiguration,
    decoder: Decoder,
    buffer_length: usize,
    // shared with the producer while the scan may still write to it
    live: Option<Arc<RawSampleBuffer>>,
    // copy of the contents taken when the live buffer was released
    frozen: Option<RawSampleBuffer>,
}

impl Scan {
    fn buffer(&self) -> Option<&RawSampleBuffer> {
        self.live.as_deref().or(self.frozen.as_ref())
    }
}

#[derive(Debug)]
struct Inner<D> {
    driver: D,
    state: ScanState,
    status: ScanStatus,
    scan: Option<Scan>,
    // incremented by every `start`, so that a listener never applies updates to a later scan
    generation: u64,
}

impl<D: Driver> Inner<D> {
    fn scan(&self) -> Result<&Scan> {
        self.scan.as_ref().ok_or(Error::NotArmed)
    }

    /// Enters a terminal state. A running producer is stopped first, then the live buffer is
    /// released and a frozen copy of it kept. Returns the outcome of stopping the producer.
    fn settle(&mut self, state: ScanState) -> Result<()> {
        debug_assert!(state.is_terminal());
        let stopped = if self.state == ScanState::Running {
            self.driver.stop_scan()
        } else {
            Ok(())
        };
        if let Err(error) = &stopped {
            log::warn!("scan: failed to stop driver: {}", error);
        }
        log::info!("scan: {:?} => {:?} ({} elements transferred)",
            self.state, state, self.status.total_transferred);
        self.state = state;
        self.status.running = false;
        if let Some(scan) = self.scan.as_mut() {
            if let Some(buffer) = scan.live.take() {
                scan.frozen = Some(buffer.snapshot());
                if let Err(error) = self.driver.release_buffer(buffer) {
                    log::warn!("scan: failed to release buffer: {}", error);
                }
            }
        }
        stopped
    }

    fn apply(&mut self, update: ProgressUpdate) -> Result<ScanState> {
        if self.state != ScanState::Running {
            log::debug!("scan: ignoring {:?} in state {:?}", update, self.state);
            return Ok(self.state)
        }
        let scan = self.scan()?;
        let channel_count = scan.channels.len();
        let buffer_length = scan.buffer_length;
        let continuous = scan.config.is_continuous();
        let mut finished = false;
        match update {
            ProgressUpdate::Status { running, total_transferred, cursor } => {
                if total_transferred < self.status.total_transferred {
                    log::warn!("scan: ignoring transfer count going backwards ({} after {})",
                        total_transferred, self.status.total_transferred);
                } else {
                    self.status.total_transferred = total_transferred;
                    self.status.cursor = cursor % buffer_length;
                }
                finished = !running;
            }
            ProgressUpdate::DataAvailable { frames } |
            ProgressUpdate::EndOfScan { frames } => {
                let total = self.status.total_transferred + frames * channel_count as u64;
                self.status.total_transferred = total;
                if total >= channel_count as u64 {
                    self.status.cursor = ((total - channel_count as u64) % buffer_length as u64) as usize;
                }
                finished = matches!(update, ProgressUpdate::EndOfScan { .. });
            }
            ProgressUpdate::Fault(code) => {
                log::warn!("scan: {} after {} elements", code, self.status.total_transferred);
                self.status.error = Some(code);
                self.settle(ScanState::Errored(code)).ok();
                return Ok(self.state)
            }
        }
        log::debug!("scan: {} elements transferred, cursor at {}",
            self.status.total_transferred, self.status.cursor);
        if !continuous && self.status.total_transferred >= buffer_length as u64 {
            finished = true;
        }
        if finished {
            self.settle(ScanState::Completed).ok();
        }
        Ok(self.state)
    }
}

#[derive(Debug)]
struct Shared<D> {
    inner: Mutex<Inner<D>>,
    settled: Condvar,
}

/// Handle to a scan session. Clones refer to the same session, so that a notification context
/// and the consumer can both hold it.
///
/// All state changes go through one mutex: progress updates, `stop`, and the release of the
/// buffer on entering a terminal state never interleave.
#[derive(Debug)]
pub struct ScanSession<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for ScanSession<D> {
    fn clone(&self) -> Self {
        ScanSession { shared: self.shared.clone() }
    }
}

impl<D: Driver + 'static> ScanSession<D> {
    pub fn new(driver: D) -> ScanSession<D> {
        ScanSession {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    driver,
                    state: ScanState::Idle,
                    status: ScanStatus::default(),
                    scan: None,
                    generation: 0,
                }),
                settled: Condvar::new(),
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<D>> {
        // the session state stays consistent even if a holder panicked
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, inner: &mut Inner<D>, state: ScanState) -> Result<()> {
        let stopped = inner.settle(state);
        self.shared.settled.notify_all();
        stopped
    }

    pub fn state(&self) -> ScanState {
        self.lock().state
    }

    /// Snapshot of the scan progress. The transfer count and the cursor always belong to
    /// the same update.
    pub fn status(&self) -> ScanStatus {
        self.lock().status
    }

    pub fn channels(&self) -> Option<Vec<ChannelMetadata>> {
        self.lock().scan.as_ref().map(|scan| scan.channels.clone())
    }

    pub fn config(&self) -> Option<ScanConfiguration> {
        self.lock().scan.as_ref().map(|scan| scan.config)
    }

    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.lock().driver)
    }

    /// Validates the scan and allocates its buffer. Also allowed after a previous scan ended.
    pub fn arm(&self, channels: Vec<ChannelMetadata>, config: ScanConfiguration) -> Result<()> {
        let mut inner = self.lock();
        if !(inner.state == ScanState::Idle || inner.state.is_terminal()) {
            return Err(Error::InvalidState { operation: "arm", state: inner.state })
        }
        validate_channels(&channels)?;
        config.validate(channels.len())?;
        let buffer_length = config.buffer_length(channels.len());
        let buffer = inner.driver.allocate_buffer(config.element_width(), buffer_length)?;
        if buffer.write_capacity() != buffer_length || buffer.width() != config.element_width() {
            let error = Error::InvalidConfiguration(format!(
                "driver allocated {:?} buffer of {} elements, expected {:?} buffer of {}",
                buffer.width(), buffer.write_capacity(), config.element_width(), buffer_length));
            if let Err(error) = inner.driver.release_buffer(buffer) {
                log::warn!("scan: failed to release buffer: {}", error);
            }
            return Err(error)
        }
        log::info!("scan: {:?} => Armed ({} slots, {} samples per channel, {:?})",
            inner.state, channels.len(), config.points_per_channel(), config.options);
        inner.scan = Some(Scan {
            decoder: Decoder::new(&channels, config.resolution),
            channels,
            config,
            buffer_length,
            live: Some(buffer),
            frozen: None,
        });
        inner.state = ScanState::Armed;
        inner.status = ScanStatus::default();
        Ok(())
    }

    /// Starts the armed scan. With event delivery, a listener thread applies notifications as
    /// they arrive; with polling delivery, the consumer calls `poll`.
    pub fn start(&self) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state != ScanState::Armed {
            return Err(Error::InvalidState { operation: "start", state: inner.state })
        }
        let delivery = inner.scan()?.config.delivery;
        let mut events = None;
        if let ProgressDelivery::Events { .. } = delivery {
            let (sender, receiver) = mpsc::channel();
            if let Err(error) = inner.driver.subscribe(sender) {
                self.settle(inner, ScanState::Stopped).ok();
                return Err(error)
            }
            events = Some(receiver);
        }
        let scan = inner.scan.as_ref().ok_or(Error::NotArmed)?;
        let buffer = scan.live.clone().ok_or(Error::NotArmed)?;
        let request = ScanRequest { channels: &scan.channels, config: &scan.config };
        if let Err(error) = inner.driver.start_scan(request, buffer) {
            log::warn!("scan: driver failed to start: {}", error);
            if events.is_some() {
                // withdraw the sink registered above
                if let Err(error) = inner.driver.stop_scan() {
                    log::warn!("scan: failed to unsubscribe: {}", error);
                }
            }
            self.settle(inner, ScanState::Stopped).ok();
            return Err(error)
        }
        log::info!("scan: Armed => Running");
        inner.generation += 1;
        inner.state = ScanState::Running;
        inner.status.running = true;
        if let Some(events) = events {
            let shared = Arc::downgrade(&self.shared);
            let generation = inner.generation;
            thread::Builder::new()
                .name("scan-events".to_owned())
                .spawn(move || Self::listen(shared, generation, events))?;
        }
        Ok(())
    }

    // Applies notifications until the scan it was started for ends, the producer drops its
    // sink, or every session handle is gone. Producers may keep the sink after `stop_scan`, so
    // the scan state is checked at least once per tick.
    fn listen(shared: Weak<Shared<D>>, generation: u64, events: Receiver<ProgressUpdate>) {
        loop {
            let update = match events.recv_timeout(LISTENER_TICK) {
                Ok(update) => Some(update),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let Some(shared) = shared.upgrade() else { break };
            let session = ScanSession { shared };
            let mut inner = session.lock();
            if inner.generation != generation || inner.state.is_terminal() {
                break
            }
            if let Some(update) = update {
                match inner.apply(update) {
                    Ok(state) if state.is_terminal() => {
                        session.shared.settled.notify_all();
                        break
                    }
                    Ok(_) => (),
                    Err(error) => {
                        log::warn!("listener: {}", error);
                        break
                    }
                }
            }
        }
        log::debug!("listener: done");
    }

    /// Applies one progress update from the producer and returns the resulting state. Updates
    /// arriving outside of the `Running` state are ignored.
    pub fn on_progress(&self, update: ProgressUpdate) -> Result<ScanState> {
        let mut inner = self.lock();
        let state = inner.apply(update)?;
        if state.is_terminal() {
            self.shared.settled.notify_all();
        }
        Ok(state)
    }

    /// Queries the producer for its status and applies it. Only does so for running scans with
    /// polling delivery; otherwise, returns the current state.
    pub fn poll(&self) -> Result<ScanState> {
        let mut inner = self.lock();
        if inner.state != ScanState::Running {
            return Ok(inner.state)
        }
        if let ProgressDelivery::Events { .. } = inner.scan()?.config.delivery {
            return Ok(inner.state)
        }
        let update = match inner.driver.poll_status() {
            Ok(update) => update,
            Err(Error::HardwareFault(code)) => ProgressUpdate::Fault(code),
            Err(error) => return Err(error),
        };
        let state = inner.apply(update)?;
        if state.is_terminal() {
            self.shared.settled.notify_all();
        }
        Ok(state)
    }

    /// Stops the scan, stopping the producer first if it is running. Calling it again once the
    /// scan has ended has no effect. Does not wait for the event listener, which exits on its own.
    pub fn stop(&self) -> Result<ScanState> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            ScanState::Idle =>
                Err(Error::InvalidState { operation: "stop", state }),
            _ if state.is_terminal() =>
                Ok(state),
            _ => {
                self.settle(&mut inner, ScanState::Stopped)?;
                Ok(ScanState::Stopped)
            }
        }
    }

    /// Blocks until the scan ends or `timeout` elapses, and returns the state at that point.
    pub fn wait(&self, timeout: Duration) -> ScanState {
        let inner = self.lock();
        let (inner, _) = self.shared.settled
            .wait_timeout_while(inner, timeout, |inner| !inner.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        inner.state
    }

    /// Decodes the latest `depth` frames of every displayed slot. Once the scan has ended,
    /// the window is taken from the copy of the buffer made when it ended.
    pub fn window(&self, depth: usize) -> Result<Window> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == ScanState::Idle {
            return Err(Error::NotArmed)
        }
        let scan = inner.scan.as_mut().ok_or(Error::NotArmed)?;
        let request = WindowRequest {
            cursor: inner.status.cursor,
            total_transferred: inner.status.total_transferred,
            channel_count: scan.channels.len(),
            depth,
            mode: WindowMode::for_scan(scan.config.is_continuous()),
        };
        let raw = window::extract(scan.buffer().ok_or(Error::NotArmed)?, &request)?;
        Ok(scan.decoder.decode_window(&raw))
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc::Sender;

    use super::*;
    use crate::config::ScanOptions;
    use crate::decode::{Reading, Warning};
    use crate::params::{ElementWidth, Range, ThermocoupleType};

    #[derive(Debug, Default)]
    struct Recorder {
        buffer: Option<Arc<RawSampleBuffer>>,
        sink: Option<Sender<ProgressUpdate>>,
        status: Option<ProgressUpdate>,
        fail_start: bool,
        // keep the notification sink registered after `stop_scan`
        keep_sink: bool,
        // allocate one element more than asked for
        oversize: bool,
        started: usize,
        stopped: usize,
        released: usize,
        calls: Vec<&'static str>,
    }

    impl Driver for Recorder {
        fn allocate_buffer(&mut self, width: ElementWidth, len: usize) -> Result<Arc<RawSampleBuffer>> {
            let len = if self.oversize { len + 1 } else { len };
            Ok(Arc::new(RawSampleBuffer::new(width, len)?))
        }

        fn start_scan(&mut self, _request: ScanRequest<'_>, buffer: Arc<RawSampleBuffer>) -> Result<()> {
            if self.fail_start {
                return Err(Error::Driver("device busy".into()))
            }
            self.started += 1;
            self.buffer = Some(buffer);
            Ok(())
        }

        fn poll_status(&mut self) -> Result<ProgressUpdate> {
            match self.status {
                Some(ProgressUpdate::Fault(code)) => Err(Error::HardwareFault(code)),
                Some(update) => Ok(update),
                None => Err(Error::Driver("no status".into())),
            }
        }

        fn subscribe(&mut self, sink: Sender<ProgressUpdate>) -> Result<()> {
            self.sink = Some(sink);
            Ok(())
        }

        fn stop_scan(&mut self) -> Result<()> {
            self.stopped += 1;
            self.calls.push("stop_scan");
            if !self.keep_sink {
                self.sink = None;
            }
            Ok(())
        }

        fn release_buffer(&mut self, buffer: Arc<RawSampleBuffer>) -> Result<()> {
            self.released += 1;
            self.calls.push("release_buffer");
            drop(buffer);
            Ok(())
        }
    }

    fn two_channels() -> Vec<ChannelMetadata> {
        vec![ChannelMetadata::analog(Range::Uni10Volts), ChannelMetadata::counter()]
    }

    fn finite(samples_per_channel: usize) -> ScanConfiguration {
        ScanConfiguration { samples_per_channel, ..Default::default() }
    }

    fn continuous(samples_per_channel: usize) -> ScanConfiguration {
        ScanConfiguration {
            samples_per_channel,
            options: ScanOptions::BACKGROUND | ScanOptions::CONTINUOUS,
            delivery: ProgressDelivery::Events { every: 1 },
            ..Default::default()
        }
    }

    fn running(channels: Vec<ChannelMetadata>, config: ScanConfiguration) -> ScanSession<Recorder> {
        let session = ScanSession::new(Recorder::default());
        session.arm(channels, config).unwrap();
        session.start().unwrap();
        session
    }

    // Writes frames the way the producer would; counter slots hold the global frame number.
    fn produce(session: &ScanSession<Recorder>, first_frame: usize, frames: usize) {
        session.with_driver(|driver| {
            let buffer = driver.buffer.as_ref().unwrap();
            for frame in first_frame..first_frame + frames {
                buffer.write(frame * 2, &[0x8000, frame as u32]).unwrap();
            }
        })
    }

    fn counter_values(window: &Window) -> Vec<u32> {
        window.channels[&1].values.iter().map(|reading| match reading {
            Reading::Integer(value) => *value,
            reading => panic!("unexpected {:?}", reading),
        }).collect()
    }

    fn released(session: &ScanSession<Recorder>) -> usize {
        session.with_driver(|driver| driver.released)
    }

    fn calls(session: &ScanSession<Recorder>) -> Vec<&'static str> {
        session.with_driver(|driver| driver.calls.clone())
    }

    #[test]
    fn test_arm_empty() {
        let session = ScanSession::new(Recorder::default());
        assert!(matches!(session.arm(vec![], finite(5)), Err(Error::InvalidConfiguration(_))));
        assert_eq!(session.state(), ScanState::Idle);
        assert!(matches!(session.window(3), Err(Error::NotArmed)));
    }

    #[test]
    fn test_arm_missing_reference() {
        let session = ScanSession::new(Recorder::default());
        let channels = vec![
            ChannelMetadata::analog(Range::Bip10Volts),
            ChannelMetadata::thermocouple(0, Range::BipPt078Volts, ThermocoupleType::K),
        ];
        assert!(matches!(session.arm(channels, finite(5)), Err(Error::InvalidConfiguration(_))));
        assert_eq!(session.state(), ScanState::Idle);
        // the session can be armed again after a failure
        session.arm(two_channels(), finite(5)).unwrap();
        assert_eq!(session.state(), ScanState::Armed);
    }

    #[test]
    fn test_invalid_transitions() {
        let session = ScanSession::new(Recorder::default());
        assert!(matches!(session.start(), Err(Error::InvalidState { operation: "start", .. })));
        assert!(matches!(session.stop(), Err(Error::InvalidState { operation: "stop", .. })));
        session.arm(two_channels(), finite(5)).unwrap();
        assert!(matches!(session.arm(two_channels(), finite(5)), Err(Error::InvalidState { .. })));
        session.start().unwrap();
        assert!(matches!(session.start(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_buffer_sizing() {
        let session = ScanSession::new(Recorder::default());
        let config = ScanConfiguration { samples_per_channel: 10, packet_size: 4, resolution: 18, ..Default::default() };
        session.arm(two_channels(), config).unwrap();
        session.start().unwrap();
        session.with_driver(|driver| {
            let buffer = driver.buffer.as_ref().unwrap();
            assert_eq!(buffer.write_capacity(), 24);
            assert_eq!(buffer.width(), ElementWidth::Wide);
        });
    }

    #[test]
    fn test_polling_finite_scan() {
        let session = running(two_channels(), finite(5));
        assert!(session.status().running);
        assert!(session.window(10).unwrap().is_empty());

        produce(&session, 0, 3);
        session.with_driver(|driver| driver.status = Some(ProgressUpdate::Status {
            running: true, total_transferred: 6, cursor: 4,
        }));
        assert_eq!(session.poll().unwrap(), ScanState::Running);
        let window = session.window(10).unwrap();
        assert_eq!(window.frames, 3);
        assert_eq!(counter_values(&window), [0, 1, 2]);
        assert_eq!(window.channels[&0].values, [Reading::Float(5.0); 3]);

        produce(&session, 3, 2);
        session.with_driver(|driver| driver.status = Some(ProgressUpdate::Status {
            running: true, total_transferred: 10, cursor: 8,
        }));
        assert_eq!(session.poll().unwrap(), ScanState::Completed);
        assert_eq!(released(&session), 1);
        assert!(!session.status().running);
        assert_eq!(counter_values(&session.window(3).unwrap()), [2, 3, 4]);
        assert_eq!(session.poll().unwrap(), ScanState::Completed);
    }

    #[test]
    fn test_single_sample_not_displayed() {
        let session = running(two_channels(), finite(5));
        produce(&session, 0, 1);
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 1, cursor: 0 }).unwrap();
        assert!(session.window(5).unwrap().is_empty());
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 2, cursor: 0 }).unwrap();
        assert_eq!(session.window(5).unwrap().frames, 1);
    }

    #[test]
    fn test_status_reporting_idle_completes() {
        let session = running(two_channels(), continuous(5));
        let state = session.on_progress(ProgressUpdate::Status {
            running: false, total_transferred: 4, cursor: 2,
        }).unwrap();
        assert_eq!(state, ScanState::Completed);
        assert_eq!(session.wait(Duration::from_secs(1)), ScanState::Completed);
    }

    #[test]
    fn test_transfer_count_never_decreases() {
        let session = running(two_channels(), finite(5));
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 6, cursor: 4 }).unwrap();
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 4, cursor: 2 }).unwrap();
        let status = session.status();
        assert_eq!((status.total_transferred, status.cursor), (6, 4));
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 8, cursor: 16 }).unwrap();
        let status = session.status();
        assert_eq!((status.total_transferred, status.cursor), (8, 6));
    }

    #[test]
    fn test_continuous_wraparound() {
        let session = running(two_channels(), continuous(5));
        for frame in 0..12 {
            produce(&session, frame, 1);
            assert_eq!(session.on_progress(ProgressUpdate::DataAvailable { frames: 1 }).unwrap(),
                ScanState::Running);
        }
        let status = session.status();
        assert_eq!(status.total_transferred, 24);
        assert_eq!(status.cursor, 2);
        assert_eq!(counter_values(&session.window(3).unwrap()), [9, 10, 11]);
        assert_eq!(counter_values(&session.window(100).unwrap()), [7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_hardware_fault() {
        let session = running(two_channels(), continuous(5));
        produce(&session, 0, 2);
        session.on_progress(ProgressUpdate::DataAvailable { frames: 2 }).unwrap();
        let state = session.on_progress(ProgressUpdate::Fault(FaultCode(-7))).unwrap();
        assert_eq!(state, ScanState::Errored(FaultCode(-7)));
        assert_eq!(session.status().error, Some(FaultCode(-7)));
        assert!(!session.status().running);
        assert_eq!(released(&session), 1);

        // the producer scribbling over its copy does not affect the frozen window
        session.with_driver(|driver| driver.buffer.as_ref().unwrap().write(0, &[0; 10]).unwrap());
        assert_eq!(counter_values(&session.window(5).unwrap()), [0, 1]);
        assert_eq!(counter_values(&session.window(5).unwrap()), [0, 1]);

        // late updates are ignored
        session.on_progress(ProgressUpdate::DataAvailable { frames: 3 }).unwrap();
        assert_eq!(session.status().total_transferred, 4);
        assert_eq!(session.stop().unwrap(), ScanState::Errored(FaultCode(-7)));
        assert_eq!(released(&session), 1);
    }

    #[test]
    fn test_polled_fault() {
        let session = running(two_channels(), finite(5));
        session.with_driver(|driver| driver.status = Some(ProgressUpdate::Fault(FaultCode(3))));
        assert_eq!(session.poll().unwrap(), ScanState::Errored(FaultCode(3)));
        assert_eq!(released(&session), 1);
    }

    #[test]
    fn test_stop_twice() {
        let session = running(two_channels(), continuous(5));
        assert_eq!(session.stop().unwrap(), ScanState::Stopped);
        let status = session.status();
        assert_eq!(session.stop().unwrap(), ScanState::Stopped);
        assert_eq!(session.status(), status);
        assert_eq!(session.state(), ScanState::Stopped);
        session.with_driver(|driver| {
            assert_eq!(driver.stopped, 1);
            assert_eq!(driver.released, 1);
        });
    }

    #[test]
    fn test_stop_armed() {
        let session = ScanSession::new(Recorder::default());
        session.arm(two_channels(), finite(5)).unwrap();
        assert_eq!(session.stop().unwrap(), ScanState::Stopped);
        session.with_driver(|driver| {
            assert_eq!(driver.stopped, 0);
            assert_eq!(driver.released, 1);
        });
        assert!(session.window(5).unwrap().is_empty());
    }

    #[test]
    fn test_start_failure_releases() {
        let session = ScanSession::new(Recorder { fail_start: true, ..Default::default() });
        session.arm(two_channels(), finite(5)).unwrap();
        assert!(matches!(session.start(), Err(Error::Driver(_))));
        assert_eq!(session.state(), ScanState::Stopped);
        assert_eq!(calls(&session), ["release_buffer"]);
    }

    #[test]
    fn test_start_failure_unsubscribes() {
        let session = ScanSession::new(Recorder { fail_start: true, ..Default::default() });
        session.arm(two_channels(), continuous(5)).unwrap();
        assert!(matches!(session.start(), Err(Error::Driver(_))));
        assert_eq!(session.state(), ScanState::Stopped);
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);
        assert!(session.with_driver(|driver| driver.sink.is_none()));
    }

    #[test]
    fn test_arm_wrong_buffer_released() {
        let session = ScanSession::new(Recorder { oversize: true, ..Default::default() });
        assert!(matches!(session.arm(two_channels(), finite(5)), Err(Error::InvalidConfiguration(_))));
        assert_eq!(session.state(), ScanState::Idle);
        assert_eq!(calls(&session), ["release_buffer"]);
    }

    #[test]
    fn test_producer_stopped_before_release() {
        // finite scan reaching its requested count
        let session = running(two_channels(), finite(5));
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 10, cursor: 8 }).unwrap();
        assert_eq!(session.state(), ScanState::Completed);
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);

        // end of scan notification
        let session = running(two_channels(), continuous(5));
        session.on_progress(ProgressUpdate::EndOfScan { frames: 2 }).unwrap();
        assert_eq!(session.state(), ScanState::Completed);
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);

        // hardware fault
        let session = running(two_channels(), continuous(5));
        session.on_progress(ProgressUpdate::Fault(FaultCode(5))).unwrap();
        assert_eq!(session.state(), ScanState::Errored(FaultCode(5)));
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);
        assert_eq!(session.stop().unwrap(), ScanState::Errored(FaultCode(5)));
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);
    }

    #[test]
    fn test_stop_with_retained_sink() {
        let session = ScanSession::new(Recorder { keep_sink: true, ..Default::default() });
        session.arm(two_channels(), continuous(5)).unwrap();
        session.start().unwrap();

        let (done, stopped) = mpsc::channel();
        let handle = session.clone();
        thread::spawn(move || done.send(handle.stop()).unwrap());
        let result = stopped.recv_timeout(Duration::from_secs(3)).expect("stop() blocked");
        assert!(matches!(result, Ok(ScanState::Stopped)));
        assert_eq!(calls(&session), ["stop_scan", "release_buffer"]);

        // notifications through the sink of the previous scan never reach the next one
        let stale = session.with_driver(|driver| driver.sink.clone().unwrap());
        session.arm(two_channels(), continuous(5)).unwrap();
        session.start().unwrap();
        stale.send(ProgressUpdate::DataAvailable { frames: 3 }).ok();
        thread::sleep(LISTENER_TICK * 4);
        assert_eq!(session.status().total_transferred, 0);
        assert_eq!(session.state(), ScanState::Running);

        let current = session.with_driver(|driver| driver.sink.clone().unwrap());
        current.send(ProgressUpdate::DataAvailable { frames: 1 }).unwrap();
        for _ in 0..100 {
            if session.status().total_transferred == 2 { break }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(session.status().total_transferred, 2);
        assert_eq!(session.stop().unwrap(), ScanState::Stopped);
    }

    #[test]
    fn test_rearm_after_end() {
        let session = running(two_channels(), finite(5));
        session.stop().unwrap();
        session.arm(two_channels(), finite(3)).unwrap();
        assert_eq!(session.state(), ScanState::Armed);
        assert_eq!(session.status(), ScanStatus::default());
        session.start().unwrap();
        session.with_driver(|driver| {
            assert_eq!(driver.started, 2);
            assert_eq!(driver.buffer.as_ref().unwrap().write_capacity(), 6);
        });
    }

    #[test]
    fn test_event_delivery() {
        let session = running(two_channels(), ScanConfiguration {
            samples_per_channel: 5,
            delivery: ProgressDelivery::Events { every: 2 },
            ..Default::default()
        });
        let sink = session.with_driver(|driver| driver.sink.clone().unwrap());
        produce(&session, 0, 5);
        sink.send(ProgressUpdate::DataAvailable { frames: 2 }).unwrap();
        sink.send(ProgressUpdate::EndOfScan { frames: 3 }).unwrap();
        assert_eq!(session.wait(Duration::from_secs(5)), ScanState::Completed);
        let status = session.status();
        assert_eq!((status.total_transferred, status.cursor), (10, 8));
        assert_eq!(counter_values(&session.window(2).unwrap()), [3, 4]);
        // polling is a no-op with event delivery
        assert_eq!(session.poll().unwrap(), ScanState::Completed);
    }

    #[test]
    fn test_thermocouple_window() {
        let channels = vec![
            ChannelMetadata::reference(0, 0.01, -40.0),
            ChannelMetadata::thermocouple(0, Range::BipPt078Volts, ThermocoupleType::K),
            ChannelMetadata::counter(),
        ];
        let session = ScanSession::new(Recorder::default());
        session.arm(channels, finite(4)).unwrap();
        session.start().unwrap();
        session.with_driver(|driver| {
            let buffer = driver.buffer.as_ref().unwrap();
            buffer.write(0, &[6500, 0xffff, 1, 6500, 0x8000, 2]).unwrap();
        });
        session.on_progress(ProgressUpdate::Status { running: true, total_transferred: 6, cursor: 3 }).unwrap();
        let window = session.window(4).unwrap();
        assert_eq!(window.channels.keys().copied().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(window.channels[&1].warning, Some(Warning::OpenConnection));
        assert_eq!(window.channels[&1].values.len(), 2);
        assert!(matches!(window.channels[&1].values[1], Reading::Float(value) if (value - 25.0).abs() < 0.1));
        assert_eq!(window.channels[&2].values, [Reading::Integer(1), Reading::Integer(2)]);
    }
}
