//! Boundary to the producer: the driver that programs the hardware and reports scan progress.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::Result;
use crate::capture::RawSampleBuffer;
use crate::channel::ChannelMetadata;
use crate::config::ScanConfiguration;
use crate::params::ElementWidth;

pub mod sim;

/// Device-specific code identifying a hardware fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultCode(pub i32);

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "hardware fault {}", self.0)
    }
}

/// A progress report from the producer, either answering a status query or sent as a
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Answer to a status query.
    Status {
        running: bool,
        /// Elements transferred since the scan started.
        total_transferred: u64,
        /// Buffer offset of the start of the most recently completed frame.
        cursor: usize,
    },
    /// `frames` new frames have been written since the previous notification.
    DataAvailable { frames: u64 },
    /// The scan has ended after writing `frames` new frames since the previous notification.
    EndOfScan { frames: u64 },
    Fault(FaultCode),
}

/// What the producer needs to know to start a scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub channels: &'a [ChannelMetadata],
    pub config: &'a ScanConfiguration,
}

pub trait Driver: Send {
    fn allocate_buffer(&mut self, width: ElementWidth, len: usize) -> Result<Arc<RawSampleBuffer>> {
        Ok(Arc::new(RawSampleBuffer::new(width, len)?))
    }

    /// Starts writing frames into `buffer`. The driver may keep the buffer until `stop_scan`
    /// returns or the scan ends by itself.
    fn start_scan(&mut self, request: ScanRequest<'_>, buffer: Arc<RawSampleBuffer>) -> Result<()>;

    fn poll_status(&mut self) -> Result<ProgressUpdate>;

    /// Registers `sink` to receive notifications for the scan started next. Drivers that cannot
    /// notify return an error.
    ///
    /// The driver may keep `sink` for as long as it likes; notifications sent after the scan
    /// has ended are discarded. Dropping it in `stop_scan` lets the session's listener exit
    /// right away instead of on its next periodic check.
    fn subscribe(&mut self, sink: Sender<ProgressUpdate>) -> Result<()>;

    /// Stops writing into the buffer. Once this returns, the buffer is no longer written to.
    ///
    /// Called once per scan before its buffer is released, whichever way the scan ended,
    /// including after the producer reported the end of the scan or a fault itself. Also called
    /// to withdraw a subscribed sink when `start_scan` fails.
    fn stop_scan(&mut self) -> Result<()>;

    fn release_buffer(&mut self, buffer: Arc<RawSampleBuffer>) -> Result<()> {
        drop(buffer);
        Ok(())
    }
}
