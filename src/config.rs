//! Scan configuration: sizing, pacing, scan mode, and triggering.

use std::time::Duration;

use bitflags::bitflags;

use crate::{Error, Result};
use crate::params::{self, ElementWidth, Range};

bitflags! {
    /// Scan mode flags passed through to the producer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScanOptions: u32 {
        /// Run in the background; the call starting the scan returns immediately.
        const BACKGROUND  = 1<<0;
        /// Reuse the buffer indefinitely, wrapping at its end.
        const CONTINUOUS  = 1<<1;
        /// Wait for an external trigger before acquiring.
        const EXT_TRIGGER = 1<<2;
        /// Transfer data in blocks rather than sample by sample.
        const BLOCK_IO    = 1<<3;
        /// Transfer each sample as it is converted.
        const SINGLE_IO   = 1<<4;
        /// Transfer data through DMA.
        const DMA_IO      = 1<<5;
        /// Acquire all channels of a frame back to back at the maximum converter rate.
        const BURST_IO    = 1<<6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerKind {
    #[default]
    PositiveEdge,
    NegativeEdge,
    High,
    Low,
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerDescriptor {
    pub kind: TriggerKind,
    /// Scan slot whose signal is compared against `level`.
    pub channel: usize,
    /// Threshold in engineering units (volts).
    pub level: f64,
}

impl TriggerDescriptor {
    /// Raw code corresponding to `level`, for producers that program a threshold register.
    pub fn level_code(&self, range: Range, resolution: u8) -> u32 {
        range.volts_to_code(self.level, resolution)
    }
}

/// How the producer reports scan progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDelivery {
    /// The consumer queries the status at `interval`.
    Polling { interval: Duration },
    /// The producer sends a notification every `every` frames, at the end of the scan, and on
    /// faults.
    Events { every: usize },
}

impl Default for ProgressDelivery {
    fn default() -> Self {
        ProgressDelivery::Polling { interval: Duration::from_millis(100) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanConfiguration {
    pub samples_per_channel: usize,
    /// Frame rate in Hz.
    pub rate: f64,
    /// Converter resolution in bits; selects the element width of the buffer.
    pub resolution: u8,
    /// Transfer granularity of the producer in samples per channel. `samples_per_channel` is
    /// rounded up to a multiple of it.
    pub packet_size: usize,
    pub options: ScanOptions,
    pub trigger: Option<TriggerDescriptor>,
    pub pretrigger_samples_per_channel: usize,
    pub delivery: ProgressDelivery,
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        Self {
            samples_per_channel: 1000,
            rate: 100.0,
            resolution: 16,
            packet_size: 1,
            options: ScanOptions::BACKGROUND,
            trigger: None,
            pretrigger_samples_per_channel: 0,
            delivery: Default::default(),
        }
    }
}

impl ScanConfiguration {
    pub fn is_continuous(&self) -> bool {
        self.options.contains(ScanOptions::CONTINUOUS)
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_some() || self.options.contains(ScanOptions::EXT_TRIGGER)
    }

    pub fn element_width(&self) -> ElementWidth {
        ElementWidth::for_resolution(self.resolution)
    }

    pub fn max_code(&self) -> u32 {
        params::max_code(self.resolution)
    }

    /// Samples per channel after rounding up to the packet size.
    pub fn points_per_channel(&self) -> usize {
        if self.packet_size > 1 {
            self.samples_per_channel.next_multiple_of(self.packet_size)
        } else {
            self.samples_per_channel
        }
    }

    /// Number of raw elements in the buffer for a scan of `channel_count` slots.
    pub fn buffer_length(&self, channel_count: usize) -> usize {
        self.points_per_channel() * channel_count
    }

    pub(crate) fn validate(&self, channel_count: usize) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidConfiguration(message));
        if self.samples_per_channel == 0 {
            return invalid("samples per channel must be positive".to_owned())
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return invalid(format!("scan rate {} Hz is not positive", self.rate))
        }
        if !(1..=32).contains(&self.resolution) {
            return invalid(format!("resolution of {} bits is not supported", self.resolution))
        }
        if let Some(trigger) = self.trigger {
            if trigger.channel >= channel_count {
                return invalid(format!("trigger channel {} is outside of the {} scanned slots",
                    trigger.channel, channel_count))
            }
        }
        if self.pretrigger_samples_per_channel > 0 {
            if !self.is_triggered() {
                return invalid("pretrigger samples require a trigger".to_owned())
            }
            if self.pretrigger_samples_per_channel >= self.points_per_channel() {
                return invalid(format!("{} pretrigger samples do not fit into {} samples per channel",
                    self.pretrigger_samples_per_channel, self.points_per_channel()))
            }
        }
        if let ProgressDelivery::Events { every: 0 } = self.delivery {
            return invalid("event notifications must cover at least one frame".to_owned())
        }
        Ok(())
    }
}
