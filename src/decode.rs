//! Conversion of raw codes into engineering units.

use std::collections::BTreeMap;

use crate::channel::{ChannelKind, ChannelMetadata};
use crate::params::{self, Range, Scale, ThermocoupleType};
use crate::window::RawWindow;

/// A decoded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Volts, °C, or the unit of a linear scale.
    Float(f64),
    /// Digital port bits or counter value.
    Integer(u32),
}

impl Reading {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(value) => value,
            Self::Integer(value) => value as f64,
        }
    }
}

/// Non-fatal condition detected while decoding a thermocouple sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    OutOfRange,
    OpenConnection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub value: Reading,
    pub warning: Option<Warning>,
}

impl Decoded {
    fn plain(value: Reading) -> Self {
        Decoded { value, warning: None }
    }
}

/// Decoded samples of one displayed channel slot, oldest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelWindow {
    pub values: Vec<Reading>,
    /// Most recent warning raised within the window, if any.
    pub warning: Option<Warning>,
}

/// Decoded window handed to the consumer, keyed by scan slot. Reference slots are omitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Window {
    pub frames: usize,
    pub channels: BTreeMap<usize, ChannelWindow>,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn warnings(&self) -> impl Iterator<Item = (usize, Warning)> + '_ {
        self.channels.iter()
            .filter_map(|(&slot, channel)| channel.warning.map(|warning| (slot, warning)))
    }
}

#[derive(Debug, Clone)]
pub struct Decoder {
    channels: Vec<ChannelMetadata>,
    resolution: u8,
    // most recently decoded cold junction temperature of each reference slot
    references: Vec<Option<f64>>,
}

impl Decoder {
    pub fn new(channels: &[ChannelMetadata], resolution: u8) -> Decoder {
        Decoder {
            channels: channels.to_vec(),
            resolution,
            references: vec![None; channels.len()],
        }
    }

    pub fn channels(&self) -> &[ChannelMetadata] {
        &self.channels
    }

    /// Decodes the raw code of scan slot `slot`.
    ///
    /// Thermocouple slots are compensated with the last value decoded for their reference slot
    /// (or 0 °C if the reference has not been decoded yet). Faults of the sensor are reported as
    /// a warning alongside a best-effort value.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not a slot of the channel list the decoder was built for.
    pub fn decode(&mut self, raw: u32, slot: usize) -> Decoded {
        let channel = &self.channels[slot];
        match (channel.kind, channel.scale) {
            (ChannelKind::Digital | ChannelKind::Counter, _) =>
                Decoded::plain(Reading::Integer(raw)),
            (ChannelKind::Analog, Scale::Range(range)) =>
                Decoded::plain(Reading::Float(range.code_to_volts(raw, self.resolution))),
            (ChannelKind::ThermocoupleReference(_), scale) => {
                let celsius = linear(raw, scale);
                self.references[slot] = Some(celsius);
                Decoded::plain(Reading::Float(celsius))
            }
            (ChannelKind::Thermocouple(reference), Scale::Thermocouple { range, sensor }) => {
                let cold_junction = self.references[reference].unwrap_or(0.0);
                thermocouple(raw, self.resolution, range, sensor, cold_junction)
            }
            (_, scale) =>
                Decoded::plain(Reading::Float(linear(raw, scale))),
        }
    }

    /// Decodes a raw window frame by frame, so that reference slots are decoded before the
    /// thermocouples paired with them.
    ///
    /// # Panics
    ///
    /// Panics if `raw` has more channel slots than the decoder, or a slot with fewer than
    /// `raw.frames` codes. Windows produced by `window::extract` never do.
    pub fn decode_window(&mut self, raw: &RawWindow) -> Window {
        let mut channels = self.channels.iter().enumerate()
            .filter(|(_, channel)| channel.display)
            .map(|(slot, _)| (slot, ChannelWindow {
                values: Vec::with_capacity(raw.frames),
                warning: None,
            }))
            .collect::<BTreeMap<_, _>>();
        for frame in 0..raw.frames {
            for (slot, code) in raw.frame(frame).enumerate() {
                let decoded = self.decode(code, slot);
                if let Some(channel) = channels.get_mut(&slot) {
                    channel.values.push(decoded.value);
                    if decoded.warning.is_some() {
                        channel.warning = decoded.warning;
                    }
                }
            }
        }
        Window { frames: raw.frames, channels }
    }
}

fn linear(raw: u32, scale: Scale) -> f64 {
    match scale {
        Scale::Linear { gain, offset } => raw as f64 * gain + offset,
        _ => raw as f64,
    }
}

fn thermocouple(raw: u32, resolution: u8, range: Range, sensor: ThermocoupleType,
                cold_junction: f64) -> Decoded {
    let volts = range.code_to_volts(raw, resolution);
    let celsius = cold_junction + volts / sensor.seebeck();
    let (low, high) = sensor.temperature_limits();
    let warning = if raw >= params::max_code(resolution) {
        // a burnt-out or disconnected junction drives the input to positive full scale
        Some(Warning::OpenConnection)
    } else if raw == 0 || celsius < low || celsius > high {
        Some(Warning::OutOfRange)
    } else {
        None
    };
    if let Some(warning) = warning {
        log::debug!("thermocouple code {:#x} ({:.1} °C): {:?}", raw, celsius, warning);
    }
    Decoded { value: Reading::Float(celsius), warning }
}
