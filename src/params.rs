//! Calibration descriptors: input ranges, element widths, and thermocouple sensor types.

use std::fmt;

/// Width of a single raw element in the sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementWidth {
    /// 16-bit elements, for devices with a resolution of up to 16 bits.
    #[default]
    Narrow,
    /// 32-bit elements, for devices with a resolution above 16 bits.
    Wide,
}

impl ElementWidth {
    pub fn for_resolution(resolution: u8) -> Self {
        if resolution <= 16 { Self::Narrow } else { Self::Wide }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Narrow => 2,
            Self::Wide   => 4,
        }
    }

    /// Largest code representable by one element.
    pub fn max_code(self) -> u32 {
        match self {
            Self::Narrow => u16::MAX as u32,
            Self::Wide   => u32::MAX,
        }
    }
}

/// Input range of an analog or thermocouple channel, in volts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Range {
    #[default]
    Bip10Volts,
    Bip5Volts,
    Bip2Pt5Volts,
    Bip1Volts,
    BipPt625Volts,
    /// ±78.125 mV, the usual range of thermocouple inputs.
    BipPt078Volts,
    Uni10Volts,
    Uni5Volts,
}

impl Range {
    pub const ALL: [Range; 8] = [
        Self::Bip10Volts, Self::Bip5Volts, Self::Bip2Pt5Volts, Self::Bip1Volts,
        Self::BipPt625Volts, Self::BipPt078Volts, Self::Uni10Volts, Self::Uni5Volts,
    ];

    /// Lower and upper limits of the range in volts.
    pub fn limits(self) -> (f64, f64) {
        match self {
            Self::Bip10Volts    => (-10.0, 10.0),
            Self::Bip5Volts     => (-5.0, 5.0),
            Self::Bip2Pt5Volts  => (-2.5, 2.5),
            Self::Bip1Volts     => (-1.0, 1.0),
            Self::BipPt625Volts => (-0.625, 0.625),
            Self::BipPt078Volts => (-0.078125, 0.078125),
            Self::Uni10Volts    => (0.0, 10.0),
            Self::Uni5Volts     => (0.0, 5.0),
        }
    }

    pub fn span(self) -> f64 {
        let (low, high) = self.limits();
        high - low
    }

    /// Weight of one code at `resolution` bits.
    pub fn lsb(self, resolution: u8) -> f64 {
        self.span() / full_scale_codes(resolution)
    }

    /// Converts a raw code at `resolution` bits into volts. Code zero maps to the lower limit.
    pub fn code_to_volts(self, code: u32, resolution: u8) -> f64 {
        let (low, _) = self.limits();
        low + code as f64 * self.lsb(resolution)
    }

    /// Converts volts into the nearest raw code at `resolution` bits, clamped to full scale.
    pub fn volts_to_code(self, volts: f64, resolution: u8) -> u32 {
        let (low, _) = self.limits();
        let code = ((volts - low) / self.lsb(resolution)).round();
        code.clamp(0.0, max_code(resolution) as f64) as u32
    }
}

fn full_scale_codes(resolution: u8) -> f64 {
    (1u64 << resolution) as f64
}

/// Largest code produced by a converter with `resolution` bits.
pub fn max_code(resolution: u8) -> u32 {
    ((1u64 << resolution) - 1) as u32
}

/// Thermocouple sensor type, used for cold junction compensation and range checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThermocoupleType {
    J,
    #[default]
    K,
    T,
    E,
    N,
    R,
    S,
    B,
}

impl ThermocoupleType {
    /// Average Seebeck coefficient in volts per °C.
    pub fn seebeck(self) -> f64 {
        (match self {
            Self::J => 52.0,
            Self::K => 41.0,
            Self::T => 43.0,
            Self::E => 68.0,
            Self::N => 27.0,
            Self::R => 10.0,
            Self::S => 10.0,
            Self::B => 8.0,
        }) * 1e-6
    }

    /// Valid measurement range in °C.
    pub fn temperature_limits(self) -> (f64, f64) {
        match self {
            Self::J => (-210.0, 1200.0),
            Self::K => (-270.0, 1372.0),
            Self::T => (-270.0, 400.0),
            Self::E => (-270.0, 1000.0),
            Self::N => (-270.0, 1300.0),
            Self::R => (-50.0, 1768.0),
            Self::S => (-50.0, 1768.0),
            Self::B => (0.0, 1820.0),
        }
    }
}

/// Describes how raw codes of a channel slot map to engineering units.
#[derive(Clone, Copy, PartialEq, Default)]
pub enum Scale {
    /// The slot carries no calibration (digital ports, counters).
    #[default]
    NotUsed,
    /// Voltage input with the given range.
    Range(Range),
    /// `value = code * gain + offset`.
    Linear { gain: f64, offset: f64 },
    /// Thermocouple input: voltage range of the converter and the sensor type.
    Thermocouple { range: Range, sensor: ThermocoupleType },
}

impl fmt::Debug for Scale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotUsed =>
                write!(f, "Scale::NotUsed"),
            Self::Range(range) =>
                write!(f, "Scale::Range({:?})", range),
            Self::Linear { gain, offset } =>
                write!(f, "Scale::Linear({} * code {:+})", gain, offset),
            Self::Thermocouple { range, sensor } =>
                write!(f, "Scale::Thermocouple({:?}, type {:?})", range, sensor),
        }
    }
}
