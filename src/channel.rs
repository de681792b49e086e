//! Per-slot channel metadata of a scan.

use crate::{Error, Result};
use crate::params::{Range, Scale, ThermocoupleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Analog,
    Digital,
    Counter,
    /// Cold junction compensation sensor with the given number. Decoded only as context for
    /// thermocouple slots paired with it.
    ThermocoupleReference(u16),
    /// Thermocouple whose cold junction is measured by the reference in the given scan slot.
    Thermocouple(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMetadata {
    pub kind: ChannelKind,
    pub scale: Scale,
    pub display: bool,
    pub label: Option<String>,
}

impl ChannelMetadata {
    pub fn analog(range: Range) -> Self {
        ChannelMetadata { kind: ChannelKind::Analog, scale: Scale::Range(range), display: true, label: None }
    }

    pub fn digital() -> Self {
        ChannelMetadata { kind: ChannelKind::Digital, scale: Scale::NotUsed, display: true, label: None }
    }

    pub fn counter() -> Self {
        ChannelMetadata { kind: ChannelKind::Counter, scale: Scale::NotUsed, display: true, label: None }
    }

    /// Cold junction sensor reading `code * gain + offset` in °C.
    pub fn reference(sensor: u16, gain: f64, offset: f64) -> Self {
        ChannelMetadata {
            kind: ChannelKind::ThermocoupleReference(sensor),
            scale: Scale::Linear { gain, offset },
            display: false,
            label: None,
        }
    }

    pub fn thermocouple(reference: usize, range: Range, sensor: ThermocoupleType) -> Self {
        ChannelMetadata {
            kind: ChannelKind::Thermocouple(reference),
            scale: Scale::Thermocouple { range, sensor },
            display: true,
            label: None,
        }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        ChannelMetadata { label: Some(label.into()), ..self }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, ChannelKind::ThermocoupleReference(_))
    }
}

/// Checks the invariants of a channel list before a scan is armed.
pub fn validate_channels(channels: &[ChannelMetadata]) -> Result<()> {
    let invalid = |message: String| Err(Error::InvalidConfiguration(message));
    if channels.is_empty() {
        return invalid("channel list is empty".to_owned())
    }
    for (slot, channel) in channels.iter().enumerate() {
        match (channel.kind, channel.scale) {
            (ChannelKind::Analog, Scale::Range(_) | Scale::Linear { .. }) => (),
            (ChannelKind::Analog, scale) =>
                return invalid(format!("analog slot {} cannot use {:?}", slot, scale)),
            (ChannelKind::Digital | ChannelKind::Counter, _) => (),
            (ChannelKind::ThermocoupleReference(_), Scale::Linear { .. }) => {
                if channel.display {
                    return invalid(format!("reference slot {} cannot be displayed", slot))
                }
            }
            (ChannelKind::ThermocoupleReference(_), scale) =>
                return invalid(format!("reference slot {} cannot use {:?}", slot, scale)),
            (ChannelKind::Thermocouple(reference), Scale::Thermocouple { .. }) => {
                if reference >= slot {
                    return invalid(format!("thermocouple slot {} must follow its reference slot {}",
                        slot, reference))
                }
                if !channels[reference].is_reference() {
                    return invalid(format!("thermocouple slot {} is paired with slot {}, which is \
                        not a reference", slot, reference))
                }
            }
            (ChannelKind::Thermocouple(_), scale) =>
                return invalid(format!("thermocouple slot {} cannot use {:?}", slot, scale)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn mixed_scan() -> Vec<ChannelMetadata> {
        vec![
            ChannelMetadata::analog(Range::Bip10Volts),
            ChannelMetadata::digital(),
            ChannelMetadata::reference(0, 0.01, -40.0),
            ChannelMetadata::thermocouple(2, Range::BipPt078Volts, ThermocoupleType::K),
            ChannelMetadata::reference(1, 0.01, -40.0),
            ChannelMetadata::thermocouple(4, Range::BipPt078Volts, ThermocoupleType::J),
        ]
    }

    macro_rules! assert_invalid {
        ($channels:expr) => {
            assert!(matches!(validate_channels(&$channels), Err(Error::InvalidConfiguration(_))))
        };
    }

    #[test]
    fn test_valid_mixed_scan() {
        assert!(validate_channels(&mixed_scan()).is_ok());
    }

    #[test]
    fn test_empty() {
        assert_invalid!([]);
    }

    #[test]
    fn test_missing_reference() {
        let mut channels = mixed_scan();
        channels[3].kind = ChannelKind::Thermocouple(1);
        assert_invalid!(channels);
        channels[3].kind = ChannelKind::Thermocouple(3);
        assert_invalid!(channels);
        channels[3].kind = ChannelKind::Thermocouple(4);
        assert_invalid!(channels);
    }

    #[test]
    fn test_displayed_reference() {
        let mut channels = mixed_scan();
        channels[2].display = true;
        assert_invalid!(channels);
    }

    #[test]
    fn test_scale_mismatch() {
        let mut channels = mixed_scan();
        channels[0].scale = Scale::NotUsed;
        assert_invalid!(channels);
        let mut channels = mixed_scan();
        channels[3].scale = Scale::Range(Range::Bip1Volts);
        assert_invalid!(channels);
        let mut channels = mixed_scan();
        channels[2].scale = Scale::NotUsed;
        assert_invalid!(channels);
    }

    #[test]
    fn test_label() {
        let channel = ChannelMetadata::counter().with_label("encoder");
        assert_eq!(channel.label.as_deref(), Some("encoder"));
        assert_eq!(channel.kind, ChannelKind::Counter);
    }
}
