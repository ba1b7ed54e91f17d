use serde::{Deserialize, Serialize};
use uom::si::{electric_potential::volt, f64::ElectricPotential};

use crate::error::{DaqError, Result};

pub type ChannelName = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Generic Nidaq channel
pub struct Channel {
    /// Physical channel, e.g. `Dev1/ai0`
    pub physical_channel: String,
    /// Name to assign to the virtual channel, the driver picks one when absent
    pub name: Option<ChannelName>,
}

impl Channel {
    pub fn new(physical_channel: impl Into<String>) -> Self {
        Self {
            physical_channel: physical_channel.into(),
            name: None,
        }
    }

    pub fn named(physical_channel: impl Into<String>, name: impl Into<ChannelName>) -> Self {
        Self {
            physical_channel: physical_channel.into(),
            name: Some(name.into()),
        }
    }
}

/// Nidaq analog voltage input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogInputChannel {
    pub channel: Channel,
    pub min: ElectricPotential,
    pub max: ElectricPotential,
}

/// Nidaq analog voltage output channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogOutputChannel {
    pub channel: Channel,
    pub min: ElectricPotential,
    pub max: ElectricPotential,
}

impl AnalogInputChannel {
    /// Input channel on the driver's default +/-10 V range
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            min: ElectricPotential::new::<volt>(-10.0),
            max: ElectricPotential::new::<volt>(10.0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_range(&self.channel, self.min, self.max)
    }
}

impl AnalogOutputChannel {
    /// Output channel on the driver's default +/-10 V range
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            min: ElectricPotential::new::<volt>(-10.0),
            max: ElectricPotential::new::<volt>(10.0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_range(&self.channel, self.min, self.max)
    }
}

fn validate_range(channel: &Channel, min: ElectricPotential, max: ElectricPotential) -> Result<()> {
    if channel.physical_channel.is_empty() {
        return Err(DaqError::InvalidArgument(
            "physical channel name must not be empty".to_string(),
        ));
    }
    if !(min < max) {
        return Err(DaqError::InvalidArgument(format!(
            "channel {} range is empty: min {:?} >= max {:?}",
            channel.physical_channel,
            min.get::<volt>(),
            max.get::<volt>()
        )));
    }
    Ok(())
}
