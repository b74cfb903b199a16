//! Sensor channels and the per-cycle set of channel values.

use core::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A numeric sensor channel recorded by the collector.
///
/// The string form (see [`Channel::as_str`]) is also the column name in the
/// record store and the key used in upload payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Channel {
    /// Gas sensor level (raw ADC scale).
    GasLevel,
    /// Sound level (raw ADC scale).
    SoundLevel,
    /// Load-cell weight in the unit used for calibration.
    Weight,
    /// Temperature inside the hive in Celsius.
    TempInside,
    /// Ambient temperature in Celsius.
    TempOutside,
    /// Relative humidity inside the hive in percent.
    HumidityInside,
    /// Ambient relative humidity in percent.
    HumidityOutside,
    /// Barometric pressure in hPa.
    Pressure,
}

impl Channel {
    /// Every channel, in storage column order.
    pub const ALL: [Channel; 8] = [
        Channel::GasLevel,
        Channel::SoundLevel,
        Channel::Weight,
        Channel::TempInside,
        Channel::TempOutside,
        Channel::HumidityInside,
        Channel::HumidityOutside,
        Channel::Pressure,
    ];

    /// Snake-case name of the channel.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::GasLevel => "gas_level",
            Channel::SoundLevel => "sound_level",
            Channel::Weight => "weight",
            Channel::TempInside => "temp_inside",
            Channel::TempOutside => "temp_outside",
            Channel::HumidityInside => "humidity_inside",
            Channel::HumidityOutside => "humidity_outside",
            Channel::Pressure => "pressure",
        }
    }

    /// Error-log code emitted when this channel yields no reading.
    ///
    /// ```
    /// use hivewatch_types::Channel;
    ///
    /// assert_eq!(Channel::Weight.missing_code(), "SENSOR_WEIGHT_MISSING");
    /// assert_eq!(Channel::TempInside.missing_code(), "SENSOR_TEMP_INSIDE_MISSING");
    /// ```
    #[must_use]
    pub fn missing_code(&self) -> String {
        format!("SENSOR_{}_MISSING", self.as_str().to_ascii_uppercase())
    }

    /// Display unit for the channel.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Channel::GasLevel | Channel::SoundLevel => "",
            Channel::Weight => "g",
            Channel::TempInside | Channel::TempOutside => "°C",
            Channel::HumidityInside | Channel::HumidityOutside => "%",
            Channel::Pressure => "hPa",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ParseError::UnknownChannel(s.to_string()))
    }
}

/// One value per channel, each optional.
///
/// A missing channel means "no reading this cycle" (hardware absent, read
/// failed or timed out). It is never replaced by a default number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Readings {
    pub gas_level: Option<f64>,
    pub sound_level: Option<f64>,
    pub weight: Option<f64>,
    pub temp_inside: Option<f64>,
    pub temp_outside: Option<f64>,
    pub humidity_inside: Option<f64>,
    pub humidity_outside: Option<f64>,
    pub pressure: Option<f64>,
}

impl Readings {
    /// Create an empty set of readings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::GasLevel => self.gas_level,
            Channel::SoundLevel => self.sound_level,
            Channel::Weight => self.weight,
            Channel::TempInside => self.temp_inside,
            Channel::TempOutside => self.temp_outside,
            Channel::HumidityInside => self.humidity_inside,
            Channel::HumidityOutside => self.humidity_outside,
            Channel::Pressure => self.pressure,
        }
    }

    /// Set (or clear) the value of a channel.
    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        let slot = match channel {
            Channel::GasLevel => &mut self.gas_level,
            Channel::SoundLevel => &mut self.sound_level,
            Channel::Weight => &mut self.weight,
            Channel::TempInside => &mut self.temp_inside,
            Channel::TempOutside => &mut self.temp_outside,
            Channel::HumidityInside => &mut self.humidity_inside,
            Channel::HumidityOutside => &mut self.humidity_outside,
            Channel::Pressure => &mut self.pressure,
        };
        *slot = value;
    }

    /// Builder-style variant of [`Readings::set`].
    #[must_use]
    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.set(channel, Some(value));
        self
    }

    /// Iterate over the channels that carry a value.
    pub fn present(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|v| (c, v)))
    }

    /// True when no channel carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// First channel whose value is NaN or infinite, if any.
    #[must_use]
    pub fn first_non_finite(&self) -> Option<(Channel, f64)> {
        self.present().find(|(_, v)| !v.is_finite())
    }
}
