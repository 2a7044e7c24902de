use crate::units::UnitSystem;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// One archive record as handed over by the host.
///
/// Field names on the wire follow the host's archive schema (`dateTime`,
/// `windSpeed`, ...). `interval` is the archive interval in minutes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub date_time: i64,
    #[serde(default, rename = "usUnits")]
    pub unit_system: UnitSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_gust: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_dir: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barometer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    WindSpeed,
    WindGust,
    WindDir,
    OutTemp,
    OutHumidity,
    Barometer,
    Rain,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::WindSpeed => "windSpeed",
            Field::WindGust => "windGust",
            Field::WindDir => "windDir",
            Field::OutTemp => "outTemp",
            Field::OutHumidity => "outHumidity",
            Field::Barometer => "barometer",
            Field::Rain => "rain",
        }
    }
}

impl Record {
    pub fn new(date_time: i64, unit_system: UnitSystem) -> Self {
        Self {
            date_time,
            unit_system,
            ..Self::default()
        }
    }

    /// Measurement value, treating NaN/inf readings as missing.
    pub fn get(&self, field: Field) -> Option<f64> {
        let value = match field {
            Field::WindSpeed => self.wind_speed,
            Field::WindGust => self.wind_gust,
            Field::WindDir => self.wind_dir,
            Field::OutTemp => self.out_temp,
            Field::OutHumidity => self.out_humidity,
            Field::Barometer => self.barometer,
            Field::Rain => self.rain,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn age_secs(&self, now_unix: i64) -> i64 {
        now_unix.saturating_sub(self.date_time)
    }
}

/// Human readable record stamp for log lines, e.g. `2023-11-14 22:13:20 UTC (1700000000)`.
pub fn stamp(date_time: i64) -> String {
    match DateTime::from_timestamp(date_time, 0) {
        Some(dt) => format!("{} ({date_time})", dt.format("%Y-%m-%d %H:%M:%S UTC")),
        None => format!("({date_time})"),
    }
}
