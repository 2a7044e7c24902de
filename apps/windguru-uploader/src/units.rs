use crate::record::Record;
use serde::{Deserialize, Serialize};

pub const MPS_TO_KNOT: f64 = 1.943844;
const MPS_TO_KPH: f64 = 3.6;
const MPS_TO_MPH: f64 = 2.236_936_3;
const INHG_TO_MBAR: f64 = 33.863_886_666_7;
const INCH_TO_MM: f64 = 25.4;
const CM_TO_MM: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnit {
    MeterPerSecond,
    KmPerHour,
    MilePerHour,
    Knot,
}

impl SpeedUnit {
    fn per_meter_per_second(self) -> f64 {
        match self {
            SpeedUnit::MeterPerSecond => 1.0,
            SpeedUnit::KmPerHour => MPS_TO_KPH,
            SpeedUnit::MilePerHour => MPS_TO_MPH,
            SpeedUnit::Knot => MPS_TO_KNOT,
        }
    }

    pub fn convert(self, value: f64, to: SpeedUnit) -> f64 {
        if self == to {
            return value;
        }
        value / self.per_meter_per_second() * to.per_meter_per_second()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn convert(self, value: f64, to: TemperatureUnit) -> f64 {
        match (self, to) {
            (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => (value - 32.0) * 5.0 / 9.0,
            (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
            _ => value,
        }
    }
}

/// Millibar and hectopascal are the same quantity; WindGuru labels it hPa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureUnit {
    Mbar,
    InchHg,
}

impl PressureUnit {
    fn per_mbar(self) -> f64 {
        match self {
            PressureUnit::Mbar => 1.0,
            PressureUnit::InchHg => 1.0 / INHG_TO_MBAR,
        }
    }

    pub fn convert(self, value: f64, to: PressureUnit) -> f64 {
        if self == to {
            return value;
        }
        value / self.per_mbar() * to.per_mbar()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RainUnit {
    Mm,
    Cm,
    Inch,
}

impl RainUnit {
    fn in_mm(self) -> f64 {
        match self {
            RainUnit::Mm => 1.0,
            RainUnit::Cm => CM_TO_MM,
            RainUnit::Inch => INCH_TO_MM,
        }
    }

    pub fn convert(self, value: f64, to: RainUnit) -> f64 {
        if self == to {
            return value;
        }
        value * self.in_mm() / to.in_mm()
    }
}

/// Unit system a record was archived in. Serialized as the host's numeric
/// `usUnits` code (1, 16, 17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum UnitSystem {
    #[default]
    Us,
    Metric,
    MetricWx,
}

impl UnitSystem {
    pub fn speed(self) -> SpeedUnit {
        match self {
            UnitSystem::Us => SpeedUnit::MilePerHour,
            UnitSystem::Metric => SpeedUnit::KmPerHour,
            UnitSystem::MetricWx => SpeedUnit::MeterPerSecond,
        }
    }

    pub fn temperature(self) -> TemperatureUnit {
        match self {
            UnitSystem::Us => TemperatureUnit::Fahrenheit,
            UnitSystem::Metric | UnitSystem::MetricWx => TemperatureUnit::Celsius,
        }
    }

    pub fn pressure(self) -> PressureUnit {
        match self {
            UnitSystem::Us => PressureUnit::InchHg,
            UnitSystem::Metric | UnitSystem::MetricWx => PressureUnit::Mbar,
        }
    }

    pub fn rain(self) -> RainUnit {
        match self {
            UnitSystem::Us => RainUnit::Inch,
            UnitSystem::Metric => RainUnit::Cm,
            UnitSystem::MetricWx => RainUnit::Mm,
        }
    }
}

impl TryFrom<u8> for UnitSystem {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(UnitSystem::Us),
            16 => Ok(UnitSystem::Metric),
            17 => Ok(UnitSystem::MetricWx),
            other => Err(format!("unknown unit system code {other}")),
        }
    }
}

impl From<UnitSystem> for u8 {
    fn from(system: UnitSystem) -> Self {
        match system {
            UnitSystem::Us => 1,
            UnitSystem::Metric => 16,
            UnitSystem::MetricWx => 17,
        }
    }
}

/// Returns a copy of `record` expressed in METRICWX units (m/s, degC, mbar, mm).
pub fn to_metricwx(record: &Record) -> Record {
    let from = record.unit_system;
    let to = UnitSystem::MetricWx;
    let speed = |v: f64| from.speed().convert(v, to.speed());

    Record {
        unit_system: to,
        wind_speed: record.wind_speed.map(speed),
        wind_gust: record.wind_gust.map(speed),
        out_temp: record
            .out_temp
            .map(|v| from.temperature().convert(v, to.temperature())),
        barometer: record
            .barometer
            .map(|v| from.pressure().convert(v, to.pressure())),
        rain: record.rain.map(|v| from.rain().convert(v, to.rain())),
        ..record.clone()
    }
}
