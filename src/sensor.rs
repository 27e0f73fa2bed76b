//! Sensor abstraction.
//!
//! Reading hardware is out of scope for this crate; a driver only has to name the
//! metrics it produces and return one value per metric on demand.

/// A named quantity published on its own topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Metric {
    /// Topic level and JSON key, e.g. `temperature`.
    pub name: &'static str,
}

impl Metric {
    pub const TEMPERATURE: Metric = Metric::new("temperature");
    pub const HUMIDITY: Metric = Metric::new("humidity");

    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

/// A synchronous sensor.
pub trait Sensor {
    /// Metrics in publish order.
    fn metrics(&self) -> &[Metric];

    /// Samples one metric. `None` (or a non-finite value) means no reading.
    fn read(&mut self, metric: Metric) -> Option<f32>;
}

/// One sampled value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub metric: Metric,
    pub value: Option<f32>,
}

impl Reading {
    pub const fn new(metric: Metric, value: Option<f32>) -> Self {
        Self { metric, value }
    }

    /// The value, if it is a usable number.
    pub fn valid_value(&self) -> Option<f32> {
        self.value.filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_and_infinite_readings_are_invalid() {
        assert_eq!(Reading::new(Metric::TEMPERATURE, Some(21.5)).valid_value(), Some(21.5));
        assert_eq!(Reading::new(Metric::TEMPERATURE, Some(f32::NAN)).valid_value(), None);
        assert_eq!(Reading::new(Metric::HUMIDITY, Some(f32::INFINITY)).valid_value(), None);
        assert_eq!(Reading::new(Metric::HUMIDITY, None).valid_value(), None);
    }
}
