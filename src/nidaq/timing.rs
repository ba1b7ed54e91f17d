use serde::{Deserialize, Serialize};
use uom::si::{f64::Frequency, frequency::hertz};

use crate::error::{DaqError, Result};
use crate::nidaq::constants::SampleMode;

/// Sample clock configuration, mirrors `DAQmxCfgSampClkTiming` on the onboard clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleClockTiming {
    pub rate: Frequency,
    pub sample_mode: SampleMode,
    /// Samples per channel to acquire/generate in finite mode, buffer size hint otherwise
    pub samples_per_channel: u64,
}

impl SampleClockTiming {
    pub fn finite(rate_hz: f64, samples_per_channel: u64) -> Self {
        Self {
            rate: Frequency::new::<hertz>(rate_hz),
            sample_mode: SampleMode::Finite,
            samples_per_channel,
        }
    }

    pub fn continuous(rate_hz: f64, samples_per_channel: u64) -> Self {
        Self {
            rate: Frequency::new::<hertz>(rate_hz),
            sample_mode: SampleMode::Continuous,
            samples_per_channel,
        }
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate.get::<hertz>()
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.rate_hz();
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DaqError::InvalidArgument(format!(
                "sample clock rate must be positive, got {rate} Hz"
            )));
        }
        if self.sample_mode == SampleMode::Finite && self.samples_per_channel == 0 {
            return Err(DaqError::InvalidArgument(
                "finite acquisitions need at least one sample per channel".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rate() {
        assert!(SampleClockTiming::finite(0.0, 100).validate().is_err());
        assert!(SampleClockTiming::finite(f64::NAN, 100).validate().is_err());
        assert!(SampleClockTiming::finite(10_000.0, 1000).validate().is_ok());
    }

    #[test]
    fn finite_needs_samples() {
        assert!(SampleClockTiming::finite(1000.0, 0).validate().is_err());
        assert!(SampleClockTiming::continuous(1000.0, 0).validate().is_ok());
    }
}
