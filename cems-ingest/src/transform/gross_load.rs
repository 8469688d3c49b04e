use cems_client::domain::EmissionBatch;
use serde::Deserialize;

/// Unit-mismatch repair for `gross_load_mw`.
///
/// The largest fossil plant is around 3500 MW and the largest single unit
/// in EIA-860 is under 1500 MW, so a reading above `threshold_mw` is taken
/// to be reported in kW and divided by `divisor`. This is a heuristic: a
/// cogeneration unit (plant 54634, unit 1) regularly and legitimately
/// reports around 1700 MW and sits just under the default cutoff; anything
/// like it above the threshold would be wrongly scaled down.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GrossLoadCorrection {
    pub threshold_mw: f64,
    pub divisor: f64,
}

impl Default for GrossLoadCorrection {
    fn default() -> Self {
        Self {
            threshold_mw: 2000.0,
            divisor: 1000.0,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GrossLoadCorrectionError {
    #[error("gross load threshold must be a positive finite number, got {0}")]
    Threshold(f64),
    #[error("gross load divisor must be a positive finite number, got {0}")]
    Divisor(f64),
}

impl GrossLoadCorrection {
    pub fn validate(&self) -> Result<(), GrossLoadCorrectionError> {
        if !self.threshold_mw.is_finite() || self.threshold_mw <= 0.0 {
            return Err(GrossLoadCorrectionError::Threshold(self.threshold_mw));
        }
        if !self.divisor.is_finite() || self.divisor <= 0.0 {
            return Err(GrossLoadCorrectionError::Divisor(self.divisor));
        }
        Ok(())
    }

    pub fn correct(&self, gross_load_mw: f64) -> f64 {
        if gross_load_mw > self.threshold_mw {
            gross_load_mw / self.divisor
        } else {
            gross_load_mw
        }
    }

    /// Returns the batch and how many values were rescaled.
    pub fn apply(&self, mut batch: EmissionBatch) -> (EmissionBatch, usize) {
        let mut corrected = 0usize;
        for record in &mut batch.records {
            if let Some(load) = record.gross_load_mw.as_mut() {
                if *load > self.threshold_mw {
                    *load = self.correct(*load);
                    corrected += 1;
                }
            }
        }

        if corrected > 0 {
            metrics::counter!("cems_gross_load_corrected_total").increment(corrected as u64);
            tracing::debug!(batch = %batch.key, corrected, "implausible gross load rescaled");
        }

        (batch, corrected)
    }
}
