//! Surface-brightness levels for isophotal asymmetry.

/// Surface-brightness levels (mag/arcsec²) and the pixel flux thresholds they map to.
#[derive(Debug, Clone, PartialEq)]
pub struct IsophoteSchedule {
    levels: Vec<f64>,
    fluxes: Vec<f64>,
}

impl IsophoteSchedule {
    /// Levels `start, start + step, ..` up to and including `stop`.
    ///
    /// A level `sb` maps to the per-pixel flux
    /// `pixel_scale² × 10^(−(sb − zero_point) / 2.5)`.
    pub fn new(start: f64, stop: f64, step: f64, pixel_scale: f64, zero_point: f64) -> Self {
        let mut levels = Vec::new();
        if step > 0.0 {
            let count = ((stop - start) / step + 1e-9).floor();
            if count >= 0.0 {
                levels = (0..=count as usize)
                    .map(|i| start + i as f64 * step)
                    .collect();
            }
        }
        let fluxes = levels
            .iter()
            .map(|sb| pixel_scale.powi(2) * 10f64.powf(-(sb - zero_point) / 2.5))
            .collect();
        Self { levels, fluxes }
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn fluxes(&self) -> &[f64] {
        &self.fluxes
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Output field name of each level, e.g. `aiso_22.5`
    pub fn field_names(&self) -> Vec<String> {
        self.levels.iter().map(|sb| format!("aiso_{sb:.1}")).collect()
    }
}
