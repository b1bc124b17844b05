use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MassUnit {
    #[default]
    Da,
    Ppm,
}

/// Deviation of `observed` from `theoretical`, expressed in `unit`.
pub fn compute_mass_value(observed: f64, theoretical: f64, unit: MassUnit) -> f64 {
    let delta = observed - theoretical;
    match unit {
        MassUnit::Da => delta,
        MassUnit::Ppm => delta / theoretical * 1e6,
    }
}

/// Converts a deviation expressed in `unit` back to Dalton around `reference`.
pub fn compute_mass_tolerance(value: f64, reference: f64, unit: MassUnit) -> f64 {
    match unit {
        MassUnit::Da => value,
        MassUnit::Ppm => value * reference / 1e6,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassTolerance {
    pub value: f64,
    pub unit: MassUnit,
}

impl Default for MassTolerance {
    fn default() -> Self {
        Self { value: 0.02, unit: MassUnit::Da }
    }
}

impl MassTolerance {
    pub fn da(value: f64) -> Self {
        Self { value, unit: MassUnit::Da }
    }

    pub fn ppm(value: f64) -> Self {
        Self { value, unit: MassUnit::Ppm }
    }

    /// Absolute tolerance in Dalton for a mass of `reference`.
    pub fn to_da(&self, reference: f64) -> f64 {
        compute_mass_tolerance(self.value, reference.abs(), self.unit).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_and_tolerance_are_inverse() {
        for &unit in &[MassUnit::Da, MassUnit::Ppm] {
            for &(m, t) in &[(500.0, 0.02), (1234.567, 0.5), (201.0957, 0.001)] {
                for sign in [-1.0, 1.0] {
                    let v = compute_mass_value(m + sign * t, m, unit);
                    let back = compute_mass_tolerance(v, m, unit);
                    assert!((back - sign * t).abs() < 1e-9, "{unit:?} {m} {t}");
                }
            }
        }
    }

    #[test]
    fn ppm_scales_with_reference() {
        let tol = MassTolerance::ppm(10.0);
        assert!((tol.to_da(1000.0) - 0.01).abs() < 1e-12);
        assert!((tol.to_da(2000.0) - 0.02).abs() < 1e-12);
        assert_eq!(MassTolerance::da(0.05).to_da(12345.0), 0.05);
    }
}
