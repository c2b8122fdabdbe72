use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::data::grid::evenly_spaced_x;
use crate::data::technique::{XUnit, YUnit};
use crate::error::SpectrumError;

/// How the x values of a query are given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Abscissa {
    /// Implied by the first and last x value and the number of intensities.
    Even { first: f64, last: f64 },
    /// One explicit x value per intensity.
    Uneven(Vec<f64>),
}

/// A measured spectrum handed to a search, before any preprocessing.
///
/// Construction validates the invariants of a query: at least one point,
/// equal array lengths, finite values and a non-degenerate evenly spaced axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuerySpectrum {
    pub abscissa: Abscissa,
    pub intensity: Vec<f64>,
    pub x_unit: XUnit,
    pub y_unit: YUnit,
}

impl QuerySpectrum {
    /// Creates an evenly spaced query.
    ///
    /// # Arguments
    ///
    /// * `intensity` - y values, one per point.
    /// * `first_x` - x value of the first point.
    /// * `last_x` - x value of the last point, may be below `first_x` for descending axes.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use speccore::data::spectrum::QuerySpectrum;
    /// # use speccore::data::technique::{XUnit, YUnit};
    /// let query = QuerySpectrum::evenly_spaced(&[1.0, 2.0, 3.0], 4000.0, 3992.0, XUnit::Wavenumbers, YUnit::Absorbance).unwrap();
    /// assert_eq!(query.x_values(), vec![4000.0, 3996.0, 3992.0]);
    /// ```
    pub fn evenly_spaced(
        intensity: &[f64],
        first_x: f64,
        last_x: f64,
        x_unit: XUnit,
        y_unit: YUnit,
    ) -> Result<Self, SpectrumError> {
        if intensity.is_empty() {
            return Err(SpectrumError::EmptySpectrum);
        }
        if !first_x.is_finite() || !last_x.is_finite() {
            return Err(SpectrumError::NonFinite { index: 0 });
        }
        if intensity.len() > 1 && first_x == last_x {
            return Err(SpectrumError::DegenerateAxis { x: first_x, count: intensity.len() });
        }
        check_finite(intensity)?;

        Ok(QuerySpectrum {
            abscissa: Abscissa::Even { first: first_x, last: last_x },
            intensity: intensity.to_vec(),
            x_unit,
            y_unit,
        })
    }

    /// Creates a query with explicit x values. Order is not required.
    pub fn unevenly_spaced(
        x: &[f64],
        intensity: &[f64],
        x_unit: XUnit,
        y_unit: YUnit,
    ) -> Result<Self, SpectrumError> {
        if x.len() != intensity.len() {
            return Err(SpectrumError::LengthMismatch { x_len: x.len(), y_len: intensity.len() });
        }
        if intensity.is_empty() {
            return Err(SpectrumError::EmptySpectrum);
        }
        check_finite(x)?;
        check_finite(intensity)?;

        Ok(QuerySpectrum {
            abscissa: Abscissa::Uneven(x.to_vec()),
            intensity: intensity.to_vec(),
            x_unit,
            y_unit,
        })
    }

    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    /// x value of every point, in input order.
    pub fn x_values(&self) -> Vec<f64> {
        match &self.abscissa {
            Abscissa::Even { first, last } => (0..self.len())
                .map(|i| evenly_spaced_x(*first, *last, self.len(), i))
                .collect(),
            Abscissa::Uneven(x) => x.clone(),
        }
    }
}

impl Display for QuerySpectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let spacing = match self.abscissa {
            Abscissa::Even { .. } => "evenly spaced",
            Abscissa::Uneven(_) => "unevenly spaced",
        };
        write!(f, "QuerySpectrum(data points: {}, {}, x: {}, y: {})", self.len(), spacing, self.x_unit, self.y_unit)
    }
}

fn check_finite(values: &[f64]) -> Result<(), SpectrumError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(SpectrumError::NonFinite { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evenly_spaced_validation() {
        let empty: [f64; 0] = [];
        assert_eq!(
            QuerySpectrum::evenly_spaced(&empty, 0.0, 1.0, XUnit::Wavenumbers, YUnit::Absorbance),
            Err(SpectrumError::EmptySpectrum)
        );
        assert!(matches!(
            QuerySpectrum::evenly_spaced(&[1.0, 2.0], 5.0, 5.0, XUnit::Wavenumbers, YUnit::Absorbance),
            Err(SpectrumError::DegenerateAxis { count: 2, .. })
        ));
        // a single point may have first == last
        assert!(QuerySpectrum::evenly_spaced(&[1.0], 5.0, 5.0, XUnit::Wavenumbers, YUnit::Absorbance).is_ok());
    }

    #[test]
    fn test_unevenly_spaced_validation() {
        assert_eq!(
            QuerySpectrum::unevenly_spaced(&[1.0, 2.0], &[1.0], XUnit::MassToCharge, YUnit::ArbitraryIntensity),
            Err(SpectrumError::LengthMismatch { x_len: 2, y_len: 1 })
        );
        assert_eq!(
            QuerySpectrum::unevenly_spaced(&[1.0, f64::NAN], &[1.0, 2.0], XUnit::MassToCharge, YUnit::ArbitraryIntensity),
            Err(SpectrumError::NonFinite { index: 1 })
        );
    }
}
