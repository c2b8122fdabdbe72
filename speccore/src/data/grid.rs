use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::data::technique::Technique;
use crate::error::SpectrumError;

/// Evenly spaced reference abscissa every record of a technique is stored on.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Grid {
    first: f64,
    last: f64,
    count: usize,
}

impl Grid {
    /// Creates a new `Grid`.
    ///
    /// # Arguments
    ///
    /// * `first` - x value of the first point, must be below `last`.
    /// * `last` - x value of the last point.
    /// * `count` - number of points, at least 2.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use speccore::data::grid::Grid;
    /// let grid = Grid::new(400.0, 4000.0, 901).unwrap();
    /// assert_eq!(grid.step(), 4.0);
    /// assert_eq!(grid.x(900), 4000.0);
    /// ```
    pub fn new(first: f64, last: f64, count: usize) -> Result<Self, SpectrumError> {
        if !first.is_finite() || !last.is_finite() {
            return Err(SpectrumError::InvalidGrid("bounds must be finite".to_string()));
        }
        if count < 2 {
            return Err(SpectrumError::InvalidGrid(format!("at least 2 points required, got {}", count)));
        }
        if first >= last {
            return Err(SpectrumError::InvalidGrid(format!("first ({}) must be below last ({})", first, last)));
        }
        Ok(Grid { first, last, count })
    }

    /// Default reference grid of a technique.
    pub fn native(technique: Technique) -> Self {
        match technique {
            Technique::Ftir | Technique::AtrIr | Technique::VaporPhaseIr => Grid { first: 400.0, last: 4000.0, count: 901 },
            Technique::Raman => Grid { first: 100.0, last: 3500.0, count: 1701 },
            Technique::Ms => Grid { first: 1.0, last: 1000.0, count: 1000 },
        }
    }

    pub fn first(&self) -> f64 {
        self.first
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn step(&self) -> f64 {
        (self.last - self.first) / (self.count - 1) as f64
    }

    /// x value of point `index`, computed the same way evenly spaced queries are expanded.
    pub fn x(&self, index: usize) -> f64 {
        evenly_spaced_x(self.first, self.last, self.count, index)
    }

    pub fn xs(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.x(i)).collect()
    }

    /// Index of the grid point closest to `x`, if `x` lies within half a step of the grid.
    pub fn nearest_index(&self, x: f64) -> Option<usize> {
        let step = self.step();
        if x < self.first - step / 2.0 || x > self.last + step / 2.0 {
            return None;
        }
        let index = ((x - self.first) / step).round();
        Some((index.max(0.0) as usize).min(self.count - 1))
    }
}

impl Display for Grid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Grid({} .. {}, {} points)", self.first, self.last, self.count)
    }
}

/// x value of point `index` of an evenly spaced axis running from `first` to `last`.
pub fn evenly_spaced_x(first: f64, last: f64, count: usize, index: usize) -> f64 {
    if count < 2 {
        return first;
    }
    first + (last - first) * index as f64 / (count - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_validation() {
        assert!(Grid::new(10.0, 10.0, 5).is_err());
        assert!(Grid::new(0.0, 10.0, 1).is_err());
        assert!(Grid::new(f64::NAN, 10.0, 5).is_err());
        assert!(Grid::new(0.0, 10.0, 11).is_ok());
    }

    #[test]
    fn test_nearest_index() {
        let grid = Grid::new(0.0, 10.0, 11).unwrap();
        assert_eq!(grid.nearest_index(3.4), Some(3));
        assert_eq!(grid.nearest_index(-0.4), Some(0));
        assert_eq!(grid.nearest_index(10.6), None);
        assert_eq!(grid.nearest_index(-1.0), None);
    }

    #[test]
    fn test_native_grids() {
        assert_eq!(Grid::native(Technique::Raman).step(), 2.0);
        assert_eq!(Grid::native(Technique::Ms).step(), 1.0);
        assert_eq!(Grid::native(Technique::Ftir), Grid::native(Technique::VaporPhaseIr));
    }
}
