use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{Continuous, Normal};

use crate::data::grid::Grid;
use crate::database::{Database, LicenseTier};
use crate::data::technique::Technique;
use crate::error::SpectrumError;

/// A Gaussian band: center on the x axis, standard deviation and peak height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub center: f64,
    pub width: f64,
    pub height: f64,
}

/// Samples a sum of Gaussian bands on `grid`.
///
/// # Example
///
/// ```rust
/// # use speccore::synthetic::{band_spectrum, Band};
/// # use speccore::data::grid::Grid;
/// let grid = Grid::new(0.0, 100.0, 101).unwrap();
/// let spectrum = band_spectrum(&grid, &[Band { center: 50.0, width: 2.0, height: 1.0 }]).unwrap();
/// assert!((spectrum[50] - 1.0).abs() < 1e-12);
/// assert!(spectrum[0] < 1e-12);
/// ```
pub fn band_spectrum(grid: &Grid, bands: &[Band]) -> Result<Vec<f64>, SpectrumError> {
    let mut values = vec![0.0; grid.count()];
    for band in bands {
        let normal = Normal::new(band.center, band.width)
            .map_err(|e| SpectrumError::InvalidBand(e.to_string()))?;
        let apex = normal.pdf(band.center);
        for (i, value) in values.iter_mut().enumerate() {
            *value += band.height * normal.pdf(grid.x(i)) / apex;
        }
    }
    Ok(values)
}

/// Random band layout generator with a fixed seed, so libraries are reproducible.
pub struct SyntheticSpectra {
    rng: StdRng,
    grid: Grid,
}

impl SyntheticSpectra {
    pub fn new(grid: Grid, seed: u64) -> Self {
        SyntheticSpectra { rng: StdRng::seed_from_u64(seed), grid }
    }

    /// Between 3 and 8 bands, widths of 1 to 4 grid steps, kept away from the grid edges.
    pub fn next_bands(&mut self) -> Vec<Band> {
        let step = self.grid.step();
        let margin = 10.0 * step;
        let band_count = self.rng.gen_range(3..=8);
        (0..band_count)
            .map(|_| Band {
                center: self.rng.gen_range(self.grid.first() + margin..self.grid.last() - margin),
                width: self.rng.gen_range(step..4.0 * step),
                height: self.rng.gen_range(0.1..1.0),
            })
            .collect()
    }

    pub fn next_spectrum(&mut self) -> Result<Vec<f64>, SpectrumError> {
        let bands = self.next_bands();
        band_spectrum(&self.grid, &bands)
    }
}

/// Builds a database of `count` random band spectra on the technique's native grid.
pub fn synthetic_database(
    name: &str,
    technique: Technique,
    license: LicenseTier,
    count: usize,
    seed: u64,
) -> Result<Database, SpectrumError> {
    let grid = Grid::native(technique);
    let mut generator = SyntheticSpectra::new(grid, seed);
    let mut database = Database::new(name, technique, grid, license);
    for i in 0..count {
        let spectrum = generator.next_spectrum()?;
        database.push_spectrum(format!("{} {:05}", name, i), &spectrum)?;
    }
    Ok(database)
}
