use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::peaks::{find_peaks, Peak, DEFAULT_RELATIVE_THRESHOLD};
use crate::algorithm::preprocess::normalize_intensities;
use crate::data::grid::Grid;
use crate::data::technique::Technique;
use crate::error::SpectrumError;

/// Whether the caller may fully use results from a database.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum LicenseTier {
    Licensed,
    Unlicensed,
}

/// How the records of a technique are searched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Full-spectrum comparison.
    #[default]
    Spectral,
    /// Comparison of detected peak lists.
    Peak,
    /// Spectral comparison followed by mixture decomposition.
    Mixture,
}

impl SearchMode {
    pub fn to_i64(&self) -> i64 {
        match self {
            SearchMode::Spectral => 0,
            SearchMode::Peak => 1,
            SearchMode::Mixture => 2,
        }
    }
}

impl TryFrom<i64> for SearchMode {
    type Error = SpectrumError;

    fn try_from(item: i64) -> Result<Self, Self::Error> {
        match item {
            0 => Ok(SearchMode::Spectral),
            1 => Ok(SearchMode::Peak),
            2 => Ok(SearchMode::Mixture),
            _ => Err(SpectrumError::UnknownCode {
                kind: "search mode",
                code: u32::try_from(item).unwrap_or(u32::MAX),
            }),
        }
    }
}

impl Display for SearchMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Spectral => write!(f, "SPECTRAL"),
            SearchMode::Peak => write!(f, "PEAK"),
            SearchMode::Mixture => write!(f, "MIXTURE"),
        }
    }
}

/// One immutable reference entry, indexed for scoring.
///
/// Intensities are stored on the technique grid, baseline corrected and scaled to unit
/// L2 norm; peaks are detected once at construction.
#[derive(Clone, Debug)]
pub struct Record {
    name: String,
    technique: Technique,
    license: LicenseTier,
    intensities: Vec<f64>,
    peaks: Vec<Peak>,
}

impl Record {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn license(&self) -> LicenseTier {
        self.license
    }

    pub fn is_locked(&self) -> bool {
        self.license == LicenseTier::Unlicensed
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }
}

/// A read-only collection of records of one technique, sharing one grid and license tier.
#[derive(Clone, Debug)]
pub struct Database {
    name: String,
    technique: Technique,
    grid: Grid,
    license: LicenseTier,
    records: Vec<Record>,
}

impl Database {
    pub fn new(name: impl Into<String>, technique: Technique, grid: Grid, license: LicenseTier) -> Self {
        Database { name: name.into(), technique, grid, license, records: Vec::new() }
    }

    /// Indexes a reference spectrum sampled on the database grid and appends it.
    ///
    /// # Arguments
    ///
    /// * `name` - record name reported in matches
    /// * `values` - one intensity per grid point, in the technique's native y convention
    ///
    pub fn push_spectrum(&mut self, name: impl Into<String>, values: &[f64]) -> Result<(), SpectrumError> {
        let record = self.index_record(name.into(), values)?;
        self.records.push(record);
        Ok(())
    }

    /// Indexes many spectra in parallel and appends them in the given order.
    /// Nothing is appended if any spectrum is rejected.
    pub fn extend_spectra(&mut self, entries: Vec<(String, Vec<f64>)>) -> Result<(), SpectrumError> {
        let records: Vec<Record> = entries
            .into_par_iter()
            .map(|(name, values)| self.index_record(name, &values))
            .collect::<Result<_, _>>()?;
        self.records.extend(records);
        Ok(())
    }

    fn index_record(&self, name: String, values: &[f64]) -> Result<Record, SpectrumError> {
        if values.len() != self.grid.count() {
            return Err(SpectrumError::LengthMismatch { x_len: self.grid.count(), y_len: values.len() });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SpectrumError::NonFinite { index });
        }

        let mut intensities = values.to_vec();
        normalize_intensities(&mut intensities, self.technique.uses_baseline_correction());
        let peaks = find_peaks(&intensities, &self.grid, DEFAULT_RELATIVE_THRESHOLD);

        Ok(Record { name, technique: self.technique, license: self.license, intensities, peaks })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn license(&self) -> LicenseTier {
        self.license
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Display for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Database({}, {}, records: {}, {:?})", self.name, self.technique, self.records.len(), self.license)
    }
}

/// A record seen during a technique scan, with its position in scan order.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub ordinal: usize,
    pub database: &'a Database,
    pub record: &'a Record,
}

/// The process-wide set of databases, grouped by technique.
///
/// All databases of one technique share a grid; the search mode is configured per technique.
#[derive(Clone, Debug, Default)]
pub struct SpectralLibrary {
    databases: Vec<Database>,
    grids: BTreeMap<Technique, Grid>,
    modes: BTreeMap<Technique, SearchMode>,
}

impl SpectralLibrary {
    pub fn new() -> Self {
        SpectralLibrary::default()
    }

    /// Adds a database. The first database of a technique fixes the technique's grid.
    pub fn add_database(&mut self, database: Database) -> Result<(), SpectrumError> {
        let technique = database.technique();
        match self.grids.get(&technique) {
            Some(grid) if grid != database.grid() => {
                return Err(SpectrumError::GridMismatch { name: database.name().to_string(), technique });
            }
            Some(_) => {}
            None => {
                self.grids.insert(technique, *database.grid());
            }
        }
        self.databases.push(database);
        Ok(())
    }

    pub fn with_mode(mut self, technique: Technique, mode: SearchMode) -> Self {
        self.set_mode(technique, mode);
        self
    }

    pub fn set_mode(&mut self, technique: Technique, mode: SearchMode) {
        self.modes.insert(technique, mode);
    }

    pub fn mode(&self, technique: Technique) -> SearchMode {
        self.modes.get(&technique).copied().unwrap_or_default()
    }

    pub fn grid(&self, technique: Technique) -> Option<&Grid> {
        self.grids.get(&technique)
    }

    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    pub fn databases_for(&self, technique: Technique) -> impl Iterator<Item = &Database> {
        self.databases.iter().filter(move |db| db.technique() == technique)
    }

    /// All records of a technique in scan order: databases in insertion order, records in
    /// database order.
    pub fn candidates(&self, technique: Technique) -> Vec<Candidate<'_>> {
        self.databases_for(technique)
            .flat_map(|database| database.records().iter().map(move |record| (database, record)))
            .enumerate()
            .map(|(ordinal, (database, record))| Candidate { ordinal, database, record })
            .collect()
    }

    pub fn record_count(&self, technique: Technique) -> usize {
        self.databases_for(technique).map(|db| db.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(0.0, 9.0, 10).unwrap()
    }

    #[test]
    fn test_push_spectrum_normalizes_and_indexes() {
        let mut db = Database::new("test", Technique::Ftir, grid(), LicenseTier::Licensed);
        db.push_spectrum("band", &[1.0, 1.0, 1.0, 3.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        let record = &db.records()[0];
        assert_eq!(record.intensities()[0], 0.0);
        assert!((record.intensities()[3] - 1.0).abs() < 1e-12);
        assert_eq!(record.peaks().len(), 1);
        assert!(!record.is_locked());
    }

    #[test]
    fn test_extend_spectra_keeps_order_and_is_atomic() {
        let mut db = Database::new("test", Technique::Ms, grid(), LicenseTier::Licensed);
        let entries: Vec<(String, Vec<f64>)> = (0..10)
            .map(|i| {
                let mut values = vec![0.0; 10];
                values[i] = 2.0;
                (format!("spike {}", i), values)
            })
            .collect();
        db.extend_spectra(entries).unwrap();
        assert_eq!(db.len(), 10);
        assert_eq!(db.records()[7].name(), "spike 7");
        assert_eq!(db.records()[7].intensities()[7], 1.0);

        let bad = vec![("ok".to_string(), vec![1.0; 10]), ("short".to_string(), vec![1.0; 3])];
        assert!(db.extend_spectra(bad).is_err());
        assert_eq!(db.len(), 10);
    }

    #[test]
    fn test_search_mode_codes() {
        for mode in [SearchMode::Spectral, SearchMode::Peak, SearchMode::Mixture] {
            assert_eq!(SearchMode::try_from(mode.to_i64()).unwrap(), mode);
        }
        assert!(matches!(SearchMode::try_from(7i64), Err(SpectrumError::UnknownCode { kind: "search mode", code: 7 })));
        assert!(SearchMode::try_from(-1i64).is_err());
    }

    #[test]
    fn test_push_spectrum_rejects_wrong_length() {
        let mut db = Database::new("test", Technique::Ms, grid(), LicenseTier::Licensed);
        assert!(matches!(db.push_spectrum("short", &[1.0, 2.0]), Err(SpectrumError::LengthMismatch { .. })));
    }

    #[test]
    fn test_library_grid_consistency_and_ordinals() {
        let mut first = Database::new("a", Technique::Raman, grid(), LicenseTier::Licensed);
        first.push_spectrum("a0", &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let mut second = Database::new("b", Technique::Raman, grid(), LicenseTier::Unlicensed);
        second.push_spectrum("b0", &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let other = Database::new("c", Technique::Raman, Grid::new(0.0, 18.0, 10).unwrap(), LicenseTier::Licensed);

        let mut library = SpectralLibrary::new().with_mode(Technique::Raman, SearchMode::Mixture);
        library.add_database(first).unwrap();
        library.add_database(second).unwrap();
        assert!(matches!(library.add_database(other), Err(SpectrumError::GridMismatch { .. })));

        let candidates = library.candidates(Technique::Raman);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].ordinal, 1);
        assert!(candidates[1].record.is_locked());
        assert_eq!(library.mode(Technique::Raman), SearchMode::Mixture);
        assert_eq!(library.mode(Technique::Ms), SearchMode::Spectral);
        assert!(library.candidates(Technique::Ms).is_empty());
    }
}
