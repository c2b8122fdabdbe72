use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use speccore::data::technique::{Technique, XUnit, YUnit};
use speccore::database::{LicenseTier, SearchMode, SpectralLibrary};
use speccore::synthetic::synthetic_database;
use specsearch::data::store::{load_library, save_library};
use specsearch::data::transfer::encode_results;
use specsearch::search::config::SearchConfig;
use specsearch::search::sdk::SearchSdk;

#[derive(Parser)]
#[command(name = "specsearch", version, about = "Search measured spectra against spectral libraries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search a two-column text spectrum (x, y per line)
    Search {
        query: PathBuf,
        /// Library file written by `synthesize` or another library builder
        #[arg(long, conflicts_with = "synthetic")]
        library: Option<PathBuf>,
        /// Search a generated library of this many records per technique instead
        #[arg(long)]
        synthetic: Option<usize>,
        #[arg(long, value_enum, default_value_t = TechniqueArg::Ftir)]
        technique: TechniqueArg,
        #[arg(long, value_enum)]
        x_unit: Option<XUnitArg>,
        #[arg(long, value_enum)]
        y_unit: Option<YUnitArg>,
        #[arg(long, default_value_t = 10)]
        capacity: usize,
        /// Decompose the query into a mixture of library records
        #[arg(long)]
        mixture: bool,
        /// JSON search configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also write the results in the binary transfer format
        #[arg(long)]
        wire_out: Option<PathBuf>,
    },
    /// Write a library of random band spectra
    Synthesize {
        out: PathBuf,
        #[arg(long, default_value_t = 1000)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, value_enum, default_value_t = TechniqueArg::Ftir)]
        technique: TechniqueArg,
        #[arg(long)]
        unlicensed: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TechniqueArg {
    Ftir,
    AtrIr,
    Raman,
    VaporIr,
    Ms,
}

impl From<TechniqueArg> for Technique {
    fn from(arg: TechniqueArg) -> Self {
        match arg {
            TechniqueArg::Ftir => Technique::Ftir,
            TechniqueArg::AtrIr => Technique::AtrIr,
            TechniqueArg::Raman => Technique::Raman,
            TechniqueArg::VaporIr => Technique::VaporPhaseIr,
            TechniqueArg::Ms => Technique::Ms,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum XUnitArg {
    Wavenumbers,
    Nanometers,
    Mz,
}

impl From<XUnitArg> for XUnit {
    fn from(arg: XUnitArg) -> Self {
        match arg {
            XUnitArg::Wavenumbers => XUnit::Wavenumbers,
            XUnitArg::Nanometers => XUnit::Nanometers,
            XUnitArg::Mz => XUnit::MassToCharge,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum YUnitArg {
    Intensity,
    Absorbance,
    Transmittance,
}

impl From<YUnitArg> for YUnit {
    fn from(arg: YUnitArg) -> Self {
        match arg {
            YUnitArg::Intensity => YUnit::ArbitraryIntensity,
            YUnitArg::Absorbance => YUnit::Absorbance,
            YUnitArg::Transmittance => YUnit::Transmittance,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Search { query, library, synthetic, technique, x_unit, y_unit, capacity, mixture, config, wire_out } => {
            let technique = Technique::from(technique);
            let config = match config {
                Some(path) => SearchConfig::from_json_file(path)?,
                None => SearchConfig::default(),
            };

            let mut library = match (library, synthetic) {
                (Some(path), _) => load_library(path)?,
                (None, Some(count)) => synthetic_library(count)?,
                (None, None) => return Err("either --library or --synthetic is required".into()),
            };
            if mixture {
                library.set_mode(technique, SearchMode::Mixture);
            }

            let (x, y) = read_two_columns(&query)?;
            let x_unit = x_unit.map(XUnit::from).unwrap_or(technique.native_x_unit());
            let y_unit = y_unit.map(YUnit::from).unwrap_or(technique.native_y_unit());

            let sdk = SearchSdk::new(Arc::new(library), config)?;
            let handle = sdk.open();
            let results = sdk.run_unevenly_spaced(handle, technique, &x, &y, x_unit, y_unit, capacity)?;
            sdk.close(handle)?;

            for (rank, m) in results.iter().enumerate() {
                println!("{:>3}  {:6.2}%  {:5.3}  {:<20}  {}", rank + 1, m.percentage(), m.mixture_weight, m.flags, m.name);
            }
            if let Some(path) = wire_out {
                std::fs::write(&path, encode_results(&results)?)?;
                info!("wrote transfer block to {}", path.display());
            }
        }
        Command::Synthesize { out, count, seed, technique, unlicensed } => {
            let technique = Technique::from(technique);
            let license = if unlicensed { LicenseTier::Unlicensed } else { LicenseTier::Licensed };
            let mut library = SpectralLibrary::new();
            library.add_database(synthetic_database(&format!("Synthetic {}", technique), technique, license, count, seed)?)?;
            save_library(&out, &library)?;
            info!("wrote {} records to {}", count, out.display());
        }
    }
    Ok(())
}

fn synthetic_library(count: usize) -> Result<SpectralLibrary, Box<dyn Error>> {
    let mut library = SpectralLibrary::new();
    for (seed, technique) in Technique::ALL.into_iter().enumerate() {
        let name = format!("Synthetic {}", technique);
        library.add_database(synthetic_database(&name, technique, LicenseTier::Licensed, count, seed as u64)?)?;
    }
    Ok(library)
}

/// Reads whitespace or comma separated x/y pairs; blank lines and lines starting with `#` are skipped.
fn read_two_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>), Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let mut x = Vec::new();
    let mut y = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty());
        match (fields.next(), fields.next()) {
            (Some(a), Some(b)) => {
                x.push(a.parse::<f64>()?);
                y.push(b.parse::<f64>()?);
            }
            _ => return Err(format!("{}:{}: expected two columns", path.display(), line_number + 1).into()),
        }
    }
    Ok((x, y))
}
