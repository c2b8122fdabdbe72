use std::io::{Read, Write};
use std::path::Path;
use byteorder::{ByteOrder, LittleEndian};
use rusqlite::{params, Connection};
use tracing::info;

use speccore::data::grid::Grid;
use speccore::data::technique::Technique;
use speccore::database::{Database, LicenseTier, SearchMode, SpectralLibrary};

use crate::error::SearchError;

const COMPRESSION_LEVEL: i32 = 3;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS Databases (
        Id INTEGER PRIMARY KEY,
        Name TEXT NOT NULL,
        Technique INTEGER NOT NULL,
        Licensed INTEGER NOT NULL,
        FirstX REAL NOT NULL,
        LastX REAL NOT NULL,
        PointCount INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS Records (
        Id INTEGER PRIMARY KEY,
        DatabaseId INTEGER NOT NULL REFERENCES Databases(Id),
        Name TEXT NOT NULL,
        Intensities BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS TechniqueModes (
        Technique INTEGER PRIMARY KEY,
        Mode INTEGER NOT NULL
    );
";

struct DatabaseRow {
    id: i64,
    name: String,
    technique: i64,
    licensed: bool,
    first_x: f64,
    last_x: f64,
    point_count: i64,
}

/// Packs intensities as little-endian `f64` and compresses them with zstd.
pub fn encode_intensities(values: &[f64]) -> Result<Vec<u8>, SearchError> {
    let mut raw = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut raw);
    let mut encoder = zstd::Encoder::new(Vec::with_capacity(raw.len() / 2), COMPRESSION_LEVEL)?;
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`encode_intensities`]; the blob must hold exactly `expected_len` values.
pub fn decode_intensities(blob: &[u8], expected_len: usize) -> Result<Vec<f64>, SearchError> {
    let mut raw = Vec::with_capacity(expected_len * 8);
    zstd::Decoder::new(blob)?.read_to_end(&mut raw)?;
    if raw.len() != expected_len * 8 {
        return Err(SearchError::InternalFailure(format!(
            "intensity blob holds {} bytes, expected {}",
            raw.len(),
            expected_len * 8
        )));
    }
    let mut values = vec![0.0; expected_len];
    LittleEndian::read_f64_into(&raw, &mut values);
    Ok(values)
}

/// Opens a library file and indexes every database in it.
pub fn load_library(path: impl AsRef<Path>) -> Result<SpectralLibrary, SearchError> {
    let path = path.as_ref();
    let conn = Connection::open(path)?;
    let library = read_library(&conn)?;
    info!("loaded {} databases from {}", library.databases().len(), path.display());
    Ok(library)
}

pub fn save_library(path: impl AsRef<Path>, library: &SpectralLibrary) -> Result<(), SearchError> {
    let mut conn = Connection::open(path)?;
    write_library(&mut conn, library)
}

pub fn read_library(conn: &Connection) -> Result<SpectralLibrary, SearchError> {
    let rows: Vec<&str> = vec!["Id", "Name", "Technique", "Licensed", "FirstX", "LastX", "PointCount"];
    let query = format!("SELECT {} FROM Databases ORDER BY Id", rows.join(", "));

    let database_rows: Result<Vec<DatabaseRow>, _> = conn.prepare(&query)?.query_map([], |row| {
        Ok(DatabaseRow {
            id: row.get(0)?,
            name: row.get(1)?,
            technique: row.get(2)?,
            licensed: row.get(3)?,
            first_x: row.get(4)?,
            last_x: row.get(5)?,
            point_count: row.get(6)?,
        })
    })?.collect();

    let mut library = SpectralLibrary::new();
    let mut records = conn.prepare("SELECT Name, Intensities FROM Records WHERE DatabaseId = ?1 ORDER BY Id")?;

    for row in database_rows? {
        let technique = technique_from_column(row.technique)?;
        let point_count = usize::try_from(row.point_count)
            .map_err(|_| SearchError::InternalFailure(format!("database {} has negative point count", row.name)))?;
        let grid = Grid::new(row.first_x, row.last_x, point_count)?;
        let license = if row.licensed { LicenseTier::Licensed } else { LicenseTier::Unlicensed };
        let mut database = Database::new(row.name, technique, grid, license);

        let blobs: Result<Vec<(String, Vec<u8>)>, _> =
            records.query_map(params![row.id], |r| Ok((r.get(0)?, r.get(1)?)))?.collect();
        let entries = blobs?
            .into_iter()
            .map(|(name, blob)| Ok((name, decode_intensities(&blob, point_count)?)))
            .collect::<Result<Vec<(String, Vec<f64>)>, SearchError>>()?;
        database
            .extend_spectra(entries)
            .map_err(|e| SearchError::InternalFailure(format!("stored record is unusable: {}", e)))?;
        library.add_database(database)?;
    }

    let modes: Result<Vec<(i64, i64)>, _> = conn
        .prepare("SELECT Technique, Mode FROM TechniqueModes")?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect();
    for (technique, mode) in modes? {
        let mode = SearchMode::try_from(mode).map_err(|e| SearchError::InternalFailure(e.to_string()))?;
        library.set_mode(technique_from_column(technique)?, mode);
    }

    Ok(library)
}

/// Writes all databases and technique modes of `library` in one transaction, replacing
/// whatever the file held before.
pub fn write_library(conn: &mut Connection, library: &SpectralLibrary) -> Result<(), SearchError> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.execute_batch("DELETE FROM Records; DELETE FROM Databases; DELETE FROM TechniqueModes;")?;
    {
        let mut insert_database = tx.prepare(
            "INSERT INTO Databases (Name, Technique, Licensed, FirstX, LastX, PointCount) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut insert_record = tx.prepare("INSERT INTO Records (DatabaseId, Name, Intensities) VALUES (?1, ?2, ?3)")?;

        for database in library.databases() {
            let grid = database.grid();
            let database_id = insert_database.insert(params![
                database.name(),
                database.technique().code() as i64,
                database.license() == LicenseTier::Licensed,
                grid.first(),
                grid.last(),
                grid.count() as i64,
            ])?;
            for record in database.records() {
                insert_record.execute(params![database_id, record.name(), encode_intensities(record.intensities())?])?;
            }
        }

        let mut insert_mode = tx.prepare("INSERT OR REPLACE INTO TechniqueModes (Technique, Mode) VALUES (?1, ?2)")?;
        for technique in Technique::ALL {
            if library.grid(technique).is_some() {
                insert_mode.execute(params![technique.code() as i64, library.mode(technique).to_i64()])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn technique_from_column(value: i64) -> Result<Technique, SearchError> {
    let code = u32::try_from(value)
        .map_err(|_| SearchError::InternalFailure(format!("technique code {} out of range", value)))?;
    Technique::from_code(code).map_err(|e| SearchError::InternalFailure(e.to_string()))
}
