//! Readers for the on-disk study layout.
//!
//! ```text
//! <root>/participants_<month>.csv            ';'-separated, with header
//! <root>/data_actimetry/<session>/left.csv   timestamp,x,y,z (no header)
//! <root>/data_actimetry/<session>/right.csv
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use crate::resample::RawSample;
use crate::{ActimetryError, PipelineConfig, Side};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a reading timestamp into microseconds since the Unix epoch.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS[.f]` (read as UTC, `T`
/// separator allowed) and bare Unix epoch seconds.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).timestamp_micros());
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc().timestamp_micros());
        }
    }
    raw.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .map(|secs| (secs * 1e6).round() as i64)
}

fn parse_field(record: &StringRecord, idx: usize, name: &str, row: usize) -> Result<f64, ActimetryError> {
    let raw = record.get(idx).unwrap_or("");
    raw.trim().parse::<f64>().map_err(|_| {
        ActimetryError::ReadingsParse(format!("row {row}: invalid {name} value '{raw}'"))
    })
}

/// Parse headerless `timestamp,x,y,z` rows.
pub fn parse_readings<R: Read>(input: R) -> Result<Vec<RawSample>, ActimetryError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .from_reader(input);
    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let record = result.map_err(|e| ActimetryError::ReadingsParse(format!("row {row}: {e}")))?;
        if record.len() < 4 {
            return Err(ActimetryError::ReadingsParse(format!(
                "row {row}: expected 4 columns, found {}",
                record.len()
            )));
        }
        let t_us = parse_timestamp(&record[0]).ok_or_else(|| {
            ActimetryError::ReadingsParse(format!("row {row}: invalid timestamp '{}'", &record[0]))
        })?;
        out.push(RawSample::new(
            t_us,
            parse_field(&record, 1, "x", row)?,
            parse_field(&record, 2, "y", row)?,
            parse_field(&record, 3, "z", row)?,
        ));
    }
    Ok(out)
}

pub fn read_readings(path: &Path) -> Result<Vec<RawSample>, ActimetryError> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    parse_readings(file).map_err(|e| match e {
        ActimetryError::ReadingsParse(msg) => {
            ActimetryError::ReadingsParse(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub session: String,
    pub is_patient: bool,
    pub fm_score: Option<f64>,
    pub paretic_side: Side,
}

impl Participant {
    pub fn non_paretic_side(&self) -> Side {
        self.paretic_side.opposite()
    }
}

#[derive(Debug, Deserialize)]
struct ParticipantRow {
    folder_name: String,
    is_patient: String,
    #[serde(rename = "FMScore", default)]
    fm_score: String,
    paretic_side: String,
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "1.0" => Some(true),
        "false" | "0" | "no" | "0.0" => Some(false),
        _ => None,
    }
}

impl ParticipantRow {
    fn into_participant(self, row: usize) -> Result<Participant, ActimetryError> {
        let is_patient = parse_flag(&self.is_patient).ok_or_else(|| {
            ActimetryError::Metadata(format!(
                "row {row}: invalid is_patient value '{}'",
                self.is_patient
            ))
        })?;
        let fm = self.fm_score.trim();
        let fm_score = if fm.is_empty() || fm.eq_ignore_ascii_case("nan") {
            None
        } else {
            Some(fm.replace(',', ".").parse::<f64>().map_err(|_| {
                ActimetryError::Metadata(format!("row {row}: invalid FMScore '{fm}'"))
            })?)
        };
        let paretic_side = self
            .paretic_side
            .parse::<Side>()
            .map_err(|e| ActimetryError::Metadata(format!("row {row}: {e}")))?;
        Ok(Participant {
            session: self.folder_name.trim().to_string(),
            is_patient,
            fm_score,
            paretic_side,
        })
    }
}

/// Participant metadata keyed by session folder name.
#[derive(Clone, Debug, Default)]
pub struct ParticipantTable {
    order: Vec<String>,
    by_session: HashMap<String, Participant>,
}

impl ParticipantTable {
    pub fn from_reader<R: Read>(input: R) -> Result<Self, ActimetryError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(input);
        let mut table = Self::default();
        for (idx, result) in reader.deserialize::<ParticipantRow>().enumerate() {
            let row = idx + 2;
            let parsed = result.map_err(|e| ActimetryError::Metadata(format!("row {row}: {e}")))?;
            let participant = parsed.into_participant(row)?;
            if !table.by_session.contains_key(&participant.session) {
                table.order.push(participant.session.clone());
            }
            table.by_session.insert(participant.session.clone(), participant);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, ActimetryError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn lookup(&self, session: &str) -> Result<&Participant, ActimetryError> {
        self.by_session
            .get(session)
            .ok_or_else(|| ActimetryError::Metadata(format!("unknown session '{session}'")))
    }

    /// Session identifiers in file order.
    pub fn sessions(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Paths of the study data under one root directory.
#[derive(Clone, Debug)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn participants_path(&self, month: &str) -> PathBuf {
        self.root.join(format!("participants_{month}.csv"))
    }

    pub fn session_dir(&self, session: &str) -> PathBuf {
        self.root.join("data_actimetry").join(session)
    }

    pub fn readings_path(&self, session: &str, side: Side) -> PathBuf {
        self.session_dir(session).join(format!("{side}.csv"))
    }

    /// Load the participant table for the month carried by `config`.
    pub fn load_participants(&self, config: &PipelineConfig) -> Result<ParticipantTable, ActimetryError> {
        let month = config.require_month()?;
        ParticipantTable::load(&self.participants_path(month))
    }
}
