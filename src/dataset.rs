//! loading + recoding of the follow-up table
//!
//! the input is a 4-column delimited file: age, year of follow-up, number of
//! positive axillary nodes and a 1/2 survival status. columns are renamed by
//! position, so whatever header the file carries is ignored.

use std::{fmt, io, path::Path};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info, warn};
use ndarray::Array2;

use crate::{
    config::{FilterConfig, InputConfig},
    data::SurvivalData,
    error::{Result, SurvivalError},
};

pub const N_COLUMNS: usize = 4;
pub const COLUMN_NAMES: [&str; N_COLUMNS] = ["Age", "Year", "Nodes", "Survival_Status"];

/// age bands cover (AGE_BANDS_MIN, AGE_BANDS_MAX]
pub const AGE_BANDS_MIN: f64 = 20.0;
pub const AGE_BANDS_MAX: f64 = 90.0;
const AGE_BAND_UPPER_EDGES: [f64; 2] = [40.0, 60.0];

/// nodes <= this are "Faible"
pub const NODES_THRESHOLD: f64 = 5.0;

/// one row as read from disk, after numeric coercion (unparseable -> None)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PatientRecord {
    pub age: Option<f64>,
    pub year: Option<f64>,
    pub nodes: Option<f64>,
    pub survival_status: Option<f64>,
}

impl PatientRecord {
    pub fn new(age: f64, year: f64, nodes: f64, survival_status: f64) -> Self {
        Self {
            age: Some(age),
            year: Some(year),
            nodes: Some(nodes),
            survival_status: Some(survival_status),
        }
    }

    fn from_csv(record: &StringRecord) -> Self {
        let field = |i: usize| record.get(i).and_then(coerce_numeric);
        Self {
            age: field(0),
            year: field(1),
            nodes: field(2),
            survival_status: field(3),
        }
    }

    pub fn status(&self) -> Option<SurvivalStatus> {
        self.survival_status.and_then(SurvivalStatus::from_code)
    }

    /// 1 = died, 0 = censored. None when the status code is unknown.
    pub fn event(&self) -> Option<u8> {
        self.status().map(SurvivalStatus::event)
    }

    fn passes(&self, filter: &FilterConfig) -> bool {
        let age_ok = self
            .age
            .is_some_and(|age| age > filter.min_age && age <= filter.max_age);
        let nodes_ok = self
            .nodes
            .is_some_and(|nodes| nodes >= filter.min_nodes && nodes <= filter.max_nodes);
        age_ok && nodes_ok
    }
}

fn coerce_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurvivalStatus {
    /// survived 5 years or longer (code 1)
    Survived,
    /// died within 5 years (code 2)
    Died,
}

impl SurvivalStatus {
    pub fn from_code(code: f64) -> Option<Self> {
        if code == 1.0 {
            Some(Self::Survived)
        } else if code == 2.0 {
            Some(Self::Died)
        } else {
            None
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Survived => 1,
            Self::Died => 2,
        }
    }

    pub fn event(self) -> u8 {
        match self {
            Self::Survived => 0,
            Self::Died => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgeGroup {
    Young,
    Middle,
    Senior,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 3] = [AgeGroup::Young, AgeGroup::Middle, AgeGroup::Senior];

    /// right-closed bands (20,40], (40,60], (60,90]; None outside
    pub fn classify(age: f64) -> Option<Self> {
        let [young, middle] = AGE_BAND_UPPER_EDGES;
        if age <= AGE_BANDS_MIN || age > AGE_BANDS_MAX || age.is_nan() {
            None
        } else if age <= young {
            Some(Self::Young)
        } else if age <= middle {
            Some(Self::Middle)
        } else {
            Some(Self::Senior)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Young => "20-40",
            Self::Middle => "41-60",
            Self::Senior => "61-90",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodesGroup {
    Low,
    High,
}

impl NodesGroup {
    pub fn classify(nodes: f64) -> Self {
        if nodes <= NODES_THRESHOLD {
            Self::Low
        } else {
            Self::High
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Faible (≤5)",
            Self::High => "Élevé (>5)",
        }
    }
}

impl fmt::Display for NodesGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// a cleaned, recoded patient
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patient {
    pub age: f64,
    pub year: f64,
    pub nodes: f64,
    pub status: SurvivalStatus,
    pub event: u8,
    pub age_group: AgeGroup,
    pub nodes_group: NodesGroup,
}

impl Patient {
    /// recode a raw row. None if a field is missing or outside every band.
    pub fn from_record(record: &PatientRecord) -> Option<Self> {
        let age = record.age?;
        let status = record.status()?;
        Some(Self {
            age,
            year: record.year?,
            nodes: record.nodes?,
            status,
            event: status.event(),
            age_group: AgeGroup::classify(age)?,
            nodes_group: NodesGroup::classify(record.nodes?),
        })
    }

    pub fn covariate(&self, covariate: Covariate) -> f64 {
        match covariate {
            Covariate::Age => self.age,
            Covariate::Year => self.year,
            Covariate::Nodes => self.nodes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Covariate {
    Age,
    Year,
    Nodes,
}

impl Covariate {
    pub fn name(self) -> &'static str {
        match self {
            Self::Age => COLUMN_NAMES[0],
            Self::Year => COLUMN_NAMES[1],
            Self::Nodes => COLUMN_NAMES[2],
        }
    }
}

/// read raw records from any reader, enforcing the 4-column shape on every line
pub fn read_records<R: io::Read>(reader: R, input: &InputConfig) -> Result<Vec<PatientRecord>> {
    let delimiter = u8::try_from(input.delimiter)
        .map_err(|_| SurvivalError::config("delimiter must be a single ascii character"))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(input.has_headers)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    if input.has_headers {
        let headers = reader.headers()?;
        if headers.len() != N_COLUMNS {
            return Err(SurvivalError::invalid_column_count(headers.len(), 1));
        }
        debug!("renaming columns {:?} -> {:?}", headers, COLUMN_NAMES);
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.len() != N_COLUMNS {
            let line = row.position().map_or(0, |p| p.line());
            return Err(SurvivalError::invalid_column_count(row.len(), line));
        }
        records.push(PatientRecord::from_csv(&row));
    }
    Ok(records)
}

pub fn load_records(input: &InputConfig) -> Result<Vec<PatientRecord>> {
    let path: &Path = &input.path;
    info!("loading {}", path.display());
    let file = std::fs::File::open(path)?;
    read_records(io::BufReader::new(file), input)
}

/// the filtered study population
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    patients: Vec<Patient>,
    dropped: usize,
}

impl Cohort {
    /// recode every row then keep the ones inside the outlier bounds
    pub fn from_records(records: &[PatientRecord], filter: &FilterConfig) -> Self {
        let mut patients = Vec::with_capacity(records.len());
        let mut dropped = 0;

        for record in records {
            if !record.passes(filter) {
                dropped += 1;
                continue;
            }
            match Patient::from_record(record) {
                Some(patient) => patients.push(patient),
                None => {
                    warn!("dropping row with missing or unknown values: {:?}", record);
                    dropped += 1;
                }
            }
        }

        info!("kept {} patients, dropped {} rows", patients.len(), dropped);
        Self { patients, dropped }
    }

    pub fn load(input: &InputConfig, filter: &FilterConfig) -> Result<Self> {
        let records = load_records(input)?;
        Ok(Self::from_records(&records, filter))
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// rows removed by the filter or by recoding
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn column(&self, covariate: Covariate) -> Vec<f64> {
        self.patients.iter().map(|p| p.covariate(covariate)).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.column(Covariate::Year)
    }

    pub fn events(&self) -> Vec<bool> {
        self.patients.iter().map(|p| p.event == 1).collect()
    }

    pub fn n_events(&self) -> usize {
        self.patients.iter().filter(|p| p.event == 1).count()
    }

    pub fn nodes_groups(&self) -> Vec<NodesGroup> {
        self.patients.iter().map(|p| p.nodes_group).collect()
    }

    pub fn age_groups(&self) -> Vec<AgeGroup> {
        self.patients.iter().map(|p| p.age_group).collect()
    }

    /// (time = Year, event = Event) with the requested covariate columns
    pub fn to_survival_data(&self, covariates: &[Covariate]) -> Result<SurvivalData> {
        let n = self.len();
        let mut matrix = Array2::zeros((n, covariates.len()));
        for (i, patient) in self.patients.iter().enumerate() {
            for (j, &covariate) in covariates.iter().enumerate() {
                matrix[[i, j]] = patient.covariate(covariate);
            }
        }
        SurvivalData::new(self.times(), self.events(), matrix)
    }
}
