use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::NcfpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Ncbi,
    Uniprot,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Ncbi => write!(f, "ncbi"),
            InputFormat::Uniprot => write!(f, "uniprot"),
        }
    }
}

/// CDS qualifier used to pair a GenBank feature with an input protein.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    ProteinId,
    LocusTag,
    Gene,
}

impl MatchField {
    pub fn qualifier(self) -> &'static str {
        match self {
            MatchField::ProteinId => "protein_id",
            MatchField::LocusTag => "locus_tag",
            MatchField::Gene => "gene",
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualifier())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTerm {
    /// Search the protein database and link through to nucleotide entries.
    Protein(String),
    /// Search the nucleotide database directly.
    Nucleotide(String),
}

impl QueryTerm {
    pub fn as_str(&self) -> &str {
        match self {
            QueryTerm::Protein(term) | QueryTerm::Nucleotide(term) => term,
        }
    }

    pub fn aa_query(&self) -> Option<&str> {
        match self {
            QueryTerm::Protein(term) => Some(term),
            QueryTerm::Nucleotide(_) => None,
        }
    }

    pub fn nt_query(&self) -> Option<&str> {
        match self {
            QueryTerm::Nucleotide(term) => Some(term),
            QueryTerm::Protein(_) => None,
        }
    }
}

/// Amino-acid span embedded in a record id as `ID/start-end` (1-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub fn nucleotide_bounds(&self) -> (usize, usize) {
        ((self.start - 1) * 3, self.end * 3)
    }
}

impl FromStr for Region {
    type Err = NcfpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || NcfpError::InvalidConfig(format!("invalid sequence region: {value}"));
        let (start, end) = value.trim().split_once('-').ok_or_else(invalid)?;
        let start: usize = start.parse().map_err(|_| invalid())?;
        let end: usize = end.parse().map_err(|_| invalid())?;
        if start == 0 || end < start {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Unresolved,
    QueryAssigned,
    Matched,
    Mismatch,
    NoFeature,
    NoRecord,
    Ambiguous,
}

/// Pipeline state carried beside an input record.
#[derive(Debug, Clone)]
pub struct SequenceState {
    /// Full FASTA id; the cache key for this record.
    pub record_id: String,
    /// Identifier used for feature matching (region suffix removed).
    pub header_id: String,
    pub query: Option<QueryTerm>,
    pub region: Option<Region>,
    pub status: ResolutionStatus,
}

impl SequenceState {
    pub fn new(record_id: &str, header_id: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            header_id: header_id.to_string(),
            query: None,
            region: None,
            status: ResolutionStatus::Unresolved,
        }
    }

    pub fn with_query(mut self, query: QueryTerm) -> Self {
        self.query = Some(query);
        self.status = ResolutionStatus::QueryAssigned;
        self
    }
}
