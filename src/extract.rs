use bio::alphabets::dna;
use bio::io::fasta;
use gb_io::reader::SeqReader;
use gb_io::seq::{Feature, Location, Seq};
use tracing::{debug, warn};

use crate::cache::{Cache, FullRecord};
use crate::domain::{MatchField, Region, ResolutionStatus, SequenceState};
use crate::error::NcfpError;
use crate::translate::{normalize_protein, strip_terminal_stop, translate};

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub match_order: Vec<MatchField>,
    pub alternative_start: bool,
    pub unify_ids: bool,
    pub skip_ambiguous: bool,
}

/// A CDS feature paired with an input protein.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsMatch {
    /// Nucleotide record the feature was found in.
    pub record_accession: String,
    pub matched_on: MatchField,
    /// `protein_id` of the feature, falling back to its `locus_tag`.
    pub native_id: Option<String>,
    pub location: String,
    pub codon_start: usize,
    pub nucleotides: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub status: ResolutionStatus,
    /// Protein and coding-sequence records, present only on a match.
    pub pair: Option<(fasta::Record, fasta::Record)>,
}

impl Extraction {
    fn unpaired(status: ResolutionStatus) -> Self {
        Self { status, pair: None }
    }
}

pub fn same_identifier(left: &str, right: &str) -> bool {
    left == right || unversioned(left) == unversioned(right)
}

fn unversioned(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, version))
            if !stem.is_empty() && version.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            stem
        }
        _ => id,
    }
}

pub fn parse_genbank(text: &str) -> Result<Vec<Seq>, NcfpError> {
    SeqReader::new(text.as_bytes())
        .map(|seq| seq.map_err(|err| NcfpError::GenbankParse(err.to_string())))
        .collect()
}

fn is_cds(feature: &Feature) -> bool {
    feature.kind.to_string().eq_ignore_ascii_case("CDS")
}

fn qualifier(feature: &Feature, key: &str) -> Option<String> {
    feature
        .qualifier_values(key.into())
        .next()
        .map(str::to_string)
}

/// First CDS whose qualifier matches one of `identifiers`, trying each
/// field of `order` across all features before moving to the next field.
pub fn find_cds<'s>(
    seq: &'s Seq,
    identifiers: &[String],
    order: &[MatchField],
) -> Option<(&'s Feature, MatchField)> {
    for field in order {
        let found = seq.features.iter().filter(|feature| is_cds(feature)).find(|feature| {
            feature.qualifier_values(field.qualifier().into()).any(|value| {
                identifiers
                    .iter()
                    .any(|id| same_identifier(value.trim(), id))
            })
        });
        if let Some(feature) = found {
            return Some((feature, *field));
        }
    }
    None
}

/// Bases covered by `location`, reverse-complemented on the minus strand.
pub fn extract_location(sequence: &[u8], location: &Location) -> Result<Vec<u8>, NcfpError> {
    match location {
        Location::Range((from, _), (to, _)) => {
            let start = usize::try_from(*from).ok();
            let end = usize::try_from(*to).ok();
            match (start, end) {
                (Some(start), Some(end)) if start <= end && end <= sequence.len() => {
                    Ok(sequence[start..end].to_vec())
                }
                _ => Err(NcfpError::GenbankParse(format!(
                    "feature range {from}..{to} outside sequence of length {}",
                    sequence.len()
                ))),
            }
        }
        Location::Complement(inner) => Ok(dna::revcomp(extract_location(sequence, inner)?)),
        Location::Join(parts) | Location::Order(parts) => {
            let mut bases = Vec::new();
            for part in parts {
                bases.extend(extract_location(sequence, part)?);
            }
            Ok(bases)
        }
        other => Err(NcfpError::GenbankParse(format!(
            "unsupported feature location {}",
            format_location(other)
        ))),
    }
}

/// GenBank-style rendering of `location` with 1-based inclusive coordinates.
pub fn format_location(location: &Location) -> String {
    let list = |parts: &[Location]| {
        parts
            .iter()
            .map(format_location)
            .collect::<Vec<_>>()
            .join(",")
    };
    match location {
        Location::Range((from, _), (to, _)) => {
            if to - from == 1 {
                format!("{}", from + 1)
            } else {
                format!("{}..{}", from + 1, to)
            }
        }
        Location::Between(from, to) => format!("{}^{}", from + 1, to),
        Location::Complement(inner) => format!("complement({})", format_location(inner)),
        Location::Join(parts) => format!("join({})", list(parts)),
        Location::Order(parts) => format!("order({})", list(parts)),
        Location::Bond(parts) => format!("bond({})", list(parts)),
        Location::OneOf(parts) => format!("one-of({})", list(parts)),
        Location::External(name, Some(inner)) => format!("{name}:{}", format_location(inner)),
        Location::External(name, None) => name.clone(),
        Location::Gap(_) => "gap()".to_string(),
    }
}

fn codon_start(feature: &Feature) -> usize {
    qualifier(feature, "codon_start")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| (1..=3).contains(value))
        .unwrap_or(1)
}

/// Trim a raw CDS to the residues that encode the input protein.
pub fn trim_coding_sequence(
    mut nucleotides: Vec<u8>,
    codon_start: usize,
    alternative_start: bool,
    region: Option<Region>,
) -> Vec<u8> {
    if !alternative_start && codon_start > 1 {
        let offset = (codon_start - 1).min(nucleotides.len());
        nucleotides.drain(..offset);
    }
    if let Some(region) = region {
        let (start, end) = region.nucleotide_bounds();
        let end = end.min(nucleotides.len());
        let start = start.min(end);
        nucleotides = nucleotides[start..end].to_vec();
    }
    nucleotides
}

pub fn locate_cds(
    seq: &Seq,
    record_accession: &str,
    identifiers: &[String],
    options: &ExtractOptions,
    region: Option<Region>,
) -> Result<Option<CdsMatch>, NcfpError> {
    let Some((feature, matched_on)) = find_cds(seq, identifiers, &options.match_order) else {
        return Ok(None);
    };
    let raw = extract_location(&seq.seq, &feature.location)?;
    let codon_start = codon_start(feature);
    let nucleotides = trim_coding_sequence(raw, codon_start, options.alternative_start, region);
    Ok(Some(CdsMatch {
        record_accession: record_accession.to_string(),
        matched_on,
        native_id: qualifier(feature, "protein_id").or_else(|| qualifier(feature, "locus_tag")),
        location: format_location(&feature.location),
        codon_start,
        nucleotides: nucleotides.to_ascii_uppercase(),
    }))
}

/// Pairs input proteins with their coding sequence from cached full records.
pub struct CdsExtractor<'a> {
    cache: &'a Cache,
    options: ExtractOptions,
}

impl<'a> CdsExtractor<'a> {
    pub fn new(cache: &'a Cache, options: ExtractOptions) -> Self {
        Self { cache, options }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Identifiers a CDS qualifier may carry for this sequence.
    pub fn identifiers(&self, state: &SequenceState) -> Result<Vec<String>, NcfpError> {
        let mut ids = vec![state.header_id.clone()];
        if let Some(query) = &state.query {
            ids.push(query.as_str().to_string());
        }
        ids.extend(self.cache.get_xref_queries(&state.record_id)?);
        ids.dedup();
        Ok(ids)
    }

    pub fn extract(
        &self,
        record: &fasta::Record,
        state: &SequenceState,
    ) -> Result<Extraction, NcfpError> {
        let full = match self.cache.find_full_record_for_sequence(&state.record_id) {
            Ok(Some(full)) => full,
            Ok(None) => {
                debug!(id = %state.record_id, "no full record cached");
                return Ok(Extraction::unpaired(ResolutionStatus::NoRecord));
            }
            Err(NcfpError::MultipleRecords { accession, records }) if self.options.skip_ambiguous => {
                warn!(id = %accession, records = ?records, "multiple full records; sequence skipped");
                return Ok(Extraction::unpaired(ResolutionStatus::Ambiguous));
            }
            Err(err) => return Err(err),
        };
        self.extract_from(record, state, &full)
    }

    fn extract_from(
        &self,
        record: &fasta::Record,
        state: &SequenceState,
        full: &FullRecord,
    ) -> Result<Extraction, NcfpError> {
        let identifiers = self.identifiers(state)?;
        let mut found = None;
        for seq in parse_genbank(&full.record)? {
            found = locate_cds(&seq, &full.accession, &identifiers, &self.options, state.region)?;
            if found.is_some() {
                break;
            }
        }
        let Some(cds) = found else {
            warn!(id = %state.record_id, record = %full.accession, "no matching CDS feature");
            return Ok(Extraction::unpaired(ResolutionStatus::NoFeature));
        };

        let translated = translate(&cds.nucleotides, self.options.alternative_start);
        let translated = strip_terminal_stop(&translated);
        let input = String::from_utf8_lossy(record.seq());
        let expected = normalize_protein(strip_terminal_stop(&input));
        if normalize_protein(translated) != expected {
            warn!(
                id = %state.record_id,
                record = %full.accession,
                location = %cds.location,
                "translated CDS does not match input protein"
            );
            debug!(translated, expected = %expected, "mismatched translation");
            return Ok(Extraction::unpaired(ResolutionStatus::Mismatch));
        }

        debug!(
            id = %state.record_id,
            record = %full.accession,
            matched_on = %cds.matched_on,
            "CDS matched"
        );
        Ok(Extraction {
            status: ResolutionStatus::Matched,
            pair: Some(self.output_pair(record, &cds)),
        })
    }

    fn output_pair(&self, record: &fasta::Record, cds: &CdsMatch) -> (fasta::Record, fasta::Record) {
        let id = if self.options.unify_ids {
            record.id().to_string()
        } else {
            cds.native_id
                .clone()
                .unwrap_or_else(|| record.id().to_string())
        };
        let coded_by = format!("coded_by={}:{}", cds.record_accession, cds.location);
        let protein = fasta::Record::with_attrs(&id, record.desc(), record.seq());
        let coding = fasta::Record::with_attrs(&id, Some(&coded_by), &cds.nucleotides);
        (protein, coding)
    }
}
