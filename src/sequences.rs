use std::sync::LazyLock;

use bio::io::fasta;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CachedQuery};
use crate::domain::{InputFormat, QueryTerm, Region, SequenceState};
use crate::error::NcfpError;
use crate::retry::with_retries;
use crate::uniprot::UniprotClient;

static GENE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)GN=(\S+)").expect("valid gene name regex"));
static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)/(\d+-\d+)$").expect("valid region regex"));

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub format: InputFormat,
    pub stockholm: bool,
    pub uniprot_xref: bool,
    pub max_retries: usize,
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// One state per input record, in input order.
    pub states: Vec<SequenceState>,
    /// Records read back from an existing cache rather than resolved anew.
    pub reused: usize,
}

impl Resolution {
    pub fn skipped(&self) -> impl Iterator<Item = usize> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.query.is_none())
            .map(|(idx, _)| idx)
    }

    pub fn with_query(&self) -> usize {
        self.states.iter().filter(|state| state.query.is_some()).count()
    }
}

/// Value of the `GN=` token in a UniProt description line.
pub fn gene_name(description: &str) -> Option<String> {
    GENE_NAME_RE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Split an `ID/start-end` record id into the bare id and its region.
pub fn split_region(id: &str) -> (String, Option<Region>) {
    let Some(caps) = REGION_RE.captures(id) else {
        return (id.to_string(), None);
    };
    match caps[2].parse::<Region>() {
        Ok(region) => (caps[1].to_string(), Some(region)),
        Err(_) => (id.to_string(), None),
    }
}

/// UniProt accession from a `db|ACCESSION|ENTRY_NAME` id.
pub fn uniprot_accession(id: &str) -> &str {
    let mut fields = id.split('|');
    match (fields.next(), fields.next()) {
        (Some(_), Some(accession)) if !accession.is_empty() => accession,
        _ => id,
    }
}

fn state_from_cache(row: &CachedQuery, header_id: &str, region: Option<Region>) -> SequenceState {
    let mut state = SequenceState::new(&row.accession, header_id);
    state.region = region;
    if let Some(term) = &row.aa_query {
        state = state.with_query(QueryTerm::Protein(term.clone()));
    } else if let Some(term) = &row.nt_query {
        state = state.with_query(QueryTerm::Nucleotide(term.clone()));
    }
    state
}

pub struct QueryResolver<'a> {
    cache: &'a Cache,
    uniprot: Option<&'a dyn UniprotClient>,
    options: ResolverOptions,
}

impl<'a> QueryResolver<'a> {
    pub fn new(
        cache: &'a Cache,
        uniprot: Option<&'a dyn UniprotClient>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            cache,
            uniprot,
            options,
        }
    }

    pub fn resolve_all(&self, records: &[fasta::Record]) -> Result<Resolution, NcfpError> {
        info!(
            count = records.len(),
            format = %self.options.format,
            "assigning query terms"
        );
        let mut resolution = Resolution::default();
        for record in records {
            let (state, reused) = self.resolve(record)?;
            if reused {
                resolution.reused += 1;
            }
            if state.query.is_none() {
                warn!(id = %state.record_id, "no query term found; sequence skipped");
            }
            resolution.states.push(state);
        }
        info!(
            with_query = resolution.with_query(),
            reused = resolution.reused,
            "query terms assigned"
        );
        Ok(resolution)
    }

    /// Query state for one record; the flag is set when the cache already
    /// held the record and no lookup was made.
    pub fn resolve(&self, record: &fasta::Record) -> Result<(SequenceState, bool), NcfpError> {
        let record_id = record.id();
        let (header_id, region) = if self.options.stockholm {
            split_region(record_id)
        } else {
            (record_id.to_string(), None)
        };

        if let Some(row) = self.cache.get_sequence(record_id)? {
            debug!(id = record_id, "query term read from cache");
            return Ok((state_from_cache(&row, &header_id, region), true));
        }

        let mut state = SequenceState::new(record_id, &header_id);
        state.region = region;
        let mut extra_terms = Vec::new();
        match self.options.format {
            InputFormat::Ncbi => {
                state = state.with_query(QueryTerm::Protein(header_id.clone()));
            }
            InputFormat::Uniprot => {
                let mut xrefs = self.lookup_cross_references(&header_id);
                if !xrefs.is_empty() {
                    extra_terms = xrefs.split_off(1);
                    state = state.with_query(QueryTerm::Protein(xrefs.remove(0)));
                } else if let Some(gene) = record.desc().and_then(gene_name) {
                    state = state.with_query(QueryTerm::Nucleotide(gene));
                }
            }
        }

        let (aa_query, nt_query) = match &state.query {
            Some(term) => (term.aa_query(), term.nt_query()),
            None => (None, None),
        };
        match self.cache.upsert_sequence(record_id, aa_query, nt_query) {
            Ok(()) | Err(NcfpError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
        if !extra_terms.is_empty() {
            debug!(id = record_id, extra = extra_terms.len(), "additional cross-references");
            self.cache.add_xref_queries(record_id, &extra_terms)?;
        }
        Ok((state, false))
    }

    fn lookup_cross_references(&self, header_id: &str) -> Vec<String> {
        let Some(client) = self.uniprot.filter(|_| self.options.uniprot_xref) else {
            return Vec::new();
        };
        let accession = uniprot_accession(header_id);
        match with_retries(self.options.max_retries, "uniprot", || {
            client.cross_references(accession)
        }) {
            Ok(refs) => refs.protein_ids(),
            Err(err) => {
                warn!(accession, error = %err, "UniProt cross-reference lookup failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gene_name_token() {
        let desc = "Uncharacterized protein OS=Escherichia coli OX=562 GN=b0001 PE=4 SV=1";
        assert_eq!(gene_name(desc).as_deref(), Some("b0001"));
        assert_eq!(gene_name("protein OS=E. coli PE=4"), None);
        assert_eq!(gene_name("XGN=nope"), None);
    }

    #[test]
    fn region_suffix() {
        let (id, region) = split_region("A0A0H3LM12_9GAMM/12-140");
        assert_eq!(id, "A0A0H3LM12_9GAMM");
        assert_eq!(region, Some(Region { start: 12, end: 140 }));
        let (id, region) = split_region("WP_000001.1");
        assert_eq!(id, "WP_000001.1");
        assert_eq!(region, None);
    }

    #[test]
    fn uniprot_accession_field() {
        assert_eq!(uniprot_accession("tr|A0A0D2ZXX4|A0A0D2ZXX4_9GAMM"), "A0A0D2ZXX4");
        assert_eq!(uniprot_accession("P0A7B8"), "P0A7B8");
    }
}
