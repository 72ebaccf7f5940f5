use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::cache::{Cache, MissingField};
use crate::entrez::{EntrezClient, check_sentinel, parse_gbseq_headers};
use crate::error::NcfpError;
use crate::retry::with_retries;

const NUCLEOTIDE_DB: &str = "nucleotide";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Accession,
    Header,
    FullRecord,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Search => write!(f, "identifier search"),
            Stage::Accession => write!(f, "accession resolution"),
            Stage::Header => write!(f, "header fetch"),
            Stage::FullRecord => write!(f, "full record fetch"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Units of work considered (sequences, uids or accessions).
    pub pending: usize,
    /// New rows written to the cache.
    pub added: usize,
    /// Existing rows completed in place.
    pub updated: usize,
    pub failed: usize,
}

impl StageReport {
    fn new(stage: Stage, pending: usize) -> Self {
        Self {
            stage,
            pending,
            added: 0,
            updated: 0,
            failed: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.pending.saturating_sub(self.failed)
    }

    fn log(&self) {
        info!(
            stage = %self.stage,
            added = self.added,
            updated = self.updated,
            "{} succeeded, {} failed",
            self.succeeded(),
            self.failed
        );
    }
}

/// Fills cache gaps against Entrez in four ordered stages.
///
/// Each stage only looks at rows still missing its target field, so a rerun
/// after a crash or partial failure resumes where the last run stopped.
pub struct RetrievalEngine<'a, E: EntrezClient + ?Sized> {
    cache: &'a Cache,
    entrez: &'a E,
    batch_size: usize,
    max_retries: usize,
    progress: &'a dyn ProgressSink,
}

impl<'a, E: EntrezClient + ?Sized> RetrievalEngine<'a, E> {
    pub fn new(
        cache: &'a Cache,
        entrez: &'a E,
        batch_size: usize,
        max_retries: usize,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            cache,
            entrez,
            batch_size: batch_size.max(1),
            max_retries,
            progress,
        }
    }

    pub fn run_all(&self) -> Result<Vec<StageReport>, NcfpError> {
        Ok(vec![
            self.search_candidates()?,
            self.resolve_accessions()?,
            self.fetch_headers()?,
            self.fetch_full_records()?,
        ])
    }

    pub fn search_candidates(&self) -> Result<StageReport, NcfpError> {
        let pending = self.cache.sequences_without_candidates()?;
        let mut report = StageReport::new(Stage::Search, pending.len());
        self.started(Stage::Search, pending.len());
        for row in &pending {
            let mut terms = Vec::new();
            if let Some(term) = &row.nt_query {
                terms.push((true, term.clone()));
            }
            if let Some(term) = &row.aa_query {
                terms.push((false, term.clone()));
            }
            for term in self.cache.get_xref_queries(&row.accession)? {
                terms.push((false, term));
            }

            let mut uids = Vec::new();
            for (nucleotide, term) in &terms {
                let result = if *nucleotide {
                    with_retries(self.max_retries, "esearch", || {
                        self.entrez.esearch(NUCLEOTIDE_DB, term)
                    })
                } else {
                    with_retries(self.max_retries, "elink", || {
                        self.entrez.elink("protein", "nuccore", term)
                    })
                };
                match result {
                    Ok(found) => {
                        for uid in found {
                            if !uids.contains(&uid) {
                                uids.push(uid);
                            }
                        }
                    }
                    Err(err) => warn!(accession = %row.accession, term = %term, error = %err, "search failed"),
                }
            }

            if uids.is_empty() {
                debug!(accession = %row.accession, "no nucleotide candidates found");
                report.failed += 1;
            } else {
                let added = self.cache.add_candidates(&row.accession, &uids)?;
                report.added += added.len();
                report.updated += 1;
            }
            self.advanced(1);
        }
        self.finished(&report);
        Ok(report)
    }

    pub fn resolve_accessions(&self) -> Result<StageReport, NcfpError> {
        let uids = self.cache.list_uids_missing(MissingField::Accession)?;
        let mut report = StageReport::new(Stage::Accession, uids.len());
        self.started(Stage::Accession, uids.len());
        for uid in &uids {
            match with_retries(self.max_retries, "efetch acc", || {
                self.entrez.efetch_accession(NUCLEOTIDE_DB, uid)
            }) {
                Ok(accession) => {
                    self.cache.update_candidate_accession(uid, &accession)?;
                    report.updated += 1;
                }
                Err(err) => {
                    warn!(uid = %uid, error = %err, "accession lookup failed");
                    report.failed += 1;
                }
            }
            self.advanced(1);
        }
        self.finished(&report);
        Ok(report)
    }

    pub fn fetch_headers(&self) -> Result<StageReport, NcfpError> {
        let uids = self.cache.list_uids_missing(MissingField::Header)?;
        let mut report = StageReport::new(Stage::Header, uids.len());
        self.started(Stage::Header, uids.len());
        for batch in uids.chunks(self.batch_size) {
            let result = with_retries(self.max_retries, "efetch headers", || {
                let history = self.entrez.epost(NUCLEOTIDE_DB, batch)?;
                let xml = self
                    .entrez
                    .efetch_history(NUCLEOTIDE_DB, &history, "gb", "xml")?;
                parse_gbseq_headers(&xml)
            });
            match result {
                Ok(headers) => {
                    for header in &headers {
                        if self.cache.add_header(header)? {
                            report.added += 1;
                        }
                    }
                    let missing = batch.len().saturating_sub(headers.len());
                    if missing > 0 {
                        warn!(
                            requested = batch.len(),
                            returned = headers.len(),
                            "header batch came back short"
                        );
                        report.failed += missing;
                    }
                }
                Err(err) => {
                    warn!(size = batch.len(), error = %err, "header batch failed");
                    report.failed += batch.len();
                }
            }
            self.advanced(batch.len());
        }
        self.finished(&report);
        Ok(report)
    }

    pub fn fetch_full_records(&self) -> Result<StageReport, NcfpError> {
        let covering = self.cache.shortest_covering_accessions()?;
        let cached = self.cache.full_record_accessions()?;
        let targets = covering.difference(&cached).cloned().collect::<Vec<_>>();
        let mut report = StageReport::new(Stage::FullRecord, targets.len());
        self.started(Stage::FullRecord, targets.len());
        for batch in targets.chunks(self.batch_size) {
            let result = with_retries(self.max_retries, "efetch records", || {
                let history = self.entrez.epost(NUCLEOTIDE_DB, batch)?;
                let text = self.entrez.efetch_history(
                    NUCLEOTIDE_DB,
                    &history,
                    "gbwithparts",
                    "text",
                )?;
                check_sentinel(&text)?;
                Ok(split_genbank_records(&text))
            });
            match result {
                Ok(records) => {
                    let requested = batch.iter().cloned().collect::<BTreeSet<_>>();
                    let mut stored = BTreeSet::new();
                    for (key, record) in records {
                        let Some(accession) = match_requested(&requested, &key) else {
                            warn!(accession = %key, "unrequested record in batch response");
                            continue;
                        };
                        if self.cache.add_full_record(accession, &record)? {
                            report.added += 1;
                        }
                        stored.insert(accession);
                    }
                    let missing = batch.len() - stored.len();
                    if missing > 0 {
                        warn!(
                            requested = batch.len(),
                            returned = stored.len(),
                            "full record batch came back short"
                        );
                        report.failed += missing;
                    }
                }
                Err(err) => {
                    warn!(size = batch.len(), error = %err, "full record batch failed");
                    report.failed += batch.len();
                }
            }
            self.advanced(batch.len());
        }
        self.finished(&report);
        Ok(report)
    }

    fn started(&self, stage: Stage, total: usize) {
        info!(stage = %stage, pending = total, "starting stage");
        self.progress.event(ProgressEvent::StageStarted {
            label: stage.to_string(),
            total,
        });
    }

    fn advanced(&self, count: usize) {
        self.progress.event(ProgressEvent::Advanced { count });
    }

    fn finished(&self, report: &StageReport) {
        report.log();
        self.progress.event(ProgressEvent::StageFinished {
            label: report.stage.to_string(),
        });
    }
}

/// Split a multi-record GenBank flatfile into `(accession, record)` pairs.
///
/// The key is the `VERSION` accession when present, else the first
/// `ACCESSION` token. Each record keeps its trailing `//` terminator.
pub fn split_genbank_records(text: &str) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if current.is_empty() && line.trim().is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if line.trim_end() == "//" {
            if let Some(key) = record_key(&current) {
                records.push((key, std::mem::take(&mut current)));
            } else {
                current.clear();
            }
        }
    }
    records
}

fn record_key(record: &str) -> Option<String> {
    let field = |name: &str| {
        record
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line[name.len()..].split_whitespace().next())
            .map(str::to_string)
    };
    field("VERSION").or_else(|| field("ACCESSION"))
}

fn match_requested<'b>(requested: &'b BTreeSet<String>, key: &str) -> Option<&'b str> {
    if let Some(found) = requested.get(key) {
        return Some(found);
    }
    let unversioned = key.split('.').next().unwrap_or(key);
    requested
        .iter()
        .find(|acc| acc.split('.').next() == Some(unversioned))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_two_records() {
        let text = "LOCUS       AB000001 30 bp DNA\nACCESSION   AB000001\nVERSION     AB000001.1\nORIGIN\n        1 atg\n//\n\nLOCUS       AB000002 30 bp DNA\nACCESSION   AB000002\n//\n";
        let records = split_genbank_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "AB000001.1");
        assert!(records[0].1.ends_with("//\n"));
        assert_eq!(records[1].0, "AB000002");
    }

    #[test]
    fn requested_match_ignores_version() {
        let requested = BTreeSet::from(["AB000002.3".to_string()]);
        assert_eq!(match_requested(&requested, "AB000002"), Some("AB000002.3"));
        assert_eq!(match_requested(&requested, "ZZ000002"), None);
    }
}
