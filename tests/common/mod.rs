#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use ncfp::config::{Config, ConfigLoader, ConfigOverrides, RunConfig};
use ncfp::entrez::{EntrezClient, HistoryHandle};
use ncfp::error::NcfpError;
use ncfp::uniprot::{UniprotClient, UniprotCrossRefs};

/// In-memory stand-in for Entrez with per-endpoint call counters.
#[derive(Default)]
pub struct MockEntrez {
    pub nucleotide_hits: HashMap<String, Vec<String>>,
    pub protein_links: HashMap<String, Vec<String>>,
    pub accessions: HashMap<String, String>,
    pub lengths: HashMap<String, u64>,
    pub records: HashMap<String, String>,
    /// Failures returned, in order, before any real answer.
    pub failures: Mutex<Vec<NcfpError>>,
    /// Number of leading full-record fetches that return an HTML error page.
    pub broken_record_fetches: Mutex<usize>,
    pub calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockEntrez {
    pub fn with_protein(mut self, protein: &str, uid: &str, accession: &str, record: &str) -> Self {
        self.protein_links
            .entry(protein.to_string())
            .or_default()
            .push(uid.to_string());
        self.add_nucleotide(uid, accession, record)
    }

    pub fn with_gene(mut self, gene: &str, uid: &str, accession: &str, record: &str) -> Self {
        self.nucleotide_hits
            .entry(gene.to_string())
            .or_default()
            .push(uid.to_string());
        self.add_nucleotide(uid, accession, record)
    }

    fn add_nucleotide(mut self, uid: &str, accession: &str, record: &str) -> Self {
        self.accessions.insert(uid.to_string(), accession.to_string());
        self.lengths
            .insert(accession.to_string(), record_length(record));
        self.records.insert(accession.to_string(), record.to_string());
        self
    }

    pub fn failing_with(self, failures: Vec<NcfpError>) -> Self {
        *self.failures.lock().unwrap() = failures;
        self
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn hit(&self, endpoint: &'static str) -> Result<(), NcfpError> {
        *self.calls.lock().unwrap().entry(endpoint).or_default() += 1;
        let mut failures = self.failures.lock().unwrap();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

impl EntrezClient for MockEntrez {
    fn esearch(&self, _db: &str, term: &str) -> Result<Vec<String>, NcfpError> {
        self.hit("esearch")?;
        Ok(self.nucleotide_hits.get(term).cloned().unwrap_or_default())
    }

    fn elink(&self, _dbfrom: &str, _db: &str, id: &str) -> Result<Vec<String>, NcfpError> {
        self.hit("elink")?;
        Ok(self.protein_links.get(id).cloned().unwrap_or_default())
    }

    fn efetch_accession(&self, _db: &str, uid: &str) -> Result<String, NcfpError> {
        self.hit("efetch_accession")?;
        self.accessions
            .get(uid)
            .cloned()
            .ok_or_else(|| NcfpError::EntrezParse(format!("unknown uid {uid}")))
    }

    fn epost(&self, _db: &str, ids: &[String]) -> Result<HistoryHandle, NcfpError> {
        self.hit("epost")?;
        Ok(HistoryHandle {
            webenv: ids.join(","),
            query_key: "1".to_string(),
        })
    }

    fn efetch_history(
        &self,
        _db: &str,
        history: &HistoryHandle,
        rettype: &str,
        _retmode: &str,
    ) -> Result<String, NcfpError> {
        self.hit("efetch_history")?;
        let ids = history.webenv.split(',').collect::<Vec<_>>();
        if rettype == "gb" {
            let mut xml = String::from("<?xml version=\"1.0\"?>\n<GBSet>\n");
            for uid in ids {
                let Some(accession) = self.accessions.get(uid) else {
                    continue;
                };
                let length = self.lengths.get(accession).copied().unwrap_or(0);
                xml.push_str(&format!(
                    "<GBSeq><GBSeq_length>{length}</GBSeq_length>\
                     <GBSeq_organism>Escherichia coli</GBSeq_organism>\
                     <GBSeq_taxonomy>Bacteria; Pseudomonadota</GBSeq_taxonomy>\
                     <GBSeq_update-date>01-JAN-2020</GBSeq_update-date>\
                     <GBSeq_accession-version>{accession}</GBSeq_accession-version></GBSeq>\n"
                ));
            }
            xml.push_str("</GBSet>\n");
            return Ok(xml);
        }

        let mut broken = self.broken_record_fetches.lock().unwrap();
        if *broken > 0 {
            *broken -= 1;
            return Ok("<html><body>Service unavailable</body></html>".to_string());
        }
        Ok(ids
            .iter()
            .filter_map(|accession| self.records.get(*accession))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// Lets a test keep the mock after handing it to `App`.
impl EntrezClient for &MockEntrez {
    fn esearch(&self, db: &str, term: &str) -> Result<Vec<String>, NcfpError> {
        (**self).esearch(db, term)
    }

    fn elink(&self, dbfrom: &str, db: &str, id: &str) -> Result<Vec<String>, NcfpError> {
        (**self).elink(dbfrom, db, id)
    }

    fn efetch_accession(&self, db: &str, uid: &str) -> Result<String, NcfpError> {
        (**self).efetch_accession(db, uid)
    }

    fn epost(&self, db: &str, ids: &[String]) -> Result<HistoryHandle, NcfpError> {
        (**self).epost(db, ids)
    }

    fn efetch_history(
        &self,
        db: &str,
        history: &HistoryHandle,
        rettype: &str,
        retmode: &str,
    ) -> Result<String, NcfpError> {
        (**self).efetch_history(db, history, rettype, retmode)
    }
}

#[derive(Default)]
pub struct MockUniprot {
    pub entries: HashMap<String, UniprotCrossRefs>,
    /// Every lookup fails with a transport error.
    pub unreachable: bool,
    pub calls: Mutex<usize>,
}

impl UniprotClient for MockUniprot {
    fn cross_references(&self, accession: &str) -> Result<UniprotCrossRefs, NcfpError> {
        *self.calls.lock().unwrap() += 1;
        if self.unreachable {
            return Err(NcfpError::UniprotHttp("connection refused".to_string()));
        }
        self.entries
            .get(accession)
            .cloned()
            .ok_or_else(|| NcfpError::UniprotStatus {
                status: 404,
                message: format!("{accession} not found"),
            })
    }
}

impl UniprotClient for &MockUniprot {
    fn cross_references(&self, accession: &str) -> Result<UniprotCrossRefs, NcfpError> {
        (**self).cross_references(accession)
    }
}

fn record_length(record: &str) -> u64 {
    record
        .lines()
        .next()
        .and_then(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            fields
                .iter()
                .position(|field| *field == "bp")
                .and_then(|idx| fields.get(idx.checked_sub(1)?))
                .and_then(|value| value.parse().ok())
        })
        .unwrap_or(0)
}

/// A CDS feature for [`genbank_record`]: location plus qualifiers.
pub struct CdsFixture<'a> {
    pub location: &'a str,
    pub qualifiers: &'a [(&'a str, &'a str)],
}

/// Minimal GenBank flatfile for `sequence` carrying the given CDS features.
pub fn genbank_record(version: &str, sequence: &str, features: &[CdsFixture<'_>]) -> String {
    let accession = version.split('.').next().unwrap_or(version);
    let mut text = format!(
        "LOCUS       {accession:<16}{:>11} bp    DNA     linear   BCT 01-JAN-2020\n",
        sequence.len()
    );
    text.push_str("DEFINITION  Synthetic test record.\n");
    text.push_str(&format!("ACCESSION   {accession}\n"));
    text.push_str(&format!("VERSION     {version}\n"));
    text.push_str("FEATURES             Location/Qualifiers\n");
    for feature in features {
        text.push_str(&format!("     CDS             {}\n", feature.location));
        for (key, value) in feature.qualifiers {
            if *key == "codon_start" {
                text.push_str(&format!("                     /{key}={value}\n"));
            } else {
                text.push_str(&format!("                     /{key}=\"{value}\"\n"));
            }
        }
    }
    text.push_str("ORIGIN\n");
    let bases = sequence.to_ascii_lowercase().into_bytes();
    for (line_idx, line) in bases.chunks(60).enumerate() {
        let groups = line
            .chunks(10)
            .map(|group| String::from_utf8_lossy(group).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&format!("{:>9} {groups}\n", line_idx * 60 + 1));
    }
    text.push_str("//\n");
    text
}

/// Run configuration rooted in a scratch directory.
pub fn run_config(cache_dir: &std::path::Path, tweak: impl FnOnce(&mut ConfigOverrides)) -> RunConfig {
    let mut overrides = ConfigOverrides {
        email: Some("tester@example.org".to_string()),
        cache_dir: Some(cache_dir.to_string_lossy().into_owned()),
        cache_stem: Some("test".to_string()),
        disable_progress: true,
        ..ConfigOverrides::default()
    };
    tweak(&mut overrides);
    let config = ConfigLoader::resolve_config(Config::default(), overrides).unwrap();
    config.validate().unwrap();
    config
}
