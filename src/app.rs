use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::RunConfig;
use crate::domain::ResolutionStatus;
use crate::download::{RetrievalEngine, StageReport};
use crate::entrez::EntrezClient;
use crate::error::NcfpError;
use crate::extract::{CdsExtractor, ExtractOptions};
use crate::fasta::{read_records, write_records};
use crate::sequences::{QueryResolver, ResolverOptions};
use crate::uniprot::UniprotClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted { label: String, total: usize },
    Advanced { count: usize },
    StageFinished { label: String },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// One `indicatif` bar per stage, drawn on stderr.
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{msg:>24} [{bar:40.cyan/blue}] {human_pos}/{human_len} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut current) = self.bar.lock() else {
            return;
        };
        match event {
            ProgressEvent::StageStarted { label, total } => {
                let bar = ProgressBar::with_draw_target(
                    Some(total as u64),
                    ProgressDrawTarget::stderr(),
                );
                bar.set_style(Self::style());
                bar.set_message(label);
                bar.enable_steady_tick(Duration::from_millis(200));
                if let Some(previous) = current.replace(bar) {
                    previous.finish_and_clear();
                }
            }
            ProgressEvent::Advanced { count } => {
                if let Some(bar) = current.as_ref() {
                    bar.inc(count as u64);
                }
            }
            ProgressEvent::StageFinished { .. } => {
                if let Some(bar) = current.take() {
                    bar.finish();
                }
            }
        }
    }
}

/// An input that reached a query term but produced no output pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedRecord {
    pub id: String,
    pub status: ResolutionStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub input_records: usize,
    pub with_query: usize,
    pub reused_from_cache: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub no_record: usize,
    pub no_feature: usize,
    pub ambiguous: usize,
    /// Inputs that never reached a query term.
    pub skipped: usize,
    pub unmatched: Vec<UnmatchedRecord>,
    pub stages: Vec<StageReport>,
    pub cache_path: String,
    pub aa_path: String,
    pub nt_path: String,
    pub skipped_path: Option<String>,
}

impl RunSummary {
    fn record(&mut self, status: ResolutionStatus) {
        match status {
            ResolutionStatus::Matched => self.matched += 1,
            ResolutionStatus::Mismatch => self.mismatched += 1,
            ResolutionStatus::NoRecord => self.no_record += 1,
            ResolutionStatus::NoFeature => self.no_feature += 1,
            ResolutionStatus::Ambiguous => self.ambiguous += 1,
            ResolutionStatus::Unresolved | ResolutionStatus::QueryAssigned => {}
        }
    }
}

pub struct App<E: EntrezClient, U: UniprotClient> {
    entrez: E,
    uniprot: U,
}

impl<E: EntrezClient, U: UniprotClient> App<E, U> {
    pub fn new(entrez: E, uniprot: U) -> Self {
        Self { entrez, uniprot }
    }

    /// Resolve every protein in `input` to its coding sequence and write the
    /// paired outputs under `outdir`.
    pub fn run(
        &self,
        input: &Utf8Path,
        outdir: &Utf8Path,
        config: &RunConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, NcfpError> {
        let mut records = read_records(input)?;
        if let Some(limit) = config.limit {
            if records.len() > limit {
                info!(limit, total = records.len(), "truncating input");
                records.truncate(limit);
            }
        }
        info!(count = records.len(), input = %input, "parsed input sequences");

        fs::create_dir_all(outdir).map_err(|err| NcfpError::Io(err.to_string()))?;
        let cache = open_cache(config)?;
        let cache_path = config.cache_path();

        let resolver = QueryResolver::new(
            &cache,
            Some(&self.uniprot as &dyn UniprotClient),
            ResolverOptions {
                format: config.format,
                stockholm: config.stockholm,
                uniprot_xref: config.uniprot_xref,
                max_retries: config.max_retries,
            },
        );
        let mut resolution = resolver.resolve_all(&records)?;

        let engine = RetrievalEngine::new(
            &cache,
            &self.entrez,
            config.batch_size,
            config.max_retries,
            sink,
        );
        let stages = engine.run_all()?;

        let extractor = CdsExtractor::new(
            &cache,
            ExtractOptions {
                match_order: config.match_order.clone(),
                alternative_start: config.alternative_start,
                unify_ids: config.unify_ids,
                skip_ambiguous: config.skip_ambiguous,
            },
        );

        let mut summary = RunSummary {
            input_records: records.len(),
            with_query: resolution.with_query(),
            reused_from_cache: resolution.reused,
            stages,
            cache_path: cache_path.to_string(),
            ..RunSummary::default()
        };
        let mut proteins = Vec::new();
        let mut coding = Vec::new();
        let mut skipped = Vec::new();
        for (record, state) in records.iter().zip(resolution.states.iter_mut()) {
            if state.query.is_none() {
                skipped.push(record.clone());
                continue;
            }
            let extraction = extractor.extract(record, state)?;
            state.status = extraction.status;
            summary.record(state.status);
            match extraction.pair {
                Some((protein, cds)) => {
                    proteins.push(protein);
                    coding.push(cds);
                }
                None => {
                    debug!(id = %state.record_id, status = ?state.status, "no output pair");
                    summary.unmatched.push(UnmatchedRecord {
                        id: state.record_id.clone(),
                        status: state.status,
                    });
                }
            }
        }
        summary.skipped = skipped.len();

        let aa_path = outdir.join(format!("{}_aa.fasta", config.file_stem));
        let nt_path = outdir.join(format!("{}_nt.fasta", config.file_stem));
        write_records(&aa_path, &proteins)?;
        write_records(&nt_path, &coding)?;
        summary.aa_path = aa_path.to_string();
        summary.nt_path = nt_path.to_string();
        if !skipped.is_empty() {
            let skipped_path = outdir.join(&config.skipped_file);
            warn!(
                count = skipped.len(),
                path = %skipped_path,
                "writing sequences without a query term"
            );
            write_records(&skipped_path, &skipped)?;
            summary.skipped_path = Some(skipped_path.to_string());
        }

        info!(
            matched = summary.matched,
            mismatched = summary.mismatched,
            no_record = summary.no_record,
            no_feature = summary.no_feature,
            skipped = summary.skipped,
            "{} of {} sequences paired with a coding sequence",
            summary.matched,
            summary.input_records
        );
        Ok(summary)
    }
}

fn open_cache(config: &RunConfig) -> Result<Cache, NcfpError> {
    let path: Utf8PathBuf = config.cache_path();
    if config.keep_cache && path.is_file() {
        info!(path = %path, "reusing existing cache");
        Cache::open(path.as_std_path())
    } else {
        info!(path = %path, "initializing cache");
        Cache::initialize(path.as_std_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn summary_counts_statuses() {
        let mut summary = RunSummary::default();
        summary.record(ResolutionStatus::Matched);
        summary.record(ResolutionStatus::Matched);
        summary.record(ResolutionStatus::NoFeature);
        summary.record(ResolutionStatus::QueryAssigned);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.no_feature, 1);
    }

    #[test]
    fn sinks_accept_events() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        recorder.event(ProgressEvent::Advanced { count: 3 });
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[ProgressEvent::Advanced { count: 3 }]
        );
        let bar = BarProgress::new();
        bar.event(ProgressEvent::StageStarted {
            label: "test".to_string(),
            total: 2,
        });
        bar.event(ProgressEvent::Advanced { count: 2 });
        bar.event(ProgressEvent::StageFinished {
            label: "test".to_string(),
        });
        assert!(bar.bar.lock().unwrap().is_none());
    }
}
