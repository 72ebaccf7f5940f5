use std::fs::File;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use ncfp::app::{App, BarProgress, ProgressSink, RunSummary, SilentProgress};
use ncfp::config::{
    ConfigLoader, ConfigOverrides, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_DIR, DEFAULT_FILE_STEM,
    DEFAULT_MAX_RETRIES, DEFAULT_SKIPPED_FILE,
};
use ncfp::domain::InputFormat;
use ncfp::entrez::EntrezHttpClient;
use ncfp::error::NcfpError;
use ncfp::uniprot::UniprotHttpClient;

#[derive(Parser)]
#[command(name = "ncfp")]
#[command(about = "Find nucleotide coding sequences in NCBI for a file of protein sequences")]
#[command(version, author)]
struct Cli {
    /// Input protein FASTA file (`-` reads stdin)
    infile: Utf8PathBuf,

    /// Directory for the output FASTA files
    outdir: Utf8PathBuf,

    /// Contact address sent with every Entrez request
    email: String,

    /// Input headers are in UniProt format
    #[arg(short = 'u', long)]
    uniprot: bool,

    /// Look up EMBL protein cross-references in UniProt before falling back to GN=
    #[arg(long)]
    uniprot_xref: bool,

    /// Record ids carry a /start-end residue region
    #[arg(short = 's', long)]
    stockholm: bool,

    #[arg(short = 'd', long = "cachedir", help = format!("Cache directory [default: {DEFAULT_CACHE_DIR}]"))]
    cache_dir: Option<String>,

    /// Cache file stem; an existing stem is reused with --keepcache [default: timestamp]
    #[arg(short = 'c', long = "cachestem")]
    cache_stem: Option<String>,

    #[arg(short = 'b', long = "batchsize", help = format!("Records per Entrez batch request [default: {DEFAULT_BATCH_SIZE}]"))]
    batch_size: Option<usize>,

    #[arg(short = 'r', long = "retries", help = format!("Attempts per Entrez request [default: {DEFAULT_MAX_RETRIES}]"))]
    retries: Option<usize>,

    /// Only process the first N input sequences
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long = "filestem", help = format!("Output file stem [default: {DEFAULT_FILE_STEM}]"))]
    file_stem: Option<String>,

    /// Reuse the cache file named by --cachestem if it exists
    #[arg(long = "keepcache")]
    keep_cache: bool,

    #[arg(long = "skippedfile", help = format!("File for sequences without a coding sequence [default: {DEFAULT_SKIPPED_FILE}]"))]
    skipped_file: Option<String>,

    /// Allow table 11 alternative start codons and ignore codon_start
    #[arg(long)]
    alternative_start: bool,

    /// Use the input sequence id for both output records
    #[arg(long = "unify-seqid")]
    unify_seqid: bool,

    /// Match UniProt input on CDS protein_id before locus_tag
    #[arg(long)]
    use_protein_id: bool,

    /// Also match CDS features on the gene qualifier
    #[arg(long)]
    gene_match: bool,

    /// Skip sequences linked to more than one full record instead of aborting
    #[arg(long)]
    skip_ambiguous: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write log output to this file
    #[arg(short = 'l', long)]
    logfile: Option<PathBuf>,

    #[arg(short = 'v', long)]
    verbose: bool,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    disable_progress: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            email: Some(self.email.clone()),
            format: self.uniprot.then_some(InputFormat::Uniprot),
            uniprot_xref: self.uniprot_xref,
            stockholm: self.stockholm,
            cache_dir: self.cache_dir.clone(),
            cache_stem: self.cache_stem.clone(),
            batch_size: self.batch_size,
            max_retries: self.retries,
            limit: self.limit,
            file_stem: self.file_stem.clone(),
            keep_cache: self.keep_cache,
            skipped_file: self.skipped_file.clone(),
            alternative_start: self.alternative_start,
            unify_ids: self.unify_seqid,
            use_protein_id: self.use_protein_id,
            gene_match: self.gene_match,
            skip_ambiguous: self.skip_ambiguous,
            disable_progress: self.disable_progress,
        }
    }

    fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<NcfpError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &NcfpError) -> u8 {
    match error {
        NcfpError::InputNotFound(_) => 2,
        NcfpError::InvalidConfig(_) | NcfpError::ConfigRead(_) => 3,
        _ => 1,
    }
}

fn init_logging(cli: &Cli) -> Result<(), NcfpError> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let file_layer = match &cli.logfile {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| NcfpError::Io(format!("create {}: {err}", path.display())))?;
            let level = if cli.debug { "debug" } else { "info" };
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new(level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    let started = Instant::now();

    let config = ConfigLoader::resolve(cli.config.as_deref(), cli.overrides())?;
    info!(
        email = %config.email,
        format = %config.format,
        cache = %config.cache_path(),
        "configuration resolved"
    );

    let entrez = EntrezHttpClient::new(&config.email)?;
    let uniprot = UniprotHttpClient::new()?;
    let app = App::new(entrez, uniprot);

    let sink: Box<dyn ProgressSink> = if config.show_progress && std::io::stderr().is_terminal() {
        Box::new(BarProgress::new())
    } else {
        Box::new(SilentProgress)
    };
    let summary = app.run(&cli.infile, &cli.outdir, &config, sink.as_ref())?;
    print_summary(&summary);

    info!(
        "Completed. Time taken: {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "ncfp: {} of {} sequences paired with a coding sequence",
        summary.matched, summary.input_records
    );
    if summary.mismatched > 0 {
        println!("  translation mismatches: {}", summary.mismatched);
    }
    if !summary.unmatched.is_empty() {
        println!(
            "  no output pair: {} (no record {}, no feature {}, ambiguous {})",
            summary.unmatched.len(),
            summary.no_record,
            summary.no_feature,
            summary.ambiguous
        );
    }
    if summary.skipped > 0 {
        println!("  skipped without a query term: {}", summary.skipped);
    }
    println!("  proteins: {}", summary.aa_path);
    println!("  coding sequences: {}", summary.nt_path);
    if let Some(path) = &summary.skipped_path {
        println!("  skipped sequences: {path}");
    }
}
