use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{InputFormat, MatchField};
use crate::error::NcfpError;

pub const DEFAULT_CACHE_DIR: &str = ".ncfp_cache";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRIES: usize = 10;
pub const DEFAULT_FILE_STEM: &str = "ncfp";
pub const DEFAULT_SKIPPED_FILE: &str = "skipped.fasta";

/// On-disk configuration. Every field is optional; CLI flags override it.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub format: Option<InputFormat>,
    #[serde(default)]
    pub uniprot_xref: Option<bool>,
    #[serde(default)]
    pub stockholm: Option<bool>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub file_stem: Option<String>,
    #[serde(default)]
    pub skipped_file: Option<String>,
    #[serde(default)]
    pub alternative_start: Option<bool>,
    #[serde(default)]
    pub unify_ids: Option<bool>,
    #[serde(default)]
    pub match_order: Option<Vec<MatchField>>,
    #[serde(default)]
    pub skip_ambiguous: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub email: Option<String>,
    pub format: Option<InputFormat>,
    pub uniprot_xref: bool,
    pub stockholm: bool,
    pub cache_dir: Option<String>,
    pub cache_stem: Option<String>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<usize>,
    pub limit: Option<usize>,
    pub file_stem: Option<String>,
    pub keep_cache: bool,
    pub skipped_file: Option<String>,
    pub alternative_start: bool,
    pub unify_ids: bool,
    pub use_protein_id: bool,
    pub gene_match: bool,
    pub skip_ambiguous: bool,
    pub disable_progress: bool,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub email: String,
    pub format: InputFormat,
    pub uniprot_xref: bool,
    pub stockholm: bool,
    pub cache_dir: Utf8PathBuf,
    pub cache_stem: String,
    pub batch_size: usize,
    pub max_retries: usize,
    pub limit: Option<usize>,
    pub file_stem: String,
    pub keep_cache: bool,
    pub skipped_file: String,
    pub alternative_start: bool,
    pub unify_ids: bool,
    pub match_order: Vec<MatchField>,
    pub skip_ambiguous: bool,
    pub show_progress: bool,
}

impl RunConfig {
    pub fn cache_path(&self) -> Utf8PathBuf {
        self.cache_dir
            .join(format!("ncfpcache_{}.sqlite3", self.cache_stem))
    }

    pub fn validate(&self) -> Result<(), NcfpError> {
        if self.email.trim().is_empty() {
            return Err(NcfpError::InvalidConfig(
                "an email address is required by NCBI".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(NcfpError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(NcfpError::InvalidConfig(
                "retries must be at least 1".to_string(),
            ));
        }
        if self.match_order.is_empty() {
            return Err(NcfpError::InvalidConfig(
                "at least one CDS match field is required".to_string(),
            ));
        }
        if self.cache_stem.trim().is_empty() || self.cache_stem.contains('/') {
            return Err(NcfpError::InvalidConfig(format!(
                "invalid cache stem: {:?}",
                self.cache_stem
            )));
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, NcfpError> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => Config::default(),
        };
        let resolved = Self::resolve_config(config, overrides)?;
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn read(path: &Path) -> Result<Config, NcfpError> {
        let content =
            fs::read_to_string(path).map_err(|_| NcfpError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| NcfpError::InvalidConfig(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, NcfpError> {
        let email = overrides
            .email
            .or(config.email)
            .ok_or_else(|| NcfpError::InvalidConfig("missing email address".to_string()))?;
        let format = overrides
            .format
            .or(config.format)
            .unwrap_or(InputFormat::Ncbi);
        let match_order = match config.match_order {
            Some(order) if !overrides.use_protein_id && !overrides.gene_match => order,
            _ => default_match_order(format, overrides.use_protein_id, overrides.gene_match),
        };

        Ok(RunConfig {
            email,
            format,
            uniprot_xref: overrides.uniprot_xref || config.uniprot_xref.unwrap_or(false),
            stockholm: overrides.stockholm || config.stockholm.unwrap_or(false),
            cache_dir: Utf8PathBuf::from(
                overrides
                    .cache_dir
                    .or(config.cache_dir)
                    .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
            ),
            cache_stem: overrides.cache_stem.unwrap_or_else(default_cache_stem),
            batch_size: overrides
                .batch_size
                .or(config.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            max_retries: overrides
                .max_retries
                .or(config.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            limit: overrides.limit,
            file_stem: overrides
                .file_stem
                .or(config.file_stem)
                .unwrap_or_else(|| DEFAULT_FILE_STEM.to_string()),
            keep_cache: overrides.keep_cache,
            skipped_file: overrides
                .skipped_file
                .or(config.skipped_file)
                .unwrap_or_else(|| DEFAULT_SKIPPED_FILE.to_string()),
            alternative_start: overrides.alternative_start
                || config.alternative_start.unwrap_or(false),
            unify_ids: overrides.unify_ids || config.unify_ids.unwrap_or(false),
            match_order,
            skip_ambiguous: overrides.skip_ambiguous || config.skip_ambiguous.unwrap_or(false),
            show_progress: !overrides.disable_progress,
        })
    }
}

pub fn default_match_order(
    format: InputFormat,
    use_protein_id: bool,
    gene_match: bool,
) -> Vec<MatchField> {
    let mut order = match (format, use_protein_id) {
        (InputFormat::Ncbi, _) => vec![MatchField::ProteinId],
        (InputFormat::Uniprot, true) => vec![MatchField::ProteinId, MatchField::LocusTag],
        (InputFormat::Uniprot, false) => vec![MatchField::LocusTag],
    };
    if gene_match {
        order.push(MatchField::Gene);
    }
    order
}

pub fn default_cache_stem() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_file() {
        let config = Config {
            email: Some("file@dev.null".to_string()),
            batch_size: Some(20),
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            email: Some("cli@dev.null".to_string()),
            cache_stem: Some("stem".to_string()),
            ..ConfigOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();
        assert_eq!(resolved.email, "cli@dev.null");
        assert_eq!(resolved.batch_size, 20);
        assert_eq!(resolved.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(resolved.match_order, vec![MatchField::ProteinId]);
        assert!(resolved.cache_path().ends_with("ncfpcache_stem.sqlite3"));
    }
}
