use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::cache::HeaderRecord;
use crate::error::NcfpError;

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const GENBANK_SENTINEL: &str = "LOCUS";

const TOOL_NAME: &str = "ncfp";
const MIN_INTERVAL: Duration = Duration::from_millis(340);
const MIN_INTERVAL_WITH_KEY: Duration = Duration::from_millis(110);

/// Server-side handle to a batch of uids submitted with EPost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryHandle {
    pub webenv: String,
    pub query_key: String,
}

/// Remote calls the retrieval stages make against NCBI Entrez.
///
/// Implementations make exactly one attempt per call; retrying is the
/// caller's job.
pub trait EntrezClient: Send + Sync {
    fn esearch(&self, db: &str, term: &str) -> Result<Vec<String>, NcfpError>;
    fn elink(&self, dbfrom: &str, db: &str, id: &str) -> Result<Vec<String>, NcfpError>;
    fn efetch_accession(&self, db: &str, uid: &str) -> Result<String, NcfpError>;
    fn epost(&self, db: &str, ids: &[String]) -> Result<HistoryHandle, NcfpError>;
    fn efetch_history(
        &self,
        db: &str,
        history: &HistoryHandle,
        rettype: &str,
        retmode: &str,
    ) -> Result<String, NcfpError>;
}

pub struct EntrezHttpClient {
    client: Client,
    base_url: String,
    email: String,
    api_key: Option<String>,
    last_request: Mutex<Option<Instant>>,
}

impl EntrezHttpClient {
    pub fn new(email: &str) -> Result<Self, NcfpError> {
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Self::with_base_url(email, api_key, EUTILS_BASE_URL)
    }

    pub fn with_base_url(
        email: &str,
        api_key: Option<String>,
        base_url: &str,
    ) -> Result<Self, NcfpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncfp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NcfpError::EntrezHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| NcfpError::EntrezHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            api_key,
            last_request: Mutex::new(None),
        })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tool", TOOL_NAME.to_string()),
            ("email", self.email.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    // NCBI allows three requests per second without a key, ten with one.
    fn throttle(&self) {
        let interval = if self.api_key.is_some() {
            MIN_INTERVAL_WITH_KEY
        } else {
            MIN_INTERVAL
        };
        let mut guard = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = *guard {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        *guard = Some(Instant::now());
    }

    fn get_text(&self, utility: &str, params: &[(&str, String)]) -> Result<String, NcfpError> {
        self.throttle();
        let url = format!("{}/{utility}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&self.common_params())
            .query(params)
            .send()
            .map_err(|err| NcfpError::EntrezHttp(err.to_string()))?;
        Self::handle_status(response)?
            .text()
            .map_err(|err| NcfpError::EntrezHttp(err.to_string()))
    }

    fn post_text(&self, utility: &str, params: &[(&str, String)]) -> Result<String, NcfpError> {
        self.throttle();
        let url = format!("{}/{utility}", self.base_url);
        let mut form = self.common_params();
        form.extend(params.iter().map(|(key, value)| (*key, value.clone())));
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .map_err(|err| NcfpError::EntrezHttp(err.to_string()))?;
        Self::handle_status(response)?
            .text()
            .map_err(|err| NcfpError::EntrezHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, NcfpError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Entrez request failed".to_string());
        Err(NcfpError::EntrezStatus { status, message })
    }
}

impl EntrezClient for EntrezHttpClient {
    fn esearch(&self, db: &str, term: &str) -> Result<Vec<String>, NcfpError> {
        let body = self.get_text(
            "esearch.fcgi",
            &[
                ("db", db.to_string()),
                ("term", term.to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        parse_esearch_json(&body)
    }

    fn elink(&self, dbfrom: &str, db: &str, id: &str) -> Result<Vec<String>, NcfpError> {
        let body = self.get_text(
            "elink.fcgi",
            &[
                ("dbfrom", dbfrom.to_string()),
                ("db", db.to_string()),
                ("id", id.to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        parse_elink_json(&body, &format!("{dbfrom}_{db}"))
    }

    fn efetch_accession(&self, db: &str, uid: &str) -> Result<String, NcfpError> {
        let body = self.get_text(
            "efetch.fcgi",
            &[
                ("db", db.to_string()),
                ("id", uid.to_string()),
                ("rettype", "acc".to_string()),
                ("retmode", "text".to_string()),
            ],
        )?;
        parse_accession_text(&body)
    }

    fn epost(&self, db: &str, ids: &[String]) -> Result<HistoryHandle, NcfpError> {
        let body = self.post_text(
            "epost.fcgi",
            &[("db", db.to_string()), ("id", ids.join(","))],
        )?;
        parse_epost_xml(&body)
    }

    fn efetch_history(
        &self,
        db: &str,
        history: &HistoryHandle,
        rettype: &str,
        retmode: &str,
    ) -> Result<String, NcfpError> {
        self.get_text(
            "efetch.fcgi",
            &[
                ("db", db.to_string()),
                ("WebEnv", history.webenv.clone()),
                ("query_key", history.query_key.clone()),
                ("rettype", rettype.to_string()),
                ("retmode", retmode.to_string()),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

pub fn parse_esearch_json(body: &str) -> Result<Vec<String>, NcfpError> {
    let response: ESearchResponse =
        serde_json::from_str(body).map_err(|err| NcfpError::EntrezParse(err.to_string()))?;
    if let Some(error) = response.esearchresult.error {
        return Err(NcfpError::EntrezParse(error));
    }
    Ok(response.esearchresult.idlist)
}

#[derive(Debug, Deserialize)]
struct ELinkResponse {
    #[serde(default)]
    linksets: Vec<LinkSet>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkSet {
    #[serde(default)]
    linksetdbs: Vec<LinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct LinkSetDb {
    linkname: String,
    #[serde(default)]
    links: Vec<String>,
}

/// Uids from the `preferred` link set (e.g. `protein_nuccore`), or from the
/// first link set returned when that name is absent.
pub fn parse_elink_json(body: &str, preferred: &str) -> Result<Vec<String>, NcfpError> {
    let response: ELinkResponse =
        serde_json::from_str(body).map_err(|err| NcfpError::EntrezParse(err.to_string()))?;
    if let Some(error) = response.error {
        return Err(NcfpError::EntrezParse(error));
    }
    let dbs = response
        .linksets
        .into_iter()
        .flat_map(|set| set.linksetdbs)
        .collect::<Vec<_>>();
    let chosen = dbs
        .iter()
        .find(|db| db.linkname == preferred)
        .or_else(|| dbs.first());
    Ok(chosen.map(|db| db.links.clone()).unwrap_or_default())
}

pub fn parse_accession_text(body: &str) -> Result<String, NcfpError> {
    let accession = body.trim();
    let looks_valid = !accession.is_empty()
        && !accession.contains(char::is_whitespace)
        && accession
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_'));
    if !looks_valid {
        return Err(NcfpError::EntrezParse(format!(
            "unexpected accession response: {}",
            accession.chars().take(80).collect::<String>()
        )));
    }
    Ok(accession.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename = "ePostResult")]
struct EPostXml {
    #[serde(rename = "QueryKey")]
    query_key: Option<String>,
    #[serde(rename = "WebEnv")]
    webenv: Option<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

pub fn parse_epost_xml(body: &str) -> Result<HistoryHandle, NcfpError> {
    let parsed: EPostXml =
        quick_xml::de::from_str(body).map_err(|err| NcfpError::EntrezParse(err.to_string()))?;
    if let Some(error) = parsed.error {
        return Err(NcfpError::EntrezParse(error));
    }
    match (parsed.webenv, parsed.query_key) {
        (Some(webenv), Some(query_key)) => Ok(HistoryHandle { webenv, query_key }),
        _ => Err(NcfpError::EntrezParse(
            "EPost response lacks WebEnv/QueryKey".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "GBSet")]
struct GbSetXml {
    #[serde(rename = "GBSeq", default)]
    sequences: Vec<GbSeqHeaderXml>,
}

#[derive(Debug, Deserialize)]
struct GbSeqHeaderXml {
    #[serde(rename = "GBSeq_length")]
    length: Option<u64>,
    #[serde(rename = "GBSeq_organism")]
    organism: Option<String>,
    #[serde(rename = "GBSeq_taxonomy")]
    taxonomy: Option<String>,
    #[serde(rename = "GBSeq_update-date")]
    update_date: Option<String>,
    #[serde(rename = "GBSeq_accession-version")]
    accession_version: Option<String>,
    #[serde(rename = "GBSeq_primary-accession")]
    primary_accession: Option<String>,
}

/// Header metadata from a `GBSet/GBSeq` XML efetch response.
pub fn parse_gbseq_headers(xml: &str) -> Result<Vec<HeaderRecord>, NcfpError> {
    let parsed: GbSetXml =
        quick_xml::de::from_str(xml).map_err(|err| NcfpError::EntrezParse(err.to_string()))?;
    parsed
        .sequences
        .into_iter()
        .map(|seq| {
            let accession = seq
                .accession_version
                .or(seq.primary_accession)
                .ok_or_else(|| NcfpError::EntrezParse("GBSeq without accession".to_string()))?;
            let length = seq.length.ok_or_else(|| {
                NcfpError::EntrezParse(format!("GBSeq {accession} without length"))
            })?;
            Ok(HeaderRecord {
                accession,
                length,
                organism: seq.organism,
                taxonomy: seq.taxonomy,
                date: seq.update_date,
            })
        })
        .collect()
}

pub fn check_sentinel(text: &str) -> Result<(), NcfpError> {
    if text.trim_start().starts_with(GENBANK_SENTINEL) {
        Ok(())
    } else {
        Err(NcfpError::MissingSentinel {
            expected: GENBANK_SENTINEL,
        })
    }
}
