use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::NcfpError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniprotCrossRefs {
    /// EMBL/GenBank/DDBJ protein ids (e.g. `AAC73112.1`), in entry order.
    pub embl_protein_ids: Vec<String>,
    /// RefSeq protein ids (e.g. `NP_414542.1`).
    pub refseq_protein_ids: Vec<String>,
}

impl UniprotCrossRefs {
    pub fn protein_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for id in self
            .embl_protein_ids
            .iter()
            .chain(self.refseq_protein_ids.iter())
        {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

pub trait UniprotClient: Send + Sync {
    fn cross_references(&self, accession: &str) -> Result<UniprotCrossRefs, NcfpError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    client: Client,
}

impl UniprotHttpClient {
    pub fn new() -> Result<Self, NcfpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncfp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NcfpError::UniprotHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| NcfpError::UniprotHttp(err.to_string()))?;
        Ok(Self { client })
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
            .unwrap_or_else(|_| "UniProt request failed".to_string());
        Err(NcfpError::UniprotStatus { status, message })
    }

    fn entry_url(accession: &str) -> String {
        format!("https://rest.uniprot.org/uniprotkb/{accession}.json")
    }
}

impl UniprotClient for UniprotHttpClient {
    fn cross_references(&self, accession: &str) -> Result<UniprotCrossRefs, NcfpError> {
        let response = self
            .client
            .get(Self::entry_url(accession))
            .query(&[("fields", "xref_embl,xref_refseq")])
            .send()
            .map_err(|err| NcfpError::UniprotHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| NcfpError::UniprotHttp(err.to_string()))?;
        Ok(extract_cross_references(&raw))
    }
}

pub fn extract_cross_references(raw: &Value) -> UniprotCrossRefs {
    let mut cross_refs = UniprotCrossRefs::default();
    let Some(xrefs) = raw
        .get("uniProtKBCrossReferences")
        .and_then(|v| v.as_array())
    else {
        return cross_refs;
    };
    for xref in xrefs {
        let db = xref.get("database").and_then(|v| v.as_str()).unwrap_or("");
        match db {
            "EMBL" => {
                if let Some(value) = property(xref, "ProteinId") {
                    cross_refs.embl_protein_ids.push(value);
                }
            }
            "RefSeq" => {
                if let Some(value) = xref.get("id").and_then(|v| v.as_str()) {
                    cross_refs.refseq_protein_ids.push(value.to_string());
                }
            }
            _ => {}
        }
    }
    cross_refs
}

fn property(xref: &Value, key: &str) -> Option<String> {
    xref.get("properties")?
        .as_array()?
        .iter()
        .find(|prop| prop.get("key").and_then(|v| v.as_str()) == Some(key))
        .and_then(|prop| prop.get("value"))
        .and_then(|v| v.as_str())
        .filter(|value| !value.is_empty() && *value != "-")
        .map(str::to_string)
}
