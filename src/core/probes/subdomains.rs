// src/core/probes/subdomains.rs

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::core::errors::ScanError;

const CRT_SH: &str = "https://crt.sh/";

/// One row of crt.sh's JSON output; only the name list matters here.
#[derive(Debug, Deserialize)]
pub struct CrtShEntry {
    pub name_value: String,
}

/// Searches certificate-transparency logs for names under `domain`.
pub async fn from_certificate_transparency(
    client: &reqwest::Client,
    domain: &str,
) -> Result<Vec<CrtShEntry>, ScanError> {
    let url = Url::parse_with_params(CRT_SH, &[("q", format!("%.{}", domain)), ("output", "json".to_string())])
        .map_err(|e| ScanError::probe(format!("invalid crt.sh URL: {}", e)))?;

    info!(target = %domain, "Querying certificate transparency logs.");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        warn!(status = %response.status(), "crt.sh returned an error status.");
        return Err(ScanError::probe(format!("crt.sh returned {}", response.status())));
    }
    Ok(response.json::<Vec<CrtShEntry>>().await?)
}

/// Merges certificate names with already-known subdomains: wildcards stripped,
/// lower-cased, restricted to `domain` and its subdomains, sorted, at most `max`.
pub fn extract_subdomains<'a, I>(entries: &[CrtShEntry], known: I, domain: &str, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let suffix = format!(".{}", domain);
    let from_logs = entries
        .iter()
        .flat_map(|entry| entry.name_value.split(['\n', ',']))
        .map(|name| name.trim().trim_start_matches("*.").to_lowercase());

    let unique: BTreeSet<String> = from_logs
        .chain(known.into_iter().map(|s| s.to_lowercase()))
        .filter(|name| name == domain || name.ends_with(&suffix))
        .collect();

    unique.into_iter().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(names: &str) -> CrtShEntry {
        CrtShEntry { name_value: names.to_string() }
    }

    #[test]
    fn names_are_cleaned_filtered_and_merged() {
        let entries = vec![
            entry("*.example.com\nexample.com"),
            entry("API.example.com,mail.example.com"),
            entry("example.com.evil.net"),
            entry("notexample.com"),
        ];
        let known = vec!["www.example.com".to_string(), "api.example.com".to_string()];
        let subs = extract_subdomains(&entries, &known, "example.com", 100);
        assert_eq!(subs, vec!["api.example.com", "example.com", "mail.example.com", "www.example.com"]);
    }

    #[test]
    fn result_is_capped() {
        let entries = vec![entry("a.example.com\nb.example.com\nc.example.com")];
        let subs = extract_subdomains(&entries, &Vec::new(), "example.com", 2);
        assert_eq!(subs, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn crt_sh_rows_deserialize() {
        let rows: Vec<CrtShEntry> =
            serde_json::from_str(r#"[{"issuer_ca_id":1,"name_value":"www.example.com","id":5}]"#).unwrap();
        assert_eq!(rows[0].name_value, "www.example.com");
    }
}
