//! Client for the public marketplace extension query API.
//!
//! One identifier maps to exactly one POST; the response is parsed into typed
//! structs and normalized into an [`ExtensionRecord`]. Nothing here retries.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{ImportError, Result};
use crate::types::{ExtensionIdentifier, ExtensionRecord, RecordParts, VersionEntry};

pub(crate) const DEFAULT_QUERY_ENDPOINT: &str =
    "https://marketplace.visualstudio.com/_apis/public/gallery/extensionquery";
pub(crate) const DEFAULT_USER_AGENT: &str = "VS Code Build";

const ACCEPT_HEADER: &str = "application/json;api-version=3.0-preview.1";
const TARGET_PRODUCT: &str = "Microsoft.VisualStudio.Code";
const FILTER_TYPE_TARGET: u32 = 8;
const FILTER_TYPE_EXTENSION_NAME: u32 = 7;
const FLAG_INCLUDE_VERSIONS: u32 = 0x1;
const FLAG_INCLUDE_CATEGORY_AND_TAGS: u32 = 0x4;
// Only one exact match is expected.
const PAGE_SIZE: u32 = 2;
const ERROR_BODY_CHARS: usize = 200;

/// Anything that can resolve one `publisher.name` identifier to a record.
pub(crate) trait ExtensionSource {
    fn fetch_extension_info(&self, identifier: &str) -> Result<ExtensionRecord>;
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    extensions: Vec<RawExtension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtension {
    extension_id: String,
    extension_name: String,
    display_name: String,
    #[serde(default)]
    short_description: Option<String>,
    publisher: RawPublisher,
    #[serde(default)]
    versions: Vec<RawVersion>,
    #[serde(default)]
    categories: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPublisher {
    publisher_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    version: String,
    last_updated: String,
}

pub(crate) fn build_query(identifier: &ExtensionIdentifier) -> serde_json::Value {
    json!({
        "assetTypes": [],
        "filters": [
            {
                "criteria": [
                    { "filterType": FILTER_TYPE_TARGET, "value": TARGET_PRODUCT },
                    { "filterType": FILTER_TYPE_EXTENSION_NAME, "value": identifier.to_string() },
                ],
                "pageNumber": 1,
                "pageSize": PAGE_SIZE,
            }
        ],
        "flags": FLAG_INCLUDE_VERSIONS | FLAG_INCLUDE_CATEGORY_AND_TAGS,
    })
}

/// Normalize a query response body for `identifier`.
pub(crate) fn parse_query_response(
    identifier: &ExtensionIdentifier,
    body: &str,
) -> Result<ExtensionRecord> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| ImportError::validation(format!("{identifier}: malformed response: {e}")))?;

    let Some(raw) = response
        .results
        .into_iter()
        .next()
        .and_then(|result| result.extensions.into_iter().next())
    else {
        return Err(ImportError::NotFound {
            identifier: identifier.to_string(),
        });
    };

    // The catalog's own casing wins over whatever the caller typed.
    let canonical =
        ExtensionIdentifier::parse(&format!("{}.{}", raw.publisher.publisher_name, raw.extension_name))?;
    if !canonical
        .full_name()
        .eq_ignore_ascii_case(&identifier.full_name())
    {
        return Err(ImportError::validation(format!(
            "{identifier}: catalog returned a different extension ({canonical})"
        )));
    }

    ExtensionRecord::from_parts(
        &canonical,
        RecordParts {
            extension_id: raw.extension_id,
            extension_name: raw.extension_name,
            display_name: raw.display_name,
            short_description: raw.short_description,
            versions: raw
                .versions
                .into_iter()
                .map(|v| VersionEntry {
                    version: v.version,
                    last_updated: v.last_updated,
                })
                .collect(),
            categories: raw.categories.unwrap_or_default(),
            tags: raw.tags.unwrap_or_default(),
        },
    )
}

// ── MarketplaceClient ────────────────────────────────────────────────────

pub(crate) struct MarketplaceClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl MarketplaceClient {
    pub(crate) fn new(endpoint: &str, user_agent: &str, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Package URL on the same gallery the query endpoint belongs to.
    pub(crate) fn package_url(&self, identifier: &ExtensionIdentifier, version: &str) -> Result<String> {
        let base = url::Url::parse(&self.endpoint)
            .map_err(|e| ImportError::Config(format!("invalid endpoint {:?}: {e}", self.endpoint)))?;
        let url = base.join(&identifier.package_path(version)).map_err(|e| {
            ImportError::validation(format!("{identifier}: cannot build package URL: {e}"))
        })?;
        Ok(url.to_string())
    }

    /// GET `url` and stream the body into `dest`. The file only appears once
    /// the whole body has been written; a failed transfer leaves nothing behind.
    pub(crate) fn download_package(
        &self,
        identifier: &ExtensionIdentifier,
        url: &str,
        dest: &Path,
    ) -> Result<u64> {
        tracing::debug!(%identifier, %url, "downloading package");
        let response = match self.agent.get(url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(Self::transient(identifier, format!("package status {code}")));
            }
            Err(err) => return Err(Self::transient(identifier, err.to_string())),
        };

        let tmp = dest.with_extension("vsix.part");
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                let bytes = io::copy(&mut response.into_reader(), &mut file)?;
                file.sync_all()?;
                Ok(bytes)
            })
            .and_then(|bytes| fs::rename(&tmp, dest).map(|()| bytes));
        match written {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                Err(Self::transient(identifier, format!("package transfer: {err}")))
            }
        }
    }

    fn transient(identifier: &ExtensionIdentifier, message: String) -> ImportError {
        ImportError::Transient {
            identifier: identifier.to_string(),
            message,
        }
    }
}

impl ExtensionSource for MarketplaceClient {
    fn fetch_extension_info(&self, identifier: &str) -> Result<ExtensionRecord> {
        let identifier = ExtensionIdentifier::parse(identifier)?;
        tracing::debug!(%identifier, endpoint = %self.endpoint, "querying marketplace");

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", ACCEPT_HEADER)
            .send_json(build_query(&identifier));

        match response {
            Ok(resp) => {
                let body = resp
                    .into_string()
                    .map_err(|e| Self::transient(&identifier, format!("reading body: {e}")))?;
                parse_query_response(&identifier, &body)
            }
            Err(ureq::Error::Status(code, resp)) => {
                let text: String = resp
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(ERROR_BODY_CHARS)
                    .collect();
                Err(Self::transient(&identifier, format!("status {code}: {text}")))
            }
            Err(err) => Err(Self::transient(&identifier, err.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{catalog_body, empty_body, serve};
    use super::*;

    fn id(raw: &str) -> ExtensionIdentifier {
        ExtensionIdentifier::parse(raw).unwrap()
    }

    #[test]
    fn query_shape() {
        let query = build_query(&id("ms-python.python"));
        let filter = &query["filters"][0];
        assert_eq!(filter["criteria"][0]["filterType"], 8);
        assert_eq!(filter["criteria"][0]["value"], TARGET_PRODUCT);
        assert_eq!(filter["criteria"][1]["filterType"], 7);
        assert_eq!(filter["criteria"][1]["value"], "ms-python.python");
        assert_eq!(filter["pageSize"], 2);
        assert_eq!(query["flags"], 5);
    }

    #[test]
    fn parses_three_versions() {
        let body = catalog_body("ms-python", "python", &["2024.3.0", "2024.2.1", "2024.2.0"]);
        let rec = parse_query_response(&id("ms-python.python"), &body).unwrap();
        assert_eq!(rec.version_history.len(), 3);
        assert_eq!(rec.latest_version, "2024.3.0");
        assert_eq!(rec.latest_version, rec.version_history[0].version);
        assert_eq!(rec.filename, "ms-python.python-2024.3.0.vsix");
        assert_eq!(rec.tags, vec!["__ext_py", "__web_extension"]);
        assert_eq!(rec.categories.len(), 2);
    }

    #[test]
    fn keeps_six_newest_versions() {
        let versions = ["9", "8", "7", "6", "5", "4", "3", "2"];
        let body = catalog_body("pub", "ext", &versions);
        let rec = parse_query_response(&id("pub.ext"), &body).unwrap();
        let kept: Vec<_> = rec.version_history.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(kept, vec!["9", "8", "7", "6", "5", "4"]);
    }

    #[test]
    fn uses_catalog_casing() {
        let body = catalog_body("ms-python", "python", &["1.0.0"]);
        let rec = parse_query_response(&id("MS-Python.Python"), &body).unwrap();
        assert_eq!(rec.extension_full_name, "ms-python.python");
    }

    #[test]
    fn empty_results_are_not_found() {
        let err = parse_query_response(&id("pub.ext"), &empty_body()).unwrap_err();
        assert!(matches!(err, ImportError::NotFound { .. }));
        let err = parse_query_response(&id("pub.ext"), r#"{"results": []}"#).unwrap_err();
        assert!(matches!(err, ImportError::NotFound { .. }));
    }

    #[test]
    fn missing_versions_is_validation() {
        let body = catalog_body("pub", "ext", &[]);
        let err = parse_query_response(&id("pub.ext"), &body).unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
        let err = parse_query_response(&id("pub.ext"), "not json").unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[test]
    fn fetch_over_http() {
        let (endpoint, server) = serve(vec![(
            200,
            catalog_body("redhat", "vscode-yaml", &["1.14.0", "1.13.0"]),
        )]);
        let client = MarketplaceClient::new(&endpoint, DEFAULT_USER_AGENT, None);
        let rec = client.fetch_extension_info("redhat.vscode-yaml").unwrap();
        assert_eq!(rec.extension_full_name, "redhat.vscode-yaml");
        assert_eq!(rec.latest_version, "1.14.0");

        let captured = server.join().unwrap();
        assert_eq!(captured[0].accept.as_deref(), Some(ACCEPT_HEADER));
        assert_eq!(
            captured[0].body["filters"][0]["criteria"][1]["value"],
            "redhat.vscode-yaml"
        );
    }

    #[test]
    fn http_errors_are_transient() {
        let (endpoint, server) = serve(vec![
            (503, "unavailable".to_string()),
            (200, empty_body()),
        ]);
        let client = MarketplaceClient::new(&endpoint, DEFAULT_USER_AGENT, None);
        let err = client.fetch_extension_info("pub.ext").unwrap_err();
        match err {
            ImportError::Transient { identifier, message } => {
                assert_eq!(identifier, "pub.ext");
                assert!(message.contains("503"));
            }
            other => panic!("expected transient, got {other:?}"),
        }
        let err = client.fetch_extension_info("pub.ext").unwrap_err();
        assert!(matches!(err, ImportError::NotFound { .. }));
        server.join().unwrap();
    }

    #[test]
    fn package_url_matches_record_download_url() {
        let client = MarketplaceClient::new(DEFAULT_QUERY_ENDPOINT, DEFAULT_USER_AGENT, None);
        let ext = id("ms-python.python");
        assert_eq!(
            client.package_url(&ext, "2024.3.0+b1").unwrap(),
            ext.download_url("2024.3.0+b1")
        );

        let local = MarketplaceClient::new("http://127.0.0.1:1/gallery/extensionquery", DEFAULT_USER_AGENT, None);
        assert_eq!(
            local.package_url(&ext, "1.0.0").unwrap(),
            "http://127.0.0.1:1/gallery/publishers/ms-python/vsextensions/python/1.0.0/vspackage"
        );
    }

    #[test]
    fn failed_package_transfer_leaves_no_file() {
        let (endpoint, server) = serve(vec![(404, "gone".to_string())]);
        let client = MarketplaceClient::new(&endpoint, DEFAULT_USER_AGENT, None);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pub.ext-1.0.0.vsix");
        let ext = id("pub.ext");
        let url = client.package_url(&ext, "1.0.0").unwrap();

        let err = client.download_package(&ext, &url, &dest).unwrap_err();
        assert!(matches!(err, ImportError::Transient { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        server.join().unwrap();
    }

    #[test]
    fn bad_identifier_never_hits_network() {
        let client = MarketplaceClient::new("http://127.0.0.1:9/unused", DEFAULT_USER_AGENT, None);
        let err = client.fetch_extension_info("not-an-identifier").unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[test]
    fn connection_refused_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = MarketplaceClient::new(
            &format!("http://127.0.0.1:{port}/q"),
            DEFAULT_USER_AGENT,
            Some(Duration::from_secs(5)),
        );
        let err = client.fetch_extension_info("pub.ext").unwrap_err();
        assert!(matches!(err, ImportError::Transient { .. }));
    }
}
