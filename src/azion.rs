//! Azion Digital Certificate API Client
//!
//! Wraps the v3 REST API: token exchange plus find/create/update of
//! digital certificates. `upsert_certificate` is the entry point the
//! sync workflow uses; the individual calls classify their own failures.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::cert_manager::CertificateData;
use crate::error::SyncError;

const AZION_API_BASE: &str = "https://api.azionapi.net";
const ACCEPT_V3: &str = "application/json; version=3";

/// Azion API credentials, exchanged once per run for a short-lived token
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A digital certificate as returned by the Azion list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DigitalCertificate {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CertificateListResponse {
    results: Vec<DigitalCertificate>,
}

#[derive(Debug, Deserialize)]
struct CreateCertificateResponse {
    results: CreatedCertificate,
}

#[derive(Debug, Deserialize)]
struct CreatedCertificate {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateCertificateRequest<'a> {
    name: &'a str,
    certificate: &'a str,
    private_key: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateCertificateRequest<'a> {
    certificate: &'a str,
    private_key: &'a str,
}

/// Error body shape of the Azion API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Azion API client
pub struct AzionClient {
    http: Client,
    base_url: String,
}

impl AzionClient {
    /// Create a client against the production Azion API
    pub fn new() -> Result<Self> {
        Self::with_base_url(AZION_API_BASE)
    }

    /// Create a client against a specific endpoint (used by tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Ensure a certificate with this name exists on Azion with the given
    /// material, creating or updating as needed, and return its id.
    ///
    /// The name lookup is re-evaluated fresh on every call; no
    /// compare-and-swap is performed against concurrent writers.
    pub async fn upsert_certificate(
        &self,
        name: &str,
        data: &CertificateData,
        credentials: &Credentials,
    ) -> Result<u64, SyncError> {
        let token = self
            .get_token(credentials)
            .await
            .map_err(|e| SyncError::Authentication(format!("{e:#}")))?
            .ok_or(SyncError::InvalidCredentials)?;
        debug!("Authenticated to Azion");

        let existing = self
            .get_certificate_by_name(name, &token)
            .await
            .map_err(SyncError::Transport)?;

        match existing {
            None => {
                info!(name = %name, "Creating Azion digital certificate");
                self.create_certificate(name, data, &token)
                    .await
                    .map_err(|e| SyncError::Create(format!("{e:#}")))
            }
            Some(existing) => {
                info!(name = %name, id = existing.id, "Updating Azion digital certificate");
                self.update_certificate(existing.id, data, &token)
                    .await
                    .map_err(|e| SyncError::Update {
                        id: existing.id,
                        reason: format!("{e:#}"),
                    })?;
                Ok(existing.id)
            }
        }
    }

    /// Exchange the credentials for a short-lived token.
    ///
    /// A 400/401/403 response means the credentials were rejected and is
    /// reported as `None`, not as an error.
    async fn get_token(&self, credentials: &Credentials) -> Result<Option<String>> {
        let response = self
            .http
            .post(format!("{}/tokens", self.base_url))
            .header(header::ACCEPT, ACCEPT_V3)
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", basic_token(credentials)),
            )
            .send()
            .await
            .context("Failed to call the Azion token endpoint")?;

        let status = response.status();
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("{}", api_error_reason(status, response).await);
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("Failed to parse the Azion token response")?;
        Ok(Some(body.token))
    }

    async fn get_certificate_by_name(
        &self,
        name: &str,
        token: &str,
    ) -> Result<Option<DigitalCertificate>> {
        let url = format!(
            "{}/digital_certificates?name={}",
            self.base_url,
            urlencoding::encode(name)
        );

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, ACCEPT_V3)
            .header(header::AUTHORIZATION, token_auth(token))
            .send()
            .await
            .context("Failed to query Azion certificates")?;

        let status = response.status();
        if !status.is_success() {
            bail!("{}", api_error_reason(status, response).await);
        }

        let body: CertificateListResponse = response
            .json()
            .await
            .context("Failed to parse the Azion certificate list")?;
        Ok(exact_match(body.results, name))
    }

    async fn create_certificate(
        &self,
        name: &str,
        data: &CertificateData,
        token: &str,
    ) -> Result<u64> {
        let response = self
            .http
            .post(format!("{}/digital_certificates", self.base_url))
            .header(header::ACCEPT, ACCEPT_V3)
            .header(header::AUTHORIZATION, token_auth(token))
            .json(&CreateCertificateRequest {
                name,
                certificate: &data.crt,
                private_key: &data.key,
            })
            .send()
            .await
            .context("Failed to call the Azion certificate create endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("{}", api_error_reason(status, response).await);
        }

        let body: CreateCertificateResponse = response
            .json()
            .await
            .context("Failed to parse the Azion certificate create response")?;
        Ok(body.results.id)
    }

    async fn update_certificate(&self, id: u64, data: &CertificateData, token: &str) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/digital_certificates/{id}", self.base_url))
            .header(header::ACCEPT, ACCEPT_V3)
            .header(header::AUTHORIZATION, token_auth(token))
            .json(&UpdateCertificateRequest {
                certificate: &data.crt,
                private_key: &data.key,
            })
            .send()
            .await
            .context("Failed to call the Azion certificate update endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("{}", api_error_reason(status, response).await);
        }

        Ok(())
    }
}

/// HTTP Basic framing of `username:password`
fn basic_token(credentials: &Credentials) -> String {
    BASE64.encode(format!("{}:{}", credentials.username, credentials.password))
}

fn token_auth(token: &str) -> String {
    format!("token {token}")
}

/// The name filter of the list endpoint can prefix-match; only a trailing
/// entry whose name matches exactly counts as present.
fn exact_match(mut results: Vec<DigitalCertificate>, name: &str) -> Option<DigitalCertificate> {
    results.pop().filter(|certificate| certificate.name == name)
}

/// Prefer the server-supplied `detail` text over the raw status + body.
async fn api_error_reason(status: StatusCode, response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: Some(detail),
        }) => detail,
        _ => format!("Azion API error {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn certificate(id: u64, name: &str) -> DigitalCertificate {
        DigitalCertificate {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn exact_match_takes_the_trailing_entry() {
        let results = vec![certificate(1, "site-old"), certificate(2, "site")];
        let found = exact_match(results, "site").unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn exact_match_rejects_a_prefix_decoy() {
        let results = vec![certificate(1, "site-old")];
        assert!(exact_match(results, "site").is_none());
    }

    #[test]
    fn exact_match_of_no_results_is_absent() {
        assert!(exact_match(Vec::new(), "site").is_none());
    }

    #[test]
    fn create_request_uses_the_wire_field_names() {
        let request = CreateCertificateRequest {
            name: "web-cert",
            certificate: "CRTDATA",
            private_key: "KEYDATA",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"name": "web-cert", "certificate": "CRTDATA", "private_key": "KEYDATA"})
        );
    }

    #[test]
    fn update_request_omits_the_name() {
        let request = UpdateCertificateRequest {
            certificate: "CRTDATA",
            private_key: "KEYDATA",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"certificate": "CRTDATA", "private_key": "KEYDATA"})
        );
    }

    #[test]
    fn basic_token_is_base64_of_the_credential_pair() {
        let credentials = Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(basic_token(&credentials), "dXNlcjpwYXNz");
    }
}
