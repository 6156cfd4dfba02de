// Async HTTP client for the Stratus compute API.
//
// Base path: /v1/
// Auth: Authorization: Bearer <token>

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types::{
    AttachmentTarget, CreateInstanceRequest, FloatingIpResponse, InstanceResponse,
    UpdateInstanceRequest,
};

// ── Error response shape from the compute API ────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the compute control plane.
///
/// Uses bearer-token authentication and JSON REST endpoints under `/v1/`.
/// The client performs no retries; callers own retry policy.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ComputeClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an API token and transport config.
    ///
    /// Injects `Authorization: Bearer …` as a default header on every request.
    pub fn from_token(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| Error::InvalidToken)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client_with_headers(headers)?;
        let base_url = Self::normalize_base_url(base_url)?;

        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with a slash so relative joins keep its path.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Append `segments` to the base URL. Each segment is percent-encoded,
    /// so an id containing `/` or `?` stays a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        Self::handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        Self::handle_response(resp).await
    }

    async fn post_no_response<B: Serialize + Sync>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        Self::handle_empty(resp).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("PATCH {url}");

        let resp = self.http.patch(url).json(body).send().await?;
        Self::handle_response(resp).await
    }

    async fn delete(&self, path: &[&str]) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("DELETE {url}");

        let resp = self.http.delete(url).send().await?;
        Self::handle_empty(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Error::InvalidToken;
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Error::RateLimited { retry_after_secs };
        }

        let raw = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorResponse>(&raw).ok();

        let (message, code) = match parsed {
            Some(err) => (
                err.message.unwrap_or_else(|| status.to_string()),
                err.code,
            ),
            None if raw.is_empty() => (status.to_string(), None),
            None => (raw, None),
        };

        if status == reqwest::StatusCode::FORBIDDEN {
            return Error::Forbidden { message };
        }

        Error::Api {
            message,
            code,
            status: status.as_u16(),
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    // ── Instances ────────────────────────────────────────────────────

    pub async fn create_instance(
        &self,
        body: &CreateInstanceRequest,
    ) -> Result<InstanceResponse, Error> {
        self.post(&["v1", "instances"], body).await
    }

    pub async fn get_instance(&self, id: &str) -> Result<InstanceResponse, Error> {
        self.get(&["v1", "instances", id]).await
    }

    pub async fn update_instance(
        &self,
        id: &str,
        body: &UpdateInstanceRequest,
    ) -> Result<InstanceResponse, Error> {
        self.patch(&["v1", "instances", id], body).await
    }

    /// Delete an instance. Deleting an instance that no longer exists
    /// succeeds.
    pub async fn delete_instance(&self, id: &str) -> Result<(), Error> {
        match self.delete(&["v1", "instances", id]).await {
            Err(e) if e.is_not_found() => {
                debug!(instance_id = id, "instance already absent");
                Ok(())
            }
            other => other,
        }
    }

    // ── Floating IPs ─────────────────────────────────────────────────

    pub async fn get_floating_ip(&self, id: &str) -> Result<FloatingIpResponse, Error> {
        self.get(&["v1", "floating-ips", id]).await
    }

    pub async fn associate_floating_ip(
        &self,
        id: &str,
        target: &AttachmentTarget,
    ) -> Result<(), Error> {
        self.post_no_response(&["v1", "floating-ips", id, "associate"], target)
            .await
    }

    pub async fn disassociate_floating_ip(&self, id: &str) -> Result<(), Error> {
        self.post_no_response(
            &["v1", "floating-ips", id, "disassociate"],
            &serde_json::json!({}),
        )
        .await
    }
}
