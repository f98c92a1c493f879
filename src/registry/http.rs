// src/registry/http.rs

//! HTTP registry client
//!
//! Endpoints (relative to the base URL):
//! - `GET    systems/<name>`                  version metadata
//! - `PUT    systems/<name>/<version>`        publish `{descriptor, tarball}`
//! - `PUT    systems/<name>/owners/<user>`    add owner
//! - `DELETE systems/<name>/owners/<user>`    remove owner
//! - `GET    configs`                         list config set names
//! - `GET|PUT|DELETE configs/<name>`          config sets

use super::{ConfigMap, Registry};
use crate::error::{Error, Result};
use crate::system::{SystemDescriptor, SystemMetadata};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for idempotent requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))
}

/// Send a request, retrying transport failures with a linear backoff
fn send_with_retry(what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match build().send() {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(Error::DownloadError(format!(
                        "{what} failed after {attempt} attempts: {e}"
                    )));
                }
                warn!("{} attempt {} failed: {}, retrying...", what, attempt, e);
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
            }
        }
    }
}

/// Download `url` to `dest` through a temp file and rename
pub fn download_file(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {} to {}", url, dest.display());
    let client = build_client()?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let mut response = send_with_retry(url, || client.get(url))?;
    if !response.status().is_success() {
        return Err(Error::DownloadError(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }

    let temp_path = dest.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .map_err(|e| Error::IoError(format!("Failed to create file {}: {e}", temp_path.display())))?;
    io::copy(&mut response, &mut file)
        .map_err(|e| Error::IoError(format!("Failed to write downloaded data: {e}")))?;

    fs::rename(&temp_path, dest).map_err(|e| {
        Error::IoError(format!(
            "Failed to move {} to {}: {e}",
            temp_path.display(),
            dest.display()
        ))
    })?;
    Ok(())
}

#[derive(Serialize)]
struct PublishBody<'a> {
    descriptor: &'a SystemDescriptor,
    /// Base64-encoded gzip tarball
    tarball: String,
}

/// Registry client over blocking HTTP
pub struct HttpRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRegistry {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a non-success status to an error; 404 becomes `NotFound(what)`
    fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::DownloadError(format!(
                "HTTP {} for {}: {}",
                status,
                what,
                body.trim()
            )));
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = send_with_retry(&url, || self.authorized(self.client.get(&url)))?;
        Self::check(response, what)?
            .json()
            .map_err(|e| Error::ParseError(format!("Invalid JSON from {}: {e}", url)))
    }

    fn put_json<B: Serialize>(&self, path: &str, body: &B, what: &str) -> Result<()> {
        let url = self.url(path);
        debug!("PUT {}", url);
        let response = self
            .authorized(self.client.put(&url).json(body))
            .send()
            .map_err(|e| Error::DownloadError(format!("PUT {} failed: {e}", url)))?;
        Self::check(response, what).map(|_| ())
    }

    fn delete(&self, path: &str, what: &str) -> Result<()> {
        let url = self.url(path);
        debug!("DELETE {}", url);
        let response = self
            .authorized(self.client.delete(&url))
            .send()
            .map_err(|e| Error::DownloadError(format!("DELETE {} failed: {e}", url)))?;
        Self::check(response, what).map(|_| ())
    }
}

impl Registry for HttpRegistry {
    fn get_system(&self, name: &str) -> Result<SystemMetadata> {
        self.get_json(&format!("systems/{}", name), name)
    }

    fn get_config(&self, name: &str) -> Result<ConfigMap> {
        self.get_json(&format!("configs/{}", name), &format!("config set {}", name))
    }

    fn set_config(&self, name: &str, config: &ConfigMap) -> Result<()> {
        self.put_json(&format!("configs/{}", name), config, name)
    }

    fn delete_config(&self, name: &str) -> Result<()> {
        self.delete(&format!("configs/{}", name), &format!("config set {}", name))
    }

    fn list_configs(&self) -> Result<Vec<String>> {
        self.get_json("configs", "config sets")
    }

    fn publish(&self, descriptor: &SystemDescriptor, tarball: &Path) -> Result<()> {
        let bytes = fs::read(tarball)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", tarball.display())))?;
        info!(
            "Publishing {}@{} ({} bytes)",
            descriptor.name,
            descriptor.version,
            bytes.len()
        );
        let body = PublishBody {
            descriptor,
            tarball: STANDARD.encode(bytes),
        };
        self.put_json(
            &format!("systems/{}/{}", descriptor.name, descriptor.version),
            &body,
            &descriptor.name,
        )
    }

    fn add_owner(&self, system: &str, user: &str) -> Result<()> {
        self.put_json(
            &format!("systems/{}/owners/{}", system, user),
            &serde_json::json!({}),
            system,
        )
    }

    fn remove_owner(&self, system: &str, user: &str) -> Result<()> {
        self.delete(&format!("systems/{}/owners/{}", system, user), system)
    }
}
