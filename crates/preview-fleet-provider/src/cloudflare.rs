//! Cloudflare API v4 client for KV namespaces and Workers.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ProviderError, Result};
use crate::types::{CloudflareConfig, DeleteOutcome, KvNamespace, WorkerConfig};

const KV_PAGE_SIZE: u32 = 100;
const MAIN_MODULE: &str = "worker.js";

/// The `{success, errors, result, result_info}` envelope every v4 response uses.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    #[serde(default)]
    total_pages: Option<u32>,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct WorkerScript {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SubdomainStatus {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct CreateNamespace<'a> {
    title: &'a str,
}

/// Client for the Cloudflare account that hosts preview workers.
#[derive(Debug, Clone)]
pub struct CloudflareClient {
    client: Client,
    config: CloudflareConfig,
}

impl CloudflareClient {
    /// Create a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: CloudflareConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, config })
    }

    /// The account configuration.
    #[must_use]
    pub fn config(&self) -> &CloudflareConfig {
        &self.config
    }

    fn account_url(&self, path: &str) -> String {
        format!(
            "{}/accounts/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_id,
            path
        )
    }

    /// Send a request and unwrap the envelope.
    ///
    /// A 404 becomes [`ProviderError::NotFound`] carrying `what`.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<(Option<T>, Option<ResultInfo>)> {
        let response = request.bearer_auth(&self.config.api_token).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(what.to_string()));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                ProviderError::Api {
                    status: status.as_u16(),
                    message: format!("unexpected response for {what}: {e}"),
                }
            } else {
                ProviderError::Api {
                    status: status.as_u16(),
                    message: body.trim().to_string(),
                }
            }
        })?;

        if !status.is_success() || !envelope.success {
            let message = if envelope.errors.is_empty() {
                format!("{what} failed")
            } else {
                envelope
                    .errors
                    .iter()
                    .map(|e| format!("{} ({})", e.message, e.code))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            tracing::debug!(status = %status, %message, "Cloudflare API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok((envelope.result, envelope.result_info))
    }

    async fn delete(&self, url: String, what: &str) -> Result<DeleteOutcome> {
        match self
            .send::<IgnoredAny>(self.client.delete(url), what)
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ProviderError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Create a KV namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_kv_namespace(&self, title: &str) -> Result<KvNamespace> {
        let url = self.account_url("storage/kv/namespaces");
        let (result, _) = self
            .send::<KvNamespace>(
                self.client.post(url).json(&CreateNamespace { title }),
                "create KV namespace",
            )
            .await?;
        let namespace = result.ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "create KV namespace returned no result".into(),
        })?;
        tracing::debug!(id = %namespace.id, title = %namespace.title, "Created KV namespace");
        Ok(namespace)
    }

    /// Delete a KV namespace by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_kv_namespace(&self, id: &str) -> Result<DeleteOutcome> {
        let url = self.account_url(&format!("storage/kv/namespaces/{id}"));
        self.delete(url, "KV namespace").await
    }

    /// List all KV namespaces, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn list_kv_namespaces(&self) -> Result<Vec<KvNamespace>> {
        let mut namespaces = Vec::new();
        let mut page = 1u32;

        loop {
            let url = self.account_url("storage/kv/namespaces");
            let request = self.client.get(url).query(&[
                ("page", page.to_string()),
                ("per_page", KV_PAGE_SIZE.to_string()),
            ]);
            let (result, info) = self
                .send::<Vec<KvNamespace>>(request, "list KV namespaces")
                .await?;
            let batch = result.unwrap_or_default();
            let fetched = u32::try_from(batch.len()).unwrap_or(u32::MAX);
            namespaces.extend(batch);

            let more = match info {
                Some(ResultInfo {
                    page: current,
                    total_pages: Some(total),
                    ..
                }) => current < total,
                Some(ResultInfo { count, .. }) => count >= KV_PAGE_SIZE,
                None => fetched >= KV_PAGE_SIZE,
            };
            if !more {
                break;
            }
            page += 1;
        }

        Ok(namespaces)
    }

    /// Metadata part of the script upload.
    fn upload_metadata(&self, config: &WorkerConfig) -> Value {
        let mut bindings = Vec::new();
        for (name, namespace_id) in &config.kv_bindings {
            bindings.push(json!({
                "type": "kv_namespace",
                "name": name,
                "namespace_id": namespace_id,
            }));
        }
        for (name, text) in &config.vars {
            bindings.push(json!({ "type": "plain_text", "name": name, "text": text }));
        }
        for (name, text) in &config.secrets {
            bindings.push(json!({ "type": "secret_text", "name": name, "text": text }));
        }

        json!({
            "main_module": MAIN_MODULE,
            "compatibility_date": self.config.compatibility_date,
            "bindings": bindings,
        })
    }

    /// Upload a worker module and enable its workers.dev route.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be read or either API call fails.
    pub async fn deploy_worker(&self, name: &str, config: &WorkerConfig) -> Result<()> {
        let script = tokio::fs::read(&self.config.script_path).await?;
        let metadata = self.upload_metadata(config);

        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string()).mime_str("application/json")?,
            )
            .part(
                MAIN_MODULE,
                Part::bytes(script)
                    .file_name(MAIN_MODULE)
                    .mime_str("application/javascript+module")?,
            );

        let url = self.account_url(&format!("workers/scripts/{name}"));
        self.send::<IgnoredAny>(self.client.put(url).multipart(form), "upload worker")
            .await?;

        let url = self.account_url(&format!("workers/scripts/{name}/subdomain"));
        self.send::<IgnoredAny>(
            self.client.post(url).json(&json!({ "enabled": true })),
            "enable worker route",
        )
        .await?;

        tracing::debug!(worker = %name, "Deployed worker");
        Ok(())
    }

    /// Delete a worker script.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_worker(&self, name: &str) -> Result<DeleteOutcome> {
        let url = self.account_url(&format!("workers/scripts/{name}"));
        self.delete(url, "worker").await
    }

    /// List deployed worker script names.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list_workers(&self) -> Result<Vec<String>> {
        let url = self.account_url("workers/scripts");
        let (result, _) = self
            .send::<Vec<WorkerScript>>(self.client.get(url), "list workers")
            .await?;
        Ok(result
            .unwrap_or_default()
            .into_iter()
            .map(|script| script.id)
            .collect())
    }

    /// Whether the worker's workers.dev route is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails for any reason other than the
    /// worker being absent.
    pub async fn verify_route(&self, name: &str) -> Result<bool> {
        let url = self.account_url(&format!("workers/scripts/{name}/subdomain"));
        match self
            .send::<SubdomainStatus>(self.client.get(url), "worker route")
            .await
        {
            Ok((result, _)) => Ok(result.is_some_and(|s| s.enabled)),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
