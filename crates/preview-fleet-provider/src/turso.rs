//! Turso Platform API client used for per-environment database branches.
//!
//! A branch is a new database seeded from the parent database, plus an access
//! token scoped to it.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::types::{DatabaseBranch, DeleteOutcome, TursoConfig};

#[derive(Debug, Serialize)]
struct CreateDatabase<'a> {
    name: &'a str,
    group: &'a str,
    seed: Seed<'a>,
}

#[derive(Debug, Serialize)]
struct Seed<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DatabaseEnvelope {
    database: Database,
}

#[derive(Debug, Deserialize)]
struct DatabaseList {
    databases: Vec<Database>,
}

#[derive(Debug, Deserialize)]
struct Database {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Hostname", default)]
    hostname: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    jwt: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Client for one Turso organization.
#[derive(Debug, Clone)]
pub struct TursoClient {
    client: Client,
    config: TursoConfig,
}

impl TursoClient {
    /// Create a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: TursoConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, config })
    }

    /// The organization configuration.
    #[must_use]
    pub fn config(&self) -> &TursoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/organizations/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.organization,
            path
        )
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.bearer_auth(&self.config.api_token).send().await?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| ProviderError::Api {
                status: status.as_u16(),
                message: format!("unexpected response for {what}: {e}"),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(what.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map_or_else(|_| body.trim().to_string(), |e| e.error);
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Create a branch of the parent database, or reuse an existing one with
    /// the same name, and mint a token for it.
    ///
    /// # Errors
    ///
    /// Returns an error if any API call fails.
    pub async fn create_branch(&self, name: &str) -> Result<DatabaseBranch> {
        let body = CreateDatabase {
            name,
            group: &self.config.group,
            seed: Seed {
                kind: "database",
                name: &self.config.parent_database,
            },
        };

        let created = self
            .send::<DatabaseEnvelope>(
                self.client.post(self.url("databases")).json(&body),
                "create database",
            )
            .await;

        let database = match created {
            Ok(envelope) => envelope.database,
            Err(ProviderError::Api { status: 409, .. }) => {
                tracing::debug!(database = %name, "Database branch already exists, reusing it");
                self.send::<DatabaseEnvelope>(
                    self.client.get(self.url(&format!("databases/{name}"))),
                    "get database",
                )
                .await?
                .database
            }
            Err(e) => return Err(e),
        };

        let token = self
            .send::<TokenResponse>(
                self.client
                    .post(self.url(&format!("databases/{name}/auth/tokens")))
                    .query(&[("expiration", self.config.token_expiration.as_str())]),
                "create database token",
            )
            .await?;

        Ok(DatabaseBranch {
            url: format!("libsql://{}", database.hostname),
            name: database.name,
            token: token.jwt,
        })
    }

    /// Destroy a branch database.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn destroy_branch(&self, name: &str) -> Result<DeleteOutcome> {
        match self
            .send::<serde::de::IgnoredAny>(
                self.client.delete(self.url(&format!("databases/{name}"))),
                "database",
            )
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ProviderError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// List database names in the organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let list = self
            .send::<DatabaseList>(self.client.get(self.url("databases")), "list databases")
            .await?;
        Ok(list.databases.into_iter().map(|db| db.name).collect())
    }
}
