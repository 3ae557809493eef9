//! Repository gateway client over HTTP.
//!
//! Every request carries the importing user's session token as a bearer token.
//!
//! Endpoints used:
//! - `GET  api/session`
//! - `GET|POST api/projects`, `GET|POST api/projects/{id}/datasets`
//! - `GET  api/containers/{id}`
//! - `GET  api/datasets/{id}/images`, `GET api/images/{id}`
//! - `POST api/images/{id}/attachments`
//! - `POST api/import/filesets`, `PUT .../{handle}/files/{index}?offset=`,
//!   `POST .../{handle}/verify`, `DELETE .../{handle}`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::catalog::{CatalogClient, ContainerLocks, ObjectId, same_second};
use super::remote::{
    Destination, FilesetSpec, RemoteError, RemoteObject, RemoteRepository, Repository,
    RepositoryConnector, UploadTarget,
};
use crate::error::ImportError;
use crate::models::metadata::parse_acquisition_date;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Name of the header carrying an attachment's file name.
pub const ATTACHMENT_NAME_HEADER: &str = "X-File-Name";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDto {
    pub id: ObjectId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDto {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub acquisition_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFilesetRequest {
    pub fileset: FilesetSpec,
    pub destination: Destination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFilesetResponse {
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub digests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub objects: Vec<RemoteObject>,
}

fn build_http_client() -> Result<reqwest::Client, ImportError> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ImportError::RemoteConnection(format!("failed to build HTTP client: {}", e)))
}

/// Opens [`HttpRepository`] sessions. Holds the container locks shared by all sessions.
pub struct HttpRepositoryConnector {
    base: Url,
    client: reqwest::Client,
    locks: ContainerLocks,
}

impl HttpRepositoryConnector {
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| {
            ImportError::RemoteConnection(format!("invalid repository URL '{}': {}", base_url, e))
        })?;

        Ok(Self {
            base,
            client: build_http_client()?,
            locks: ContainerLocks::new(),
        })
    }

    pub fn locks(&self) -> &ContainerLocks {
        &self.locks
    }
}

#[async_trait]
impl RepositoryConnector for HttpRepositoryConnector {
    async fn connect(&self, session: &SecretString) -> Result<Arc<dyn Repository>, ImportError> {
        if session.expose_secret().trim().is_empty() {
            return Err(ImportError::RemoteConnection(
                "missing repository session token".to_string(),
            ));
        }

        let repo = HttpRepository {
            base: self.base.clone(),
            client: self.client.clone(),
            token: SecretString::from(session.expose_secret().to_string()),
            locks: self.locks.clone(),
        };

        let response = repo
            .authorized(repo.client.get(repo.url("api/session")?))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(ImportError::RemoteConnection(format!(
                "repository refused the session: HTTP {}",
                response.status()
            )));
        }

        Ok(Arc::new(repo))
    }
}

/// One user's session against the repository gateway.
pub struct HttpRepository {
    base: Url,
    client: reqwest::Client,
    token: SecretString,
    locks: ContainerLocks,
}

fn transport_error(err: reqwest::Error) -> ImportError {
    ImportError::RemoteConnection(err.to_string())
}

impl HttpRepository {
    fn url(&self, path: &str) -> Result<Url, ImportError> {
        self.base
            .join(path)
            .map_err(|e| ImportError::RemoteConnection(format!("invalid path {}: {}", path, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.token.expose_secret())
    }

    /// Send and decode, mapping HTTP failures to catalog errors.
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>, ImportError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImportError::Catalog(format!(
                "{} failed: HTTP {} {}",
                what, status, body
            )));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ImportError::Catalog(format!("{}: invalid response: {}", what, e)))
    }

    fn containers_path(parent: Option<ObjectId>) -> String {
        match parent {
            Some(project) => format!("api/projects/{}/datasets", project),
            None => "api/projects".to_string(),
        }
    }

    async fn image(&self, image: ObjectId) -> Result<Option<ImageDto>, ImportError> {
        let url = self.url(&format!("api/images/{}", image))?;
        self.fetch(self.client.get(url), "image lookup").await
    }
}

#[async_trait]
impl CatalogClient for HttpRepository {
    async fn get_or_create_container(
        &self,
        name: &str,
        parent: Option<ObjectId>,
    ) -> Result<ObjectId, ImportError> {
        let _guard = self.locks.lock(&ContainerLocks::key(name, parent)).await;

        let path = Self::containers_path(parent);
        let mut url = self.url(&path)?;
        url.query_pairs_mut().append_pair("name", name);

        let existing: Vec<ContainerDto> = self
            .fetch(self.client.get(url), "container lookup")
            .await?
            .unwrap_or_default();
        if let Some(found) = existing.into_iter().find(|c| c.name == name) {
            return Ok(found.id);
        }

        let created: ContainerDto = self
            .fetch(
                self.client
                    .post(self.url(&path)?)
                    .json(&serde_json::json!({ "name": name })),
                "container creation",
            )
            .await?
            .ok_or_else(|| ImportError::Catalog(format!("cannot create container {}", name)))?;

        info!(container = %name, id = created.id, parent = ?parent, "Created container");
        Ok(created.id)
    }

    async fn find_by_name_prefix(
        &self,
        name: &str,
        container: ObjectId,
    ) -> Result<Option<ObjectId>, ImportError> {
        let url = self.url(&format!("api/datasets/{}/images", container))?;
        let images: Vec<ImageDto> = self
            .fetch(self.client.get(url), "image listing")
            .await?
            .unwrap_or_default();

        Ok(images
            .into_iter()
            .find(|image| image.name.starts_with(name))
            .map(|image| image.id))
    }

    async fn compare_timestamp(
        &self,
        object: ObjectId,
        acquired_at: &NaiveDateTime,
    ) -> Result<bool, ImportError> {
        let stored = self
            .image(object)
            .await?
            .and_then(|image| image.acquisition_date)
            .and_then(|date| parse_acquisition_date(&date));

        Ok(stored.is_some_and(|stored| same_second(&stored, acquired_at)))
    }

    async fn container_name(&self, container: ObjectId) -> Result<Option<String>, ImportError> {
        let url = self.url(&format!("api/containers/{}", container))?;
        let found: Option<ContainerDto> = self.fetch(self.client.get(url), "container lookup").await?;
        Ok(found.map(|c| c.name))
    }

    async fn attach_file(&self, image: ObjectId, path: &Path) -> Result<(), ImportError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let url = self.url(&format!("api/images/{}/attachments", image))?;
        let response = self
            .authorized(self.client.post(url))
            .header(ATTACHMENT_NAME_HEADER, name)
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(ImportError::Catalog(format!(
                "attachment upload failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for HttpRepository {
    async fn open_upload_target(
        &self,
        fileset: &FilesetSpec,
        destination: &Destination,
    ) -> Result<Box<dyn UploadTarget>, RemoteError> {
        let url = self
            .url("api/import/filesets")
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        let response = self
            .authorized(self.client.post(url))
            .json(&OpenFilesetRequest {
                fileset: fileset.clone(),
                destination: destination.clone(),
            })
            .send()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RemoteError::Connection(format!(
                "opening upload failed: HTTP {}",
                response.status()
            )));
        }
        let opened: OpenFilesetResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        debug!(handle = %opened.handle, fileset = %fileset.name, "Opened upload target");

        let handle = self
            .url(&format!("api/import/filesets/{}", opened.handle))
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        let base = self
            .url(&format!("api/import/filesets/{}/", opened.handle))
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        Ok(Box::new(HttpUploadTarget {
            handle,
            base,
            client: self.client.clone(),
            token: SecretString::from(self.token.expose_secret().to_string()),
        }))
    }
}

/// One open fileset upload on the gateway.
pub struct HttpUploadTarget {
    handle: Url,
    base: Url,
    client: reqwest::Client,
    token: SecretString,
}

impl HttpUploadTarget {
    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base
            .join(path)
            .map_err(|e| RemoteError::Connection(e.to_string()))
    }
}

#[async_trait]
impl UploadTarget for HttpUploadTarget {
    async fn write_block(
        &mut self,
        file_index: usize,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), RemoteError> {
        let mut url = self.url(&format!("files/{}", file_index))?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string());

        let response = self
            .client
            .put(url)
            .bearer_auth(self.token.expose_secret())
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RemoteError::Connection(format!(
                "block write at {} failed: HTTP {}",
                offset,
                response.status()
            )));
        }
        Ok(())
    }

    async fn verify(&mut self, digests: &[String]) -> Result<Vec<RemoteObject>, RemoteError> {
        let response = self
            .client
            .post(self.url("verify")?)
            .bearer_auth(self.token.expose_secret())
            .json(&VerifyRequest {
                digests: digests.to_vec(),
            })
            .send()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let verified: VerifyResponse = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::Connection(e.to_string()))?;
                Ok(verified.objects)
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::Verification(body))
            }
            status => Err(RemoteError::Connection(format!(
                "verification request failed: HTTP {}",
                status
            ))),
        }
    }

    async fn abort(&mut self) {
        let result = self
            .client
            .delete(self.handle.clone())
            .bearer_auth(self.token.expose_secret())
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to discard upload target");
        }
    }
}
