//! CKAN catalog client: dataset upsert, name allocation and file store upload.
//!
//! Writes go through the action API (`package_show`, `package_create`,
//! `package_update`); converted tables go to the legacy file store
//! (`/api/storage/upload_handle`), whose links are rewritten onto the public
//! site URL. Uploads stream the file from disk.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use statweb_core::mapping::iso;
use statweb_core::models::{MAX_NAME_LENGTH, slugify};
use statweb_core::traits::CatalogClient;
use statweb_core::{AppError, DatasetRecord, HttpConfig, ServiceIdentity};
use uuid::Uuid;

use crate::request_error;

/// Generic wrapper for CKAN API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
#[derive(Deserialize, Debug)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
    error: Option<Value>,
}

/// Name the harvester writes as, unless configured otherwise.
pub const DEFAULT_SERVICE_USER: &str = "harvest";

/// How many numbered variants of a name are probed before giving up.
const MAX_NAME_ATTEMPTS: usize = 100;

/// HTTP client for a CKAN catalog.
///
/// # Examples
///
/// ```no_run
/// use statweb_client::CkanCatalog;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = CkanCatalog::new("http://ckan:5000", Some("api-key".to_string()))?
///     .with_site_url("https://dati.trentino.it")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanCatalog {
    client: Client,
    base_url: Url,
    site_url: Url,
    api_key: Option<String>,
    service_user: String,
    timeout_secs: u64,
}

impl CkanCatalog {
    /// Creates a client for the catalog at `base_url`.
    ///
    /// Hosted file links keep `base_url` as host until
    /// [`with_site_url`](Self::with_site_url) is called.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is malformed.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, AppError> {
        Self::with_config(base_url, api_key, &HttpConfig::default())
    }

    /// Creates a client with a custom HTTP configuration.
    pub fn with_config(
        base_url: &str,
        api_key: Option<String>,
        http_config: &HttpConfig,
    ) -> Result<Self, AppError> {
        let base_url = parse_base(base_url)?;
        let client = Client::builder()
            .user_agent(http_config.user_agent.as_str())
            .timeout(http_config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            site_url: base_url.clone(),
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            service_user: DEFAULT_SERVICE_USER.to_string(),
            timeout_secs: http_config.timeout.as_secs(),
        })
    }

    /// Sets the public URL hosted file links are rewritten onto.
    pub fn with_site_url(mut self, site_url: &str) -> Result<Self, AppError> {
        self.site_url = parse_base(site_url)?;
        Ok(self)
    }

    /// Sets the user name reported as service identity.
    pub fn with_service_user(mut self, name: impl Into<String>) -> Self {
        self.service_user = name.into();
        self
    }

    fn action_url(&self, action: &str) -> Result<Url, AppError> {
        self.base_url
            .join(&format!("api/3/action/{}", action))
            .map_err(|e| AppError::InvalidUrl(e.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", key.as_str()),
            None => request,
        }
    }

    /// Fetches a dataset by id or name, or `None` if the catalog has none.
    pub async fn package_show(&self, id: &str) -> Result<Option<Value>, AppError> {
        let mut url = self.action_url("package_show")?;
        url.query_pairs_mut().append_pair("id", id);

        let resp = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::CatalogError(format!(
                "package_show {} answered HTTP {}",
                id,
                status.as_u16()
            )));
        }

        let ckan_resp: CkanResponse<Value> = resp
            .json()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        if !ckan_resp.success {
            return Ok(None);
        }
        Ok(ckan_resp.result)
    }

    /// Posts an action and returns its `result`.
    async fn post_action(&self, action: &str, body: &Value) -> Result<Value, AppError> {
        let url = self.action_url(action)?;
        let resp = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let ckan_resp: CkanResponse<Value> = serde_json::from_str(&text).map_err(|_| {
            AppError::CatalogError(format!("{} answered HTTP {}", action, status.as_u16()))
        })?;

        if !status.is_success() || !ckan_resp.success {
            let detail = ckan_resp
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(AppError::CatalogError(format!("{} failed: {}", action, detail)));
        }

        Ok(ckan_resp.result.unwrap_or_default())
    }

    /// Moves a file store link onto the public site URL.
    ///
    /// Path and query are kept; scheme, host and port come from the site URL.
    /// Unparsable input is returned unchanged.
    pub fn rewrite_to_site(&self, url: &str) -> String {
        let Ok(parsed) = Url::parse(url) else {
            return url.to_string();
        };

        let mut rewritten = self.site_url.as_str().trim_end_matches('/').to_string();
        rewritten.push_str(parsed.path());
        if let Some(query) = parsed.query() {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        rewritten
    }

    /// Serializes a dataset into a CKAN package dictionary.
    pub fn to_ckan_package(record: &DatasetRecord) -> Value {
        let resources: Vec<Value> = record
            .resources
            .iter()
            .map(|r| {
                json!({
                    "url": r.url,
                    "format": r.format,
                    "mimetype": r.mimetype,
                    "resource_type": r.resource_type,
                    "description": r.description,
                    "name": r.name,
                    "last_modified": r.last_modified.as_ref().map(iso),
                })
            })
            .collect();

        json!({
            "id": record.id,
            "name": record.name,
            "title": record.title,
            "url": record.url,
            "notes": record.notes,
            "author": record.author,
            "author_email": record.author_email,
            "maintainer": record.maintainer,
            "maintainer_email": record.maintainer_email,
            "license_id": record.license.id,
            "license_title": record.license.title,
            "license_url": record.license.url,
            "isopen": record.license.is_open,
            "groups": record.groups.iter().map(|g| json!({"name": g})).collect::<Vec<_>>(),
            "tags": record.tags.iter().map(|t| json!({"name": t})).collect::<Vec<_>>(),
            "extras": record
                .extras
                .iter()
                .map(|(k, v)| json!({"key": k, "value": v}))
                .collect::<Vec<_>>(),
            "metadata_created": record.metadata_created.as_ref().map(iso),
            "metadata_modified": record.metadata_modified.as_ref().map(iso),
            "resources": resources,
        })
    }
}

impl CatalogClient for CkanCatalog {
    async fn create_or_update(&self, record: &DatasetRecord) -> Result<String, AppError> {
        let mut package = Self::to_ckan_package(record);

        match self.package_show(&record.id).await? {
            Some(existing) => {
                // the slug is allocated once, at creation
                let name = existing
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(record.name.as_str())
                    .to_string();
                package["name"] = Value::String(name.clone());
                self.post_action("package_update", &package).await?;
                tracing::info!(id = %record.id, name = %name, "Updated dataset");
                Ok(name)
            }
            None => {
                self.post_action("package_create", &package).await?;
                tracing::info!(id = %record.id, name = %record.name, "Created dataset");
                Ok(record.name.clone())
            }
        }
    }

    async fn upload_file(&self, path: &Path) -> Result<String, AppError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Generic(format!("Not a file: {}", path.display())))?;
        let label = format!("harvest/{}/{}", Uuid::new_v4().simple(), file_name);
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        let part = Part::stream_with_length(Body::from(file), length)
            .file_name(file_name)
            .mime_str("text/csv")
            .map_err(|e| AppError::ClientError(e.to_string()))?;
        let form = Form::new().text("key", label.clone()).part("file", part);

        let url = self
            .base_url
            .join("api/storage/upload_handle")
            .map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        let resp = self
            .authorized(self.client.post(url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::CatalogError(format!(
                "upload of {} answered HTTP {}",
                path.display(),
                status.as_u16()
            )));
        }

        let hosted = self
            .base_url
            .join(&format!("storage/f/{}", label))
            .map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        Ok(self.rewrite_to_site(hosted.as_str()))
    }

    async fn generate_unique_name(&self, title: &str) -> Result<String, AppError> {
        let base = slugify(title);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = numbered(&base, attempt);
            if self.package_show(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }

        Err(AppError::CatalogError(format!(
            "No free dataset name for '{}'",
            base
        )))
    }

    async fn service_identity(&self) -> Result<ServiceIdentity, AppError> {
        Ok(ServiceIdentity {
            name: self.service_user.clone(),
            api_key: self.api_key.clone(),
        })
    }
}

/// Parses a base URL, making sure relative joins keep its path.
fn parse_base(url: &str) -> Result<Url, AppError> {
    let mut normalized = url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|_| AppError::InvalidUrl(url.to_string()))
}

/// `base` for attempt zero, `base-N` afterwards, within the name length limit.
fn numbered(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let suffix = format!("-{}", attempt);
    let mut stem = base.to_string();
    stem.truncate(MAX_NAME_LENGTH - suffix.len());
    let stem = stem.trim_end_matches('-');
    format!("{}{}", stem, suffix)
}
