//! Blocking OSDI HTTP client (Action Network flavour).
//!
//! Requests run on a current-thread tokio runtime owned by the client, so
//! the engine stays synchronous.

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

use super::hal;
use super::{filter_query, Filter, FilterOp, RemoteSystem};
use crate::error::{CoreError, StoreError};
use crate::model::ResourceType;
use crate::storage::RemoteConfig;

const TOKEN_HEADER: &str = "OSDI-API-Token";

/// Fields the server can filter on; everything else is filtered locally.
const SERVER_FILTER_FIELDS: &[&str] = &["email_address", "modified_date", "created_date"];

pub struct OsdiClient {
    http: Client,
    runtime: Runtime,
    base: Url,
    token: String,
    page_size: u32,
}

impl OsdiClient {
    /// # Errors
    /// Returns an error if the endpoint is not a URL or the HTTP stack
    /// cannot be initialized.
    pub fn new(endpoint: &str, token: &str, timeout: Duration, page_size: u32) -> Result<Self, StoreError> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| StoreError::Invalid(format!("endpoint '{endpoint}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            runtime,
            base,
            token: token.to_string(),
            page_size: page_size.max(1),
        })
    }

    /// Build a client from `[remote]` config, reading the token from the
    /// configured environment variable.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, CoreError> {
        let token = config.api_token()?;
        Ok(Self::new(
            &config.endpoint,
            &token,
            Duration::from_secs(config.timeout_secs),
            config.page_size,
        )?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| StoreError::Invalid(format!("path '{path}': {e}")))
    }

    /// Send one request. `Ok(None)` means HTTP 404.
    fn execute(&self, request: RequestBuilder) -> Result<Option<Value>, StoreError> {
        let request = request.header(TOKEN_HEADER, &self.token);
        self.runtime.block_on(async {
            let resp = request.send().await?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(StoreError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            if body.trim().is_empty() {
                return Ok(Some(Value::Null));
            }
            Ok::<_, StoreError>(Some(serde_json::from_str(&body)?))
        })
    }

    fn get_page(&self, url: Url) -> Result<Option<Value>, StoreError> {
        debug!(url = %url, "GET page");
        self.execute(self.http.get(url))
    }

    /// Every item of a collection, following `_links.next`.
    fn collect_pages(
        &self,
        path: &str,
        resource: ResourceType,
        filters: &[Filter],
    ) -> Result<Vec<Value>, StoreError> {
        let mut url = self.url(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("per_page", &self.page_size.to_string());
            let server: Vec<Filter> = filters
                .iter()
                .filter(|f| SERVER_FILTER_FIELDS.contains(&f.field.as_str()))
                .cloned()
                .collect();
            if !server.is_empty() {
                query.append_pair("filter", &filter_query(&server));
            }
        }

        let mut items = Vec::new();
        let mut seen = Vec::new();
        loop {
            seen.push(url.to_string());
            let Some(page) = self.get_page(url)? else {
                break;
            };
            for item in hal::embedded_items(&page, resource) {
                let flat = hal::to_flat(resource, &item)?;
                if filters.iter().all(|f| f.matches(&flat)) {
                    items.push(flat);
                }
            }
            match hal::next_link(&page) {
                Some(next) if !seen.contains(&next) => {
                    url = Url::parse(&next).map_err(|e| StoreError::Invalid(e.to_string()))?;
                }
                _ => break,
            }
        }
        Ok(items)
    }

    fn tag_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .collect_pages("tags", ResourceType::Tags, &[])?
            .iter()
            .filter_map(|t| t.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn item_path(resource: ResourceType, id: &str) -> String {
        match resource {
            ResourceType::Taggings => id.to_string(),
            other => format!("{}/{}", other.as_str(), id),
        }
    }

    fn write(&self, method: Method, path: &str, body: &Value) -> Result<Value, StoreError> {
        debug!(%method, path, "OSDI write");
        let url = self.url(path)?;
        match self.execute(self.http.request(method, url).json(body))? {
            Some(resp) => Ok(resp),
            None => Err(StoreError::not_found("resource", path)),
        }
    }
}

impl RemoteSystem for OsdiClient {
    fn find(&self, resource: ResourceType, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        match resource {
            ResourceType::Taggings => {
                let tag_filter = filters
                    .iter()
                    .find(|f| f.field == "tag_id" && f.op == FilterOp::Eq)
                    .map(|f| f.value.clone());
                let tags = match tag_filter {
                    Some(tag) => vec![tag],
                    None => self.tag_ids()?,
                };
                let mut items = Vec::new();
                for tag in tags {
                    items.extend(self.collect_pages(
                        &format!("tags/{tag}/taggings"),
                        resource,
                        filters,
                    )?);
                }
                Ok(items)
            }
            other => self.collect_pages(other.as_str(), other, filters),
        }
    }

    fn fetch(&self, resource: ResourceType, id: &str) -> Result<Option<Value>, StoreError> {
        if resource == ResourceType::Taggings && hal::split_tagging_path(id).is_none() {
            return Err(StoreError::Invalid(format!("'{id}' is not a tagging path")));
        }
        let url = self.url(&Self::item_path(resource, id))?;
        self.execute(self.http.get(url))?
            .map(|doc| hal::to_flat(resource, &doc))
            .transpose()
    }

    fn save(&self, resource: ResourceType, doc: &Value) -> Result<Value, StoreError> {
        let body = hal::to_wire(resource, doc, &self.base)?;
        let id = doc.get("id").and_then(Value::as_str);

        let response = match (resource, id) {
            (ResourceType::Taggings, Some(id)) => {
                return Err(StoreError::Invalid(format!("tagging '{id}' cannot be updated")));
            }
            (ResourceType::Taggings, None) => {
                let tag = doc
                    .get("tag_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::Invalid("tagging without tag_id".into()))?;
                self.write(Method::POST, &format!("tags/{tag}/taggings"), &body)?
            }
            (ResourceType::People, None) => {
                self.write(Method::POST, "people", &serde_json::json!({ "person": body }))?
            }
            (other, None) => self.write(Method::POST, other.as_str(), &body)?,
            (other, Some(id)) => self.write(Method::PUT, &Self::item_path(other, id), &body)?,
        };

        hal::to_flat(resource, &response)
    }

    fn delete(&self, resource: ResourceType, id: &str) -> Result<(), StoreError> {
        let url = self.url(&Self::item_path(resource, id))?;
        match self.execute(self.http.delete(url))? {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(resource.as_str(), id)),
        }
    }
}
