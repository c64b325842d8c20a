//! Resource catalog of RDF datasets. Downloads are encoded as N-Triples.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::client::Client;
use crate::download::save_response;
use crate::error::{Error, Result};
use crate::operation::DataFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PagingOptions {
    pub(crate) page_index: u32,
    pub(crate) page_size: u32,
    #[serde(default, skip_serializing)]
    pub(crate) count: Option<u64>,
}

impl PagingOptions {
    pub(crate) fn new(page_index: u32, page_size: u32) -> Self {
        Self {
            page_index,
            page_size,
            count: None,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub page_index: u32,
    pub page_size: u32,
    /// Total number of matching items, when reported by the server.
    pub count: Option<u64>,
    pub items: Vec<T>,
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Page<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw<T> {
            paging_options: Option<PagingOptions>,
            #[serde(default = "Vec::new")]
            items: Vec<T>,
        }

        let raw = Raw::<T>::deserialize(deserializer)?;
        let paging = raw.paging_options.unwrap_or(PagingOptions {
            page_index: 0,
            page_size: raw.items.len() as u32,
            count: None,
        });
        Ok(Page {
            page_index: paging.page_index,
            page_size: paging.page_size,
            count: paging.count,
            items: raw.items,
        })
    }
}

/// Catalog query options.
///
/// Only `format`, `keyword`, `pageIndex` and `pageSize` are recognised;
/// anything else is rejected with [`Error::Config`] before a request is made.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CatalogFilter {
    /// Restrict to resources in this encoding.
    #[serde(default)]
    pub format: Option<DataFormat>,
    /// Text match on the resource name.
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub page_index: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    10
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            format: None,
            keyword: None,
            page_index: 0,
            page_size: default_page_size(),
        }
    }
}

impl CatalogFilter {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_page(mut self, page_index: u32, page_size: u32) -> Self {
        self.page_index = page_index;
        self.page_size = page_size;
        self
    }

    /// Builds a filter from a JSON object of options.
    pub fn from_json(options: &Value) -> Result<Self> {
        let filter: CatalogFilter = serde_json::from_value(options.clone())
            .map_err(|e| Error::config(format!("invalid catalog filter: {}", e)))?;
        filter.validate()?;
        Ok(filter)
    }

    /// Builds a filter from string key/value options, e.g. parsed command-line flags.
    pub fn from_pairs<I, K, V>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = CatalogFilter::default();
        for (k, v) in options {
            let (k, v) = (k.as_ref(), v.as_ref());
            match k {
                "format" => filter.format = Some(v.parse()?),
                "keyword" => filter.keyword = Some(v.to_string()),
                "pageIndex" => filter.page_index = parse_number(k, v)?,
                "pageSize" => filter.page_size = parse_number(k, v)?,
                other => {
                    return Err(Error::config(format!(
                        "unknown catalog filter option `{}` (expected format, keyword, pageIndex or pageSize)",
                        other
                    )));
                }
            }
        }
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::config("page size must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_number(name: &str, v: &str) -> Result<u32> {
    v.trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer, got `{}`", name, v)))
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Link {
    #[serde(default)]
    pub rel: Option<String>,
    pub href: String,
}

/// Snapshot of a catalog entry.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResource {
    pub id: i64,
    pub version: i64,
    #[serde(default, alias = "name")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Encoding as reported by the server, e.g. `N_TRIPLES`.
    #[serde(default, alias = "outputFormat")]
    pub format: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Absolute URL serving the N-Triples data of this revision.
    #[serde(skip)]
    pub download_url: String,
}

impl CatalogResource {
    /// The reported format, if it is one this client knows.
    pub fn data_format(&self) -> Option<DataFormat> {
        self.format.as_deref().and_then(|f| f.parse().ok())
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    paging_options: PagingOptions,
    query: ResourceQuery<'a>,
}

#[derive(serde::Serialize)]
struct ResourceQuery<'a> {
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<DataFormat>,
}

/// Catalog namespace, see [`Client::catalog`].
#[derive(Debug, Clone, Copy)]
pub struct Catalog<'a> {
    client: &'a Client,
}

impl<'a> Catalog<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub fn query(&self, filter: &CatalogFilter) -> Result<Vec<CatalogResource>> {
        Ok(self.query_page(filter)?.items)
    }

    /// Validates raw JSON options, then queries. Unknown options never reach the server.
    pub fn query_options(&self, options: &Value) -> Result<Vec<CatalogResource>> {
        let filter = CatalogFilter::from_json(options)?;
        self.query(&filter)
    }

    pub fn query_page(&self, filter: &CatalogFilter) -> Result<Page<CatalogResource>> {
        filter.validate()?;
        let body = QueryBody {
            paging_options: PagingOptions::new(filter.page_index, filter.page_size),
            query: ResourceQuery {
                name: filter.keyword.as_deref(),
                format: filter.format,
            },
        };

        let mut page: Page<CatalogResource> = self.client.post_json("resource/", &body)?;
        for resource in &mut page.items {
            resource.download_url = self.download_url(resource.id, resource.version);
        }
        tracing::debug!(count = page.items.len(), "catalog query");
        Ok(page)
    }

    /// Downloads a resource revision as N-Triples text.
    pub fn download(&self, resource_id: i64, resource_version: i64) -> Result<String> {
        let url = self.download_url(resource_id, resource_version);
        let resp = self
            .client
            .execute(self.client.request(reqwest::Method::GET, &url), &url)?;
        resp.text().map_err(|e| Error::transport(&url, e))
    }

    /// Downloads a resource revision into `target`, replacing an existing file.
    pub fn download_to(
        &self,
        resource_id: i64,
        resource_version: i64,
        target: &Path,
    ) -> Result<PathBuf> {
        let url = self.download_url(resource_id, resource_version);
        let resp = self
            .client
            .execute(self.client.request(reqwest::Method::GET, &url), &url)?;
        save_response(resp, &url, target, true, self.client.progress())
    }

    fn download_url(&self, resource_id: i64, resource_version: i64) -> String {
        self.client
            .endpoint(&format!("resource/{}/{}/", resource_id, resource_version))
    }
}
