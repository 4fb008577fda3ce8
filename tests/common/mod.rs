#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use hmis_metadata::client::{MetadataApi, PostResponse, QueryValue};
use hmis_metadata::error::HmisError;
use serde_json::{Value, json};

pub const SERVER_URL: &str = "https://hmis.example.org/";

/// Page size the server falls back to when a paged request names none.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// A collection the server insists on paging: unpaged requests get the
/// first `cap` rows and a pager, paged requests are sliced by `pageSize`.
struct PagedCollection {
    key: String,
    items: Vec<Value>,
    cap: usize,
}

/// Serves `tests/fixtures/<resource>.json` for `api/<resource>.json` and
/// records every request it sees.
pub struct FixtureApi {
    overrides: HashMap<String, Vec<Value>>,
    collections: HashMap<String, PagedCollection>,
    failing: bool,
    calls: Mutex<Vec<String>>,
}

impl FixtureApi {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            collections: HashMap::new(),
            failing: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every GET fails with a 503.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Serves `pages` in order for `path`; page `n` answers `page=n`.
    pub fn with_pages(mut self, path: &str, pages: Vec<Value>) -> Self {
        self.overrides.insert(path.to_string(), pages);
        self
    }

    /// Serves `items` under `key` for `path`, capping unpaged requests at
    /// `cap` rows.
    pub fn with_paged_collection(
        mut self,
        path: &str,
        key: &str,
        items: Vec<Value>,
        cap: usize,
    ) -> Self {
        self.collections.insert(
            path.to_string(),
            PagedCollection {
                key: key.to_string(),
                items,
                cap,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl MetadataApi for FixtureApi {
    fn server_url(&self) -> &str {
        SERVER_URL
    }

    fn get(&self, path: &str, query: &[(&str, QueryValue)]) -> Result<Value, HmisError> {
        let rendered = query
            .iter()
            .map(|(key, value)| format!("{key}={}", value.as_param()))
            .collect::<Vec<_>>()
            .join("&");
        self.calls.lock().unwrap().push(format!("{path}?{rendered}"));

        if self.failing {
            return Err(HmisError::Transport {
                status: 503,
                url: format!("{SERVER_URL}{path}"),
                body: "Service Unavailable".to_string(),
            });
        }

        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.as_param())
        };

        if let Some(pages) = self.overrides.get(path) {
            let page = param("page").map_or(1, |page| page.parse::<usize>().unwrap());
            return Ok(pages[page - 1].clone());
        }

        if let Some(collection) = self.collections.get(path) {
            let paged = param("paging").as_deref() != Some("false");
            let (page, page_size) = if paged {
                (
                    param("page").map_or(1, |page| page.parse::<usize>().unwrap()),
                    param("pageSize")
                        .map_or(DEFAULT_PAGE_SIZE, |size| size.parse::<usize>().unwrap()),
                )
            } else {
                (1, collection.cap)
            };
            let total = collection.items.len();
            let start = ((page - 1) * page_size).min(total);
            let end = (start + page_size).min(total);
            let mut payload = serde_json::Map::new();
            payload.insert(
                "pager".to_string(),
                json!({
                    "page": page,
                    "pageCount": total.div_ceil(page_size),
                    "total": total,
                    "pageSize": page_size
                }),
            );
            payload.insert(
                collection.key.clone(),
                Value::Array(collection.items[start..end].to_vec()),
            );
            return Ok(Value::Object(payload));
        }

        let resource = path
            .strip_prefix("api/")
            .expect("fixture paths start with api/");
        let content = fs::read_to_string(format!("tests/fixtures/{resource}")).map_err(|_| {
            HmisError::Transport {
                status: 404,
                url: format!("{SERVER_URL}{path}"),
                body: "Not Found".to_string(),
            }
        })?;
        Ok(serde_json::from_str(&content).unwrap())
    }

    fn post(
        &self,
        path: &str,
        _query: &[(&str, QueryValue)],
        _headers: &[(&str, &str)],
        _body: Option<Vec<u8>>,
    ) -> Result<PostResponse, HmisError> {
        Err(HmisError::Transport {
            status: 405,
            url: format!("{SERVER_URL}{path}"),
            body: "read-only fixture".to_string(),
        })
    }
}
