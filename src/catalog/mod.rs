//! Catalog indices over the fetched metadata collections.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{API_PATH, MetadataApi, QueryValue};
use crate::error::HmisError;
use crate::model::Record;

pub mod data_elements;
pub mod data_sets;
pub mod org_units;

pub use data_elements::{ComboMatch, DataElement, DataElements, MemoStats};
pub use data_sets::DataSets;
pub use org_units::{OrgUnit, OrgUnitHandle, OrgUnitSnapshot, OrgUnits};

/// Id and name positions into a collection. When two records share a key
/// the later one wins, matching the order the server returned them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Index {
    pub fn build<T: Record>(collection: &str, records: &[T]) -> Self {
        let mut index = Index {
            by_id: HashMap::with_capacity(records.len()),
            by_name: HashMap::with_capacity(records.len()),
        };
        let mut with_extra = 0usize;
        for (position, record) in records.iter().enumerate() {
            if let Some(previous) = index.by_id.insert(record.id().to_string(), position) {
                warn!(collection, id = record.id(), previous, position, "duplicate id");
            }
            if let Some(previous) = index.by_name.insert(record.name().to_string(), position) {
                debug!(collection, name = record.name(), previous, position, "duplicate name");
            }
            if record.extra_fields().is_some_and(|extra| !extra.is_empty()) {
                with_extra += 1;
            }
        }
        if with_extra > 0 {
            debug!(collection, records = with_extra, "records carry unrequested fields");
        }
        index
    }

    pub fn position_by_id(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pager {
    page: u32,
    page_count: u32,
    page_size: Option<u32>,
    total: Option<usize>,
}

/// Fetches `api/<resource>.json` unpaged and returns the array under `key`.
/// Servers that cap page size anyway answer with a `pager`; the remaining
/// pages are then requested one by one with the server's page size, and the
/// result must add up to the pager's total.
pub fn fetch_collection<T: DeserializeOwned>(
    api: &dyn MetadataApi,
    resource: &str,
    key: &str,
    fields: &str,
) -> Result<Vec<T>, HmisError> {
    let path = format!("{API_PATH}{resource}.json");
    let url = absolute_url(api, &path);
    let payload = api.get(&path, &[("fields", fields.into()), ("paging", false.into())])?;
    let pager = read_pager(&payload, &url)?;
    let mut items = extract_items::<T>(payload, key, &url)?;

    let Some(pager) = pager else {
        return Ok(items);
    };
    if pager.page < pager.page_count {
        warn!(
            resource,
            page_count = pager.page_count,
            page_size = pager.page_size,
            "server paged an unpaged request, following pages"
        );
        let page_size = pager.page_size.ok_or_else(|| HmisError::Payload {
            url: url.clone(),
            message: "pager has more pages but no pageSize".to_string(),
        })?;
        for page in (pager.page + 1)..=pager.page_count {
            let query: [(&str, QueryValue); 4] = [
                ("fields", fields.into()),
                ("paging", true.into()),
                ("page", page.into()),
                ("pageSize", page_size.into()),
            ];
            let payload = api.get(&path, &query)?;
            items.extend(extract_items::<T>(payload, key, &url)?);
        }
    }
    if let Some(total) = pager.total
        && items.len() != total
    {
        return Err(HmisError::Payload {
            url,
            message: format!("pager reported {total} {key} but {} were returned", items.len()),
        });
    }

    Ok(items)
}

fn absolute_url(api: &dyn MetadataApi, path: &str) -> String {
    format!("{}/{path}", api.server_url().trim_end_matches('/'))
}

fn read_pager(payload: &Value, url: &str) -> Result<Option<Pager>, HmisError> {
    payload
        .get("pager")
        .map(|pager| {
            Pager::deserialize(pager).map_err(|err| HmisError::Payload {
                url: url.to_string(),
                message: format!("malformed pager: {err}"),
            })
        })
        .transpose()
}

fn extract_items<T: DeserializeOwned>(
    mut payload: Value,
    key: &str,
    url: &str,
) -> Result<Vec<T>, HmisError> {
    let items = payload
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| HmisError::Payload {
            url: url.to_string(),
            message: format!("missing \"{key}\" collection"),
        })?;
    serde_json::from_value(items).map_err(|err| HmisError::Payload {
        url: url.to_string(),
        message: err.to_string(),
    })
}
