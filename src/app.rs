use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{MetadataCache, ORG_UNITS_ARTIFACT};
use crate::catalog::ComboMatch;
use crate::client::MetadataApi;
use crate::error::HmisError;
use crate::instance::Dhis2;

#[derive(Debug, Clone, Serialize)]
pub struct MetadataSummary {
    pub server_url: String,
    pub org_units: usize,
    pub data_sets: usize,
    pub data_elements: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AncestorsResult {
    pub name: String,
    pub id: String,
    pub ancestors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgUnitResult {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub ancestors: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub free_groups: Vec<String>,
    pub geometry: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComboResult {
    pub data_element_id: String,
    pub data_element_name: String,
    pub options: Vec<String>,
    pub combo: ComboMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSetResult {
    pub id: String,
    pub name: String,
    pub data_elements: Vec<DataElementEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataElementEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheClearResult {
    pub path: String,
    pub cleared: bool,
}

/// The operations the command line exposes, independent of how results are
/// printed.
pub struct App<A: MetadataApi> {
    instance: Dhis2<A>,
}

impl<A: MetadataApi> App<A> {
    pub fn new(instance: Dhis2<A>) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &Dhis2<A> {
        &self.instance
    }

    pub fn metadata(&self) -> Result<MetadataSummary, HmisError> {
        let org_units = self.instance.org_units()?;
        let data_sets = self.instance.data_sets()?;
        let data_elements = self.instance.data_elements()?;
        Ok(MetadataSummary {
            server_url: self.instance.server_url().to_string(),
            org_units: org_units.len(),
            data_sets: data_sets.len(),
            data_elements: data_elements.len(),
        })
    }

    pub fn ancestors(&self, name: &str) -> Result<AncestorsResult, HmisError> {
        let org_units = self.instance.org_units()?;
        let unit = org_units.lookup_by_name(name)?;
        Ok(AncestorsResult {
            name: unit.name().to_string(),
            id: unit.id().to_string(),
            ancestors: unit.ancestor_path()?,
        })
    }

    pub fn org_unit(&self, name: &str) -> Result<OrgUnitResult, HmisError> {
        let org_units = self.instance.org_units()?;
        let unit = org_units.lookup_by_name(name)?;
        Ok(OrgUnitResult {
            id: unit.id().to_string(),
            name: unit.name().to_string(),
            code: unit.code().map(str::to_string),
            ancestors: unit.ancestor_path()?,
            attributes: unit.attributes().clone(),
            free_groups: unit.free_groups().to_vec(),
            geometry: unit.geometry().cloned(),
        })
    }

    pub fn combo(&self, element: &str, options: &[String]) -> Result<ComboResult, HmisError> {
        let data_elements = self.instance.data_elements()?;
        let data_element = data_elements.lookup_by_name(element)?;
        let combo = data_element.find_category_combo(options)?;
        Ok(ComboResult {
            data_element_id: data_element.id().to_string(),
            data_element_name: data_element.name().to_string(),
            options: options.to_vec(),
            combo,
        })
    }

    pub fn data_set(&self, name: &str) -> Result<DataSetResult, HmisError> {
        let data_sets = self.instance.data_sets()?;
        let data_set = data_sets.lookup_by_name(name)?;
        let data_elements = self.instance.data_elements()?;
        let entries = data_elements
            .elements_of(data_set)?
            .into_iter()
            .map(|element| DataElementEntry {
                id: element.id().to_string(),
                name: element.name().to_string(),
            })
            .collect();
        Ok(DataSetResult {
            id: data_set.id.clone(),
            name: data_set.name.clone(),
            data_elements: entries,
        })
    }
}

/// Removes the cached org-unit snapshot. Needs no server access.
pub fn clear_cache(cache: &MetadataCache) -> Result<CacheClearResult, HmisError> {
    let cleared = cache.invalidate(ORG_UNITS_ARTIFACT)?;
    Ok(CacheClearResult {
        path: cache.artifact_path(ORG_UNITS_ARTIFACT).to_string(),
        cleared,
    })
}
