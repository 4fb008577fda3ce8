//! Typed records for the metadata collections the catalogs fetch.
//!
//! Field names follow the DHIS2 JSON payloads. Anything the server sends
//! beyond the requested fields lands in `extra` and is logged once at
//! catalog construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ExtraFields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdName {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUnitGroup {
    pub id: String,
    pub name: String,
    /// `None` when the server omitted the field, which marks a free group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_sets: Option<Vec<IdRef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrgUnit {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<IdRef>,
    #[serde(default)]
    pub ancestors: Vec<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub organisation_unit_groups: Vec<OrgUnitGroup>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl RawOrgUnit {
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUnitGroupSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub organisation_unit_groups: Vec<IdName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetElement {
    pub data_element: IdRef,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDataSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data_set_elements: Vec<DataSetElement>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOptionCombo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category_options: Vec<IdName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCombo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category_option_combos: Vec<CategoryOptionCombo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDataElement {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_combo: Option<CategoryCombo>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Id and name, the two keys every catalog indexes its records by.
pub trait Record {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    fn extra_fields(&self) -> Option<&ExtraFields> {
        None
    }
}

impl Record for RawOrgUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn extra_fields(&self) -> Option<&ExtraFields> {
        Some(&self.extra)
    }
}

impl Record for RawDataSet {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn extra_fields(&self) -> Option<&ExtraFields> {
        Some(&self.extra)
    }
}

impl Record for RawDataElement {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn extra_fields(&self) -> Option<&ExtraFields> {
        Some(&self.extra)
    }
}

impl Record for OrgUnitGroupSet {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
