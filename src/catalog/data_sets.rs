use std::fmt;

use crate::catalog::{Index, fetch_collection};
use crate::client::MetadataApi;
use crate::error::{CatalogKind, HmisError};
use crate::model::RawDataSet;

pub const DATA_SET_FIELDS: &str = "id,name,dataSetElements";

#[derive(Debug, Clone)]
pub struct DataSets {
    server_url: String,
    data_sets: Vec<RawDataSet>,
    index: Index,
}

impl DataSets {
    pub fn fetch(api: &dyn MetadataApi) -> Result<Self, HmisError> {
        let data_sets = fetch_collection(api, "dataSets", "dataSets", DATA_SET_FIELDS)?;
        Ok(Self::from_records(api.server_url(), data_sets))
    }

    pub fn from_records(server_url: &str, data_sets: Vec<RawDataSet>) -> Self {
        let index = Index::build("dataSets", &data_sets);
        Self {
            server_url: server_url.to_string(),
            data_sets,
            index,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn len(&self) -> usize {
        self.data_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_sets.is_empty()
    }

    pub fn get_by_index(&self, position: usize) -> Result<&RawDataSet, HmisError> {
        self.data_sets
            .get(position)
            .ok_or_else(|| self.not_found(position.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> Result<&RawDataSet, HmisError> {
        self.index
            .position_by_id(id)
            .map(|position| &self.data_sets[position])
            .ok_or_else(|| self.not_found(id))
    }

    /// Exact name match; data sets have no alias registry.
    pub fn lookup_by_name(&self, name: &str) -> Result<&RawDataSet, HmisError> {
        self.index
            .position_by_name(name)
            .map(|position| &self.data_sets[position])
            .ok_or_else(|| self.not_found(name))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_id(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawDataSet> {
        self.data_sets.iter()
    }

    fn not_found(&self, key: impl Into<String>) -> HmisError {
        HmisError::not_found(CatalogKind::DataSet, key, &self.server_url)
    }
}

impl RawDataSet {
    pub fn data_element_ids(&self) -> impl Iterator<Item = &str> {
        self.data_set_elements
            .iter()
            .map(|element| element.data_element.id.as_str())
    }
}

impl fmt::Display for DataSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server_url: {}, size: {}", self.server_url, self.len())
    }
}

impl<'a> IntoIterator for &'a DataSets {
    type Item = &'a RawDataSet;
    type IntoIter = std::slice::Iter<'a, RawDataSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
