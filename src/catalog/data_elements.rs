use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::aliases::{AliasMap, AliasTable};
use crate::catalog::{Index, fetch_collection};
use crate::client::MetadataApi;
use crate::error::{CatalogKind, HmisError};
use crate::model::{CategoryOptionCombo, IdName, RawDataElement, RawDataSet};

pub const DATA_ELEMENT_FIELDS: &str =
    "id,name,categoryCombo[id,name,categoryOptionCombos[id,name,categoryOptions[id,name]]]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ComboMatch {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Element id plus the sorted, de-duplicated option arguments.
type ComboKey = (String, Vec<String>);

#[derive(Debug, Default)]
struct ComboMemo {
    entries: HashMap<ComboKey, Option<ComboMatch>>,
    hits: u64,
    misses: u64,
}

/// Indexed data-element catalog. Category-combo lookups are memoized for
/// as long as this value lives.
#[derive(Debug)]
pub struct DataElements {
    server_url: String,
    data_elements: Vec<RawDataElement>,
    index: Index,
    aliases: Arc<AliasTable>,
    combo_memo: Mutex<ComboMemo>,
}

impl DataElements {
    pub fn fetch(api: &dyn MetadataApi, aliases: Arc<AliasTable>) -> Result<Self, HmisError> {
        let data_elements =
            fetch_collection(api, "dataElements", "dataElements", DATA_ELEMENT_FIELDS)?;
        Ok(Self::from_records(api.server_url(), data_elements, aliases))
    }

    pub fn from_records(
        server_url: &str,
        data_elements: Vec<RawDataElement>,
        aliases: Arc<AliasTable>,
    ) -> Self {
        let index = Index::build("dataElements", &data_elements);
        Self {
            server_url: server_url.to_string(),
            data_elements,
            index,
            aliases,
            combo_memo: Mutex::new(ComboMemo::default()),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn len(&self) -> usize {
        self.data_elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_elements.is_empty()
    }

    pub fn get_by_index(&self, position: usize) -> Result<DataElement<'_>, HmisError> {
        self.data_elements
            .get(position)
            .map(|raw| self.wrap(raw))
            .ok_or_else(|| self.not_found(CatalogKind::DataElement, position.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> Result<DataElement<'_>, HmisError> {
        self.index
            .position_by_id(id)
            .map(|position| self.wrap(&self.data_elements[position]))
            .ok_or_else(|| self.not_found(CatalogKind::DataElement, id))
    }

    /// Resolves through the indicator aliases first, then the literal name.
    pub fn lookup_by_name(&self, name: &str) -> Result<DataElement<'_>, HmisError> {
        self.aliases
            .indicators
            .resolve(name, |candidate| self.index.position_by_name(candidate))
            .map(|position| self.wrap(&self.data_elements[position]))
            .ok_or_else(|| self.not_found(CatalogKind::DataElement, name))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_id(id)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = DataElement<'_>> {
        self.data_elements.iter().map(|raw| self.wrap(raw))
    }

    /// The elements a data set is made of, in data-set order.
    pub fn elements_of(&self, data_set: &RawDataSet) -> Result<Vec<DataElement<'_>>, HmisError> {
        data_set
            .data_element_ids()
            .map(|id| self.get_by_id(id))
            .collect()
    }

    pub fn combo_memo_stats(&self) -> MemoStats {
        let memo = self.combo_memo.lock().unwrap_or_else(PoisonError::into_inner);
        MemoStats {
            entries: memo.entries.len(),
            hits: memo.hits,
            misses: memo.misses,
        }
    }

    fn wrap<'a>(&'a self, raw: &'a RawDataElement) -> DataElement<'a> {
        DataElement { raw, catalog: self }
    }

    fn not_found(&self, kind: CatalogKind, key: impl Into<String>) -> HmisError {
        HmisError::not_found(kind, key, &self.server_url)
    }
}

impl fmt::Display for DataElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server_url: {}, size: {}", self.server_url, self.len())
    }
}

#[derive(Clone, Copy)]
pub struct DataElement<'a> {
    raw: &'a RawDataElement,
    catalog: &'a DataElements,
}

impl<'a> DataElement<'a> {
    pub fn raw(&self) -> &'a RawDataElement {
        self.raw
    }

    pub fn id(&self) -> &'a str {
        &self.raw.id
    }

    pub fn name(&self) -> &'a str {
        &self.raw.name
    }

    pub fn category_option_combos(&self) -> &'a [CategoryOptionCombo] {
        self.raw
            .category_combo
            .as_ref()
            .map(|combo| combo.category_option_combos.as_slice())
            .unwrap_or(&[])
    }

    /// Finds the first combo whose every category option is matched by at
    /// least one of `options`, by name, id, or age-group alias. Options that
    /// match nothing are ignored. Argument order does not matter.
    pub fn find_category_combo<S: AsRef<str>>(
        &self,
        options: &[S],
    ) -> Result<ComboMatch, HmisError> {
        let mut normalized: Vec<String> =
            options.iter().map(|option| option.as_ref().to_string()).collect();
        normalized.sort();
        normalized.dedup();

        let key = (self.raw.id.clone(), normalized);
        let mut memo = self
            .catalog
            .combo_memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cached = memo.entries.get(&key).cloned();
        let found = match cached {
            Some(found) => {
                memo.hits += 1;
                found
            }
            None => {
                let found = scan_combos(
                    self.category_option_combos(),
                    &key.1,
                    &self.catalog.aliases.age_groups,
                );
                trace!(data_element = self.raw.id.as_str(), options = ?key.1, ?found, "combo scan");
                memo.misses += 1;
                memo.entries.insert(key.clone(), found.clone());
                found
            }
        };
        drop(memo);

        found.ok_or_else(|| {
            self.catalog.not_found(
                CatalogKind::CategoryOptionCombo,
                format!("{} [{}]", self.raw.name, key.1.join(", ")),
            )
        })
    }
}

impl fmt::Debug for DataElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataElement")
            .field("id", &self.raw.id)
            .field("name", &self.raw.name)
            .finish()
    }
}

impl fmt::Display for DataElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.raw) {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "{} ({})", self.raw.name, self.raw.id),
        }
    }
}

fn scan_combos(
    combos: &[CategoryOptionCombo],
    options: &[String],
    age_groups: &AliasMap,
) -> Option<ComboMatch> {
    combos
        .iter()
        .find(|combo| {
            combo
                .category_options
                .iter()
                .all(|category_option| {
                    options
                        .iter()
                        .any(|option| option_matches(category_option, option, age_groups))
                })
        })
        .map(|combo| ComboMatch {
            id: combo.id.clone(),
            name: combo.name.clone(),
        })
}

fn option_matches(category_option: &IdName, option: &str, age_groups: &AliasMap) -> bool {
    if category_option.name == option || category_option.id == option {
        return true;
    }
    age_groups
        .get(option)
        .is_some_and(|alias| category_option.name == alias || category_option.id == alias)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn data_elements(aliases: AliasTable) -> DataElements {
        let records: Vec<RawDataElement> = serde_json::from_value(json!([
            {"id": "de-opd", "name": "OPD attendance", "categoryCombo": {
                "id": "cc-age-sex", "name": "Age and sex",
                "categoryOptionCombos": [
                    {"id": "coc-u5-m", "name": "<5 years, Male", "categoryOptions": [
                        {"id": "co-u5", "name": "<5 years"}, {"id": "co-m", "name": "Male"}]},
                    {"id": "coc-5p-m", "name": "5+ years, Male", "categoryOptions": [
                        {"id": "co-5p", "name": "5+ years"}, {"id": "co-m", "name": "Male"}]},
                    {"id": "coc-u5-f", "name": "<5 years, Female", "categoryOptions": [
                        {"id": "co-u5", "name": "<5 years"}, {"id": "co-f", "name": "Female"}]}
                ]}},
            {"id": "de-bare", "name": "Bare element"}
        ]))
        .unwrap();
        DataElements::from_records("https://hmis.example.org/", records, Arc::new(aliases))
    }

    #[test]
    fn every_combo_option_must_be_covered() {
        let catalog = data_elements(AliasTable::empty());
        let element = catalog.get_by_id("de-opd").unwrap();
        assert_matches!(
            element.find_category_combo(&["Male"]),
            Err(HmisError::NotFound { kind: CatalogKind::CategoryOptionCombo, .. })
        );
        let found = element.find_category_combo(&["co-5p", "co-m"]).unwrap();
        assert_eq!(found.id, "coc-5p-m");
    }

    #[test]
    fn age_group_aliases_apply_to_options() {
        let mut aliases = AliasTable::empty();
        aliases.age_groups.insert("under five", "<5 years");
        let catalog = data_elements(aliases);
        let element = catalog.lookup_by_name("OPD attendance").unwrap();
        let found = element.find_category_combo(&["Female", "under five"]).unwrap();
        assert_eq!(found.name, "<5 years, Female");
    }

    #[test]
    fn memo_is_keyed_on_option_set() {
        let catalog = data_elements(AliasTable::empty());
        let element = catalog.get_by_id("de-opd").unwrap();
        let first = element.find_category_combo(&["Male", "<5 years"]).unwrap();
        let second = element.find_category_combo(&["<5 years", "Male", "Male"]).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            catalog.combo_memo_stats(),
            MemoStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
    }

    #[test]
    fn misses_are_memoized_too() {
        let catalog = data_elements(AliasTable::empty());
        let element = catalog.get_by_id("de-bare").unwrap();
        assert!(element.find_category_combo(&["Male"]).is_err());
        assert!(element.find_category_combo(&["Male"]).is_err());
        assert_eq!(catalog.combo_memo_stats().hits, 1);
    }

    #[test]
    fn indicator_alias_falls_back_to_literal() {
        let mut aliases = AliasTable::empty();
        aliases.indicators.insert("OPD", "OPD attendance");
        aliases.indicators.insert("Bare element", "Renamed element");
        let catalog = data_elements(aliases);
        assert_eq!(catalog.lookup_by_name("OPD").unwrap().id(), "de-opd");
        assert_eq!(catalog.lookup_by_name("Bare element").unwrap().id(), "de-bare");
        let err = catalog.lookup_by_name("IPD admissions").unwrap_err();
        assert_matches!(err, HmisError::NotFound { kind: CatalogKind::DataElement, .. });
    }
}
