use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::error::HmisError;

pub const ORGUNIT_ALIASES_FILE: &str = "orgunits.json";
pub const INDICATOR_ALIASES_FILE: &str = "indicators.json";
pub const AGE_GROUP_ALIASES_FILE: &str = "agegroups.json";

/// Human-entered name to canonical catalog name, for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    entries: HashMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.entries.insert(alias.into(), canonical.into());
    }

    pub fn extend(&mut self, other: AliasMap) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tries the alias target first, then the key itself.
    pub fn resolve<T>(&self, key: &str, mut lookup: impl FnMut(&str) -> Option<T>) -> Option<T> {
        if let Some(canonical) = self.get(key) {
            if let Some(found) = lookup(canonical) {
                return Some(found);
            }
            debug!(alias = key, canonical, "alias target not found, falling back to literal name");
        }
        lookup(key)
    }

    pub fn parse(content: &str) -> Result<Self, HmisError> {
        Self::parse_from(content, None)
    }

    fn parse_from(content: &str, source: Option<&Utf8Path>) -> Result<Self, HmisError> {
        let entries: HashMap<String, String> = serde_json::from_str(content).map_err(|err| {
            let source = source.map(|path| format!(" {path}")).unwrap_or_default();
            HmisError::Config(format!("malformed alias mapping{source}: {err}"))
        })?;
        Ok(Self { entries })
    }

    pub fn load(path: &Utf8Path) -> Result<Self, HmisError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HmisError::Config(format!("failed to read {path}: {err}")))?;
        Self::parse_from(&content, Some(path))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AliasMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// The three alias registries consulted by catalog lookups. Loaded once at
/// startup and handed to each catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    pub indicators: AliasMap,
    pub age_groups: AliasMap,
    pub org_units: AliasMap,
}

impl AliasTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads `orgunits.json` (required) plus `indicators.json` and
    /// `agegroups.json` when present.
    pub fn load_dir(dir: &Utf8Path) -> Result<Self, HmisError> {
        let org_units_path = dir.join(ORGUNIT_ALIASES_FILE);
        if !org_units_path.as_std_path().exists() {
            return Err(HmisError::Config(format!(
                "missing org unit alias mapping {org_units_path}"
            )));
        }
        let table = Self {
            org_units: AliasMap::load(&org_units_path)?,
            indicators: load_optional(&dir.join(INDICATOR_ALIASES_FILE))?,
            age_groups: load_optional(&dir.join(AGE_GROUP_ALIASES_FILE))?,
        };
        info!(
            org_units = table.org_units.len(),
            indicators = table.indicators.len(),
            age_groups = table.age_groups.len(),
            "loaded alias mappings from {dir}"
        );
        Ok(table)
    }
}

fn load_optional(path: &Utf8Path) -> Result<AliasMap, HmisError> {
    if path.as_std_path().exists() {
        AliasMap::load(path)
    } else {
        Ok(AliasMap::new())
    }
}
