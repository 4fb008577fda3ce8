use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::aliases::AliasTable;
use crate::catalog::{Index, fetch_collection};
use crate::client::MetadataApi;
use crate::error::{CatalogKind, HmisError};
use crate::model::{OrgUnitGroupSet, RawOrgUnit};

pub const ORG_UNIT_FIELDS: &str =
    "id,name,code,parent,ancestors,geometry,organisationUnitGroups[id,name,groupSets]";
pub const GROUP_SET_FIELDS: &str = "id,name,organisationUnitGroups[id,name]";

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// The raw org-unit collection and group-sets as fetched, in server order.
/// This is what the metadata cache persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUnitSnapshot {
    pub server_url: String,
    pub organisation_units: Vec<RawOrgUnit>,
    pub group_sets: Vec<OrgUnitGroupSet>,
}

impl OrgUnitSnapshot {
    pub fn fetch(api: &dyn MetadataApi) -> Result<Self, HmisError> {
        let organisation_units =
            fetch_collection(api, "organisationUnits", "organisationUnits", ORG_UNIT_FIELDS)?;
        let group_sets = fetch_collection(
            api,
            "organisationUnitGroupSets",
            "organisationUnitGroupSets",
            GROUP_SET_FIELDS,
        )?;
        Ok(Self {
            server_url: api.server_url().to_string(),
            organisation_units,
            group_sets,
        })
    }
}

/// Detached reference to an org unit. Only valid against the snapshot
/// generation it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrgUnitHandle {
    generation: u64,
    position: usize,
}

impl OrgUnitHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Indexed org-unit catalog. Immutable once built; every rebuild or cache
/// rehydration gets a fresh generation.
#[derive(Debug)]
pub struct OrgUnits {
    snapshot: OrgUnitSnapshot,
    index: Index,
    group_set_names: HashMap<String, String>,
    aliases: Arc<AliasTable>,
    generation: u64,
}

impl OrgUnits {
    pub fn fetch(api: &dyn MetadataApi, aliases: Arc<AliasTable>) -> Result<Self, HmisError> {
        Ok(Self::from_snapshot(OrgUnitSnapshot::fetch(api)?, aliases))
    }

    pub fn from_snapshot(snapshot: OrgUnitSnapshot, aliases: Arc<AliasTable>) -> Self {
        let index = Index::build("organisationUnits", &snapshot.organisation_units);
        let group_set_names = snapshot
            .group_sets
            .iter()
            .map(|group_set| (group_set.id.clone(), group_set.name.clone()))
            .collect();
        Self {
            snapshot,
            index,
            group_set_names,
            aliases,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> &OrgUnitSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> OrgUnitSnapshot {
        self.snapshot
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn server_url(&self) -> &str {
        &self.snapshot.server_url
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.snapshot.organisation_units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.organisation_units.is_empty()
    }

    pub fn group_set_name(&self, id: &str) -> Option<&str> {
        self.group_set_names.get(id).map(String::as_str)
    }

    pub fn get_by_index(&self, position: usize) -> Result<OrgUnit<'_>, HmisError> {
        if position >= self.len() {
            return Err(self.not_found(position.to_string()));
        }
        Ok(self.wrap(position))
    }

    pub fn get_by_id(&self, id: &str) -> Result<OrgUnit<'_>, HmisError> {
        self.index
            .position_by_id(id)
            .map(|position| self.wrap(position))
            .ok_or_else(|| self.not_found(id))
    }

    /// Resolves through the org-unit aliases first, then the literal name.
    pub fn lookup_by_name(&self, name: &str) -> Result<OrgUnit<'_>, HmisError> {
        self.aliases
            .org_units
            .resolve(name, |candidate| self.index.position_by_name(candidate))
            .map(|position| self.wrap(position))
            .ok_or_else(|| self.not_found(name))
    }

    /// Membership by id. Names are not considered.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_id(id)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            org_units: self,
            position: 0,
        }
    }

    /// Ancestor names, root first, of the unit called `name`.
    pub fn ancestor_path(&self, name: &str) -> Result<Vec<String>, HmisError> {
        let unit = self.lookup_by_name(name)?;
        self.ancestor_names(unit.raw())
    }

    pub fn resolve(&self, handle: OrgUnitHandle) -> Result<OrgUnit<'_>, HmisError> {
        if handle.generation != self.generation {
            return Err(HmisError::StaleHandle {
                handle: handle.generation,
                current: self.generation,
            });
        }
        self.get_by_index(handle.position)
    }

    fn ancestor_names(&self, raw: &RawOrgUnit) -> Result<Vec<String>, HmisError> {
        raw.ancestors
            .iter()
            .map(|ancestor| {
                self.index
                    .position_by_id(&ancestor.id)
                    .map(|position| self.snapshot.organisation_units[position].name.clone())
                    .ok_or_else(|| self.not_found(ancestor.id.as_str()))
            })
            .collect()
    }

    fn wrap(&self, position: usize) -> OrgUnit<'_> {
        OrgUnit::new(&self.snapshot.organisation_units[position], position, self)
    }

    fn not_found(&self, key: impl Into<String>) -> HmisError {
        HmisError::not_found(CatalogKind::OrgUnit, key, self.server_url())
    }
}

impl fmt::Display for OrgUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server_url: {}, size: {}", self.server_url(), self.len())
    }
}

impl<'a> IntoIterator for &'a OrgUnits {
    type Item = OrgUnit<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Wraps each unit lazily, in fetch order.
pub struct Iter<'a> {
    org_units: &'a OrgUnits,
    position: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = OrgUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.org_units.len() {
            return None;
        }
        let unit = self.org_units.wrap(self.position);
        self.position += 1;
        Some(unit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.org_units.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// One org unit borrowed from its catalog, with group memberships split
/// into group-set attributes and free groups.
#[derive(Clone)]
pub struct OrgUnit<'a> {
    raw: &'a RawOrgUnit,
    position: usize,
    org_units: &'a OrgUnits,
    attributes: BTreeMap<String, String>,
    free_groups: Vec<String>,
}

impl<'a> OrgUnit<'a> {
    fn new(raw: &'a RawOrgUnit, position: usize, org_units: &'a OrgUnits) -> Self {
        let mut attributes = BTreeMap::new();
        let mut free_groups = Vec::new();
        for group in &raw.organisation_unit_groups {
            match &group.group_sets {
                // First group-set of the group decides; later ones are ignored.
                Some(group_sets) => {
                    let Some(group_set) = group_sets.first() else {
                        continue;
                    };
                    match org_units.group_set_name(&group_set.id) {
                        Some(group_set_name) => {
                            attributes
                                .entry(group_set_name.to_string())
                                .or_insert_with(|| group.name.clone());
                        }
                        None => warn!(
                            org_unit = raw.id.as_str(),
                            group_set = group_set.id.as_str(),
                            "group references unknown group set"
                        ),
                    }
                }
                None => free_groups.push(group.name.clone()),
            }
        }
        Self {
            raw,
            position,
            org_units,
            attributes,
            free_groups,
        }
    }

    pub fn raw(&self) -> &'a RawOrgUnit {
        self.raw
    }

    pub fn id(&self) -> &'a str {
        &self.raw.id
    }

    pub fn name(&self) -> &'a str {
        &self.raw.name
    }

    pub fn code(&self) -> Option<&'a str> {
        self.raw.code.as_deref()
    }

    pub fn parent_id(&self) -> Option<&'a str> {
        self.raw.parent.as_ref().map(|parent| parent.id.as_str())
    }

    pub fn geometry(&self) -> Option<&'a Value> {
        self.raw.geometry.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.raw.depth()
    }

    pub fn attribute(&self, group_set_name: &str) -> Option<&str> {
        self.attributes.get(group_set_name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn free_groups(&self) -> &[String] {
        &self.free_groups
    }

    pub fn handle(&self) -> OrgUnitHandle {
        OrgUnitHandle {
            generation: self.org_units.generation,
            position: self.position,
        }
    }

    /// Raw record first, then derived group-set attributes.
    pub fn get_field(&self, key: &str) -> Result<Value, HmisError> {
        let raw_value = match key {
            "id" => Some(Value::String(self.raw.id.clone())),
            "name" => Some(Value::String(self.raw.name.clone())),
            "code" => self.raw.code.clone().map(Value::String),
            "parent" => self.raw.parent.as_ref().and_then(to_value),
            "ancestors" => to_value(&self.raw.ancestors),
            "geometry" => self.raw.geometry.clone(),
            "organisationUnitGroups" => to_value(&self.raw.organisation_unit_groups),
            other => self.raw.extra.get(other).cloned(),
        };
        raw_value
            .or_else(|| self.attribute(key).map(|value| Value::String(value.to_string())))
            .ok_or_else(|| {
                HmisError::not_found(CatalogKind::Field, key, self.org_units.server_url())
            })
    }

    /// Ancestor names, root first, walked through the owning catalog by id.
    pub fn ancestor_path(&self) -> Result<Vec<String>, HmisError> {
        self.org_units.ancestor_names(self.raw)
    }

    /// Raw fields with group memberships replaced by the free groups, plus
    /// one key per derived attribute.
    pub fn to_json(&self) -> Value {
        let mut object = match to_value(self.raw) {
            Some(Value::Object(object)) => object,
            _ => Map::new(),
        };
        object.remove("dataSets");
        object.insert(
            "organisationUnitGroups".to_string(),
            Value::from(self.free_groups.clone()),
        );
        for (key, value) in &self.attributes {
            object.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(object)
    }
}

impl fmt::Debug for OrgUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrgUnit")
            .field("id", &self.raw.id)
            .field("name", &self.raw.name)
            .field("generation", &self.org_units.generation)
            .field("attributes", &self.attributes)
            .field("free_groups", &self.free_groups)
            .finish()
    }
}

impl PartialEq for OrgUnit<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.org_units, other.org_units) && self.position == other.position
    }
}

impl fmt::Display for OrgUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}
