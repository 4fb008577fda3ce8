mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use hmis_metadata::aliases::AliasTable;
use hmis_metadata::catalog::{DataElements, DataSets, MemoStats};
use hmis_metadata::error::{CatalogKind, HmisError};
use hmis_metadata::instance::Dhis2;

use common::FixtureApi;

fn data_elements_with(aliases: AliasTable) -> DataElements {
    let api = FixtureApi::new();
    DataElements::fetch(&api, Arc::new(aliases)).unwrap()
}

#[test]
fn combo_matches_when_all_options_are_covered() {
    let catalog = data_elements_with(AliasTable::empty());
    let pcr = catalog.lookup_by_name("1st PCR").unwrap();

    let found = pcr.find_category_combo(&["Male", "<5 years"]).unwrap();
    assert_eq!(found.id, "cocU5Male01");
    assert_eq!(found.name, "<5 years, Male");

    let with_extra = pcr
        .find_category_combo(&["Male", "<5 years", "Female"])
        .unwrap();
    assert_eq!(with_extra, found);
}

#[test]
fn combo_lookup_is_order_independent_and_memoized() {
    let catalog = data_elements_with(AliasTable::empty());
    let pcr = catalog.get_by_id("y2G5UdgSfuk").unwrap();

    let first = pcr.find_category_combo(&["5+ years", "Female"]).unwrap();
    let again = pcr.find_category_combo(&["Female", "5+ years"]).unwrap();
    assert_eq!(first, again);
    assert_eq!(first.id, "coc5pFem001");
    assert_eq!(
        catalog.combo_memo_stats(),
        MemoStats {
            entries: 1,
            hits: 1,
            misses: 1
        }
    );

    // Same options on a different element is a different memo entry.
    let positive = catalog.lookup_by_name("Positive").unwrap();
    assert!(positive.find_category_combo(&["5+ years", "Female"]).is_err());
    assert_eq!(catalog.combo_memo_stats().entries, 2);
}

#[test]
fn combo_options_match_by_id() {
    let catalog = data_elements_with(AliasTable::empty());
    let pcr = catalog.get_by_id("y2G5UdgSfuk").unwrap();
    let found = pcr
        .find_category_combo(&["coUnder5y01", "coFemale001"])
        .unwrap();
    assert_eq!(found.id, "cocU5Fem001");
}

#[test]
fn age_group_alias_matches_option_names() {
    let mut aliases = AliasTable::empty();
    aliases.age_groups.insert("Under 5", "<5 years");
    aliases.age_groups.insert("Adults", "co5Plus0001");
    let catalog = data_elements_with(aliases);
    let pcr = catalog.get_by_id("y2G5UdgSfuk").unwrap();

    assert_eq!(
        pcr.find_category_combo(&["Under 5", "Male"]).unwrap().id,
        "cocU5Male01"
    );
    assert_eq!(
        pcr.find_category_combo(&["Adults", "Male"]).unwrap().id,
        "coc5pMale01"
    );
}

#[test]
fn element_without_combo_reports_not_found() {
    let catalog = data_elements_with(AliasTable::empty());
    let linked = catalog.lookup_by_name("Positive Linked to ART").unwrap();
    assert!(linked.category_option_combos().is_empty());
    let err = linked.find_category_combo(&["default"]).unwrap_err();
    assert_matches!(
        err,
        HmisError::NotFound {
            kind: CatalogKind::CategoryOptionCombo,
            ..
        }
    );
}

#[test]
fn indicator_aliases_resolve_before_literal_names() {
    let mut aliases = AliasTable::empty();
    aliases.indicators.insert("First PCR", "1st PCR");
    let catalog = data_elements_with(aliases);
    assert_eq!(catalog.lookup_by_name("First PCR").unwrap().id(), "y2G5UdgSfuk");
    assert_eq!(catalog.lookup_by_name("1st PCR").unwrap().id(), "y2G5UdgSfuk");
    assert_matches!(
        catalog.lookup_by_name("2nd PCR"),
        Err(HmisError::NotFound {
            kind: CatalogKind::DataElement,
            ..
        })
    );
}

#[test]
fn data_set_elements_resolve_through_catalog() {
    let api = FixtureApi::new();
    let instance = Dhis2::new(&api, AliasTable::empty());
    let data_sets: DataSets = instance.data_sets().unwrap();
    let data_elements = instance.data_elements().unwrap();

    let eid = data_sets.lookup_by_name("EID Weekly Report").unwrap();
    let names: Vec<_> = data_elements
        .elements_of(eid)
        .unwrap()
        .iter()
        .map(|element| element.name())
        .collect();
    assert_eq!(names, ["1st PCR", "Positive", "Positive Linked to ART"]);

    let retired = data_sets.get_by_id("brokenSet01").unwrap();
    assert_matches!(
        data_elements.elements_of(retired),
        Err(HmisError::NotFound { ref key, .. }) if key == "goneElement"
    );

    assert_eq!(data_sets.to_string(), "server_url: https://hmis.example.org/, size: 2");
}
