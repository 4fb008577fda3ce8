mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use hmis_metadata::aliases::AliasTable;
use hmis_metadata::app::{self, App};
use hmis_metadata::cache::MetadataCache;
use hmis_metadata::error::HmisError;
use hmis_metadata::instance::Dhis2;

use common::FixtureApi;

#[test]
fn metadata_summary_counts_catalogs() {
    let api = FixtureApi::new();
    let app = App::new(Dhis2::new(&api, AliasTable::empty()));
    let summary = app.metadata().unwrap();
    assert_eq!(summary.org_units, 7);
    assert_eq!(summary.data_sets, 2);
    assert_eq!(summary.data_elements, 3);
    assert_eq!(api.call_count(), 4);
}

#[test]
fn org_unit_result_carries_derived_views() {
    let api = FixtureApi::new();
    let mut aliases = AliasTable::empty();
    aliases.org_units.insert("Kisiizi", "Cou Kisiizi Hospital");
    let app = App::new(Dhis2::new(&api, aliases));

    let result = app.org_unit("Kisiizi").unwrap();
    assert_eq!(result.id, "kSzHosp0001");
    assert_eq!(result.code.as_deref(), Some("UG-KISIIZI"));
    assert_eq!(
        result.ancestors,
        ["Uganda", "Western Region", "Rukungiri District"]
    );
    assert_eq!(result.attributes["Ownership"], "PNFP");
    assert_eq!(result.free_groups, ["Trauma Centres"]);
    assert!(result.geometry.is_some());

    let ancestors = app.ancestors("Kampala District").unwrap();
    assert_eq!(ancestors.ancestors, ["Uganda", "Central Region"]);
}

#[test]
fn combo_and_data_set_results() {
    let api = FixtureApi::new();
    let app = App::new(Dhis2::new(&api, AliasTable::empty()));

    let options = vec!["<5 years".to_string(), "Male".to_string(), "Female".to_string()];
    let combo = app.combo("1st PCR", &options).unwrap();
    assert_eq!(combo.combo.id, "cocU5Male01");
    assert_eq!(combo.data_element_id, "y2G5UdgSfuk");

    let data_set = app.data_set("EID Weekly Report").unwrap();
    assert_eq!(data_set.data_elements.len(), 3);
    assert_eq!(data_set.data_elements[0].name, "1st PCR");

    assert_matches!(app.data_set("HMIS 105"), Err(HmisError::NotFound { .. }));
}

#[test]
fn clear_cache_reports_whether_anything_was_removed() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    let cache = MetadataCache::new(dir);

    let api = FixtureApi::new();
    let app = App::new(Dhis2::new(&api, AliasTable::empty()).with_cache(cache.clone()));
    app.ancestors("Uganda").unwrap();

    let cleared = app::clear_cache(&cache).unwrap();
    assert!(cleared.cleared);
    assert!(cleared.path.ends_with("orgunits.json"));
    assert!(!app::clear_cache(&cache).unwrap().cleared);
}
