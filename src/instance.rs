use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::aliases::AliasTable;
use crate::cache::MetadataCache;
use crate::catalog::{DataElements, DataSets, OrgUnitSnapshot, OrgUnits};
use crate::client::{Dhis2HttpClient, MetadataApi};
use crate::config::ResolvedConfig;
use crate::error::HmisError;

/// One DHIS2 server plus the alias table every catalog built from it shares.
/// Org units go through the metadata cache when one is attached.
pub struct Dhis2<A: MetadataApi> {
    api: A,
    aliases: Arc<AliasTable>,
    cache: Option<MetadataCache>,
}

impl Dhis2<Dhis2HttpClient> {
    pub fn from_config(config: &ResolvedConfig, use_cache: bool) -> Result<Self, HmisError> {
        let api = Dhis2HttpClient::new(
            &config.server_url,
            config.credentials.clone(),
            config.timeout,
        )?;
        let aliases = match &config.mappings_dir {
            Some(dir) => AliasTable::load_dir(dir)?,
            None => AliasTable::empty(),
        };
        let instance = Self::new(api, aliases);
        if !use_cache {
            return Ok(instance);
        }
        let cache = MetadataCache::new(config.cache_dir.clone())
            .with_ttl(config.cache_ttl)
            .for_server(config.server_url.clone());
        Ok(instance.with_cache(cache))
    }
}

impl<A: MetadataApi> Dhis2<A> {
    pub fn new(api: A, aliases: AliasTable) -> Self {
        Self {
            api,
            aliases: Arc::new(aliases),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn server_url(&self) -> &str {
        self.api.server_url()
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn cache(&self) -> Option<&MetadataCache> {
        self.cache.as_ref()
    }

    pub fn org_units(&self) -> Result<OrgUnits, HmisError> {
        let started = Instant::now();
        let snapshot = match &self.cache {
            Some(cache) => cache.load_or_build(|| OrgUnitSnapshot::fetch(&self.api))?,
            None => OrgUnitSnapshot::fetch(&self.api)?,
        };
        let org_units = OrgUnits::from_snapshot(snapshot, Arc::clone(&self.aliases));
        info!(
            size = org_units.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "org units ready"
        );
        Ok(org_units)
    }

    pub fn data_sets(&self) -> Result<DataSets, HmisError> {
        let started = Instant::now();
        let data_sets = DataSets::fetch(&self.api)?;
        info!(
            size = data_sets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "data sets ready"
        );
        Ok(data_sets)
    }

    pub fn data_elements(&self) -> Result<DataElements, HmisError> {
        let started = Instant::now();
        let data_elements = DataElements::fetch(&self.api, Arc::clone(&self.aliases))?;
        info!(
            size = data_elements.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "data elements ready"
        );
        Ok(data_elements)
    }
}

impl<A: MetadataApi> fmt::Debug for Dhis2<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dhis2")
            .field("server_url", &self.api.server_url())
            .field("cache", &self.cache)
            .finish()
    }
}
