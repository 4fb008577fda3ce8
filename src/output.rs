use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    AncestorsResult, CacheClearResult, ComboResult, DataSetResult, MetadataSummary, OrgUnitResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_metadata(result: &MetadataSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_ancestors(result: &AncestorsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_org_unit(result: &OrgUnitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_combo(result: &ComboResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_data_set(result: &DataSetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cache_clear(result: &CacheClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
