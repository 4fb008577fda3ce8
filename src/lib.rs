//! Client for the metadata side of DHIS2-style health information systems.
//!
//! [`instance::Dhis2`] fetches org-unit trees, data sets and data elements
//! into indexed catalogs, resolves human-entered aliases through an
//! [`aliases::AliasTable`], and keeps the org-unit snapshot in an on-disk
//! [`cache::MetadataCache`] between runs.

pub mod aliases;
pub mod app;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod instance;
pub mod model;
pub mod output;
