use std::fmt;

use anyhow::Result;
use serde_json::Value;

use crate::error::FetchError;
use crate::fbref::{TableMatch, extract_table};
use crate::http_client::{FetchPolicy, HttpFetcher};
use crate::table::Table;
use crate::transfermarkt::parse_market_value_page;

/// Which table of a fetched page to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLocator {
    /// `<table id="...">`, in the DOM or inside a comment.
    ElementId(String),
    /// First table whose id ends with the suffix (season-specific ids).
    IdSuffix(String),
    /// The player rows of a Transfermarkt market-value list.
    MarketValueList,
}

impl fmt::Display for TableLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLocator::ElementId(id) => write!(f, "#{id}"),
            TableLocator::IdSuffix(suffix) => write!(f, "*{suffix}"),
            TableLocator::MarketValueList => write!(f, "market-value list"),
        }
    }
}

/// Fetch collaborator: pages come back as already-flattened tables.
pub trait Source {
    fn fetch_table(&mut self, url: &str, locator: &TableLocator) -> Result<Table, FetchError>;
    fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError>;
}

/// Live web source over one HTTP session.
pub struct WebSource {
    fetcher: HttpFetcher,
}

impl WebSource {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(policy)?,
        })
    }
}

impl Source for WebSource {
    fn fetch_table(&mut self, url: &str, locator: &TableLocator) -> Result<Table, FetchError> {
        let html = self.fetcher.get_text(url)?;
        match locator {
            TableLocator::ElementId(id) => extract_table(&html, TableMatch::Id(id), id),
            TableLocator::IdSuffix(suffix) => extract_table(&html, TableMatch::IdSuffix(suffix), suffix),
            TableLocator::MarketValueList => Ok(parse_market_value_page(&html)),
        }
    }

    fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError> {
        self.fetcher.get_json(url)
    }
}
