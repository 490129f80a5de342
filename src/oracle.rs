// src/oracle.rs
use crate::error::OracleError;
use crate::models::Quote;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

/// Source of current market prices. `Ok(None)` means the symbol is unknown.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, OracleError>;
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

/// Quotes from Alpha Vantage: `GLOBAL_QUOTE` for the price and
/// `SYMBOL_SEARCH` for the company name.
pub struct AlphaVantageOracle {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageOracle {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        AlphaVantageOracle {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        function: &str,
        param: (&str, &str),
    ) -> Result<T, OracleError> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        debug!("Querying {} {} for {}", url, function, param.1);
        let response = self
            .client
            .get(&url)
            .query(&[("function", function), param, ("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PriceOracle for AlphaVantageOracle {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, OracleError> {
        let (quote, search) = tokio::try_join!(
            self.query::<GlobalQuoteResponse>("GLOBAL_QUOTE", ("symbol", symbol)),
            self.query::<SymbolSearchResponse>("SYMBOL_SEARCH", ("keywords", symbol)),
        )?;
        parse_quote(quote, search)
    }
}

fn parse_quote(
    response: GlobalQuoteResponse,
    search: SymbolSearchResponse,
) -> Result<Option<Quote>, OracleError> {
    if let Some(message) = response.note.or(response.information) {
        warn!("Quote source refused request: {}", message);
        return Err(OracleError::Throttled(message));
    }
    // Unknown symbols come back as an empty "Global Quote" object.
    let (symbol, raw_price) = match response.quote {
        Some(GlobalQuote {
            symbol: Some(symbol),
            price: Some(price),
        }) => (symbol, price),
        _ => return Ok(None),
    };
    let price = Decimal::from_str(raw_price.trim()).map_err(|_| OracleError::BadPrice(raw_price))?;

    let name = search
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(&symbol))
        .map(|m| m.name)
        .unwrap_or_else(|| symbol.clone());

    Ok(Some(Quote {
        name,
        price,
        symbol,
    }))
}

/// In-process oracle with prices set by the caller. Lookups are
/// case-insensitive and return the symbol upper-cased.
#[derive(Default)]
pub struct FixedPriceOracle {
    quotes: RwLock<HashMap<String, (String, Decimal)>>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, name: &str, price: Decimal) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.insert(symbol.to_uppercase(), (name.to_string(), price));
        }
    }

    pub fn remove(&self, symbol: &str) {
        if let Ok(mut quotes) = self.quotes.write() {
            quotes.remove(&symbol.to_uppercase());
        }
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, OracleError> {
        let symbol = symbol.to_uppercase();
        let quotes = match self.quotes.read() {
            Ok(quotes) => quotes,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(quotes.get(&symbol).map(|(name, price)| Quote {
            name: name.clone(),
            price: *price,
            symbol,
        }))
    }
}
