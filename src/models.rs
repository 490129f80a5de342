// src/models.rs
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;

/// Identity of the authenticated user for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub hash: String,
    pub cash: Decimal,
    pub session_gen: i64,
}

/// One row of the append-only ledger. Positive shares are buys, negative
/// shares are sells.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub name: String,
    pub price: Decimal,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub positions: Vec<Position>,
    pub cash: Decimal,
    pub grand_total: Decimal,
}

/// Outcome of an executed buy or sell, as written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
}

// Form bodies. Every field is optional so that a missing field reaches the
// handler and is reported with the proper message instead of a body error.

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteForm {
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    pub symbol: Option<String>,
    pub shares: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CashForm {
    pub amount: Option<String>,
}
