// src/ledger.rs
//! Holdings and cash bookkeeping on top of the append-only ledger.
//!
//! Holdings are never stored: they are folded from the user's ledger rows on
//! every call. Buy, sell and deposit each run as one store transaction that
//! reads the current state, validates it and writes the ledger row and the new
//! cash balance together.

use crate::db::{self, Database};
use crate::error::AppError;
use crate::models::{LedgerEntry, Portfolio, Position, Quote, Trade, UserId};
use crate::money::round_cents;
use crate::oracle::PriceOracle;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Largest share count accepted for a single trade.
pub const MAX_SHARES: i64 = 1_000_000_000;

/// Net shares per symbol, ordered by symbol. Symbols that net to zero are
/// left out.
pub fn holdings(entries: &[LedgerEntry]) -> Result<BTreeMap<String, i64>, AppError> {
    let mut net = BTreeMap::new();
    for entry in entries {
        let held = net.entry(entry.symbol.clone()).or_insert(0i64);
        *held = held
            .checked_add(entry.shares)
            .ok_or_else(|| AppError::Overflow(entry.symbol.clone()))?;
    }
    net.retain(|_, shares| *shares != 0);
    Ok(net)
}

pub fn shares_held(entries: &[LedgerEntry], symbol: &str) -> Result<i64, AppError> {
    entries
        .iter()
        .filter(|e| e.symbol == symbol)
        .try_fold(0i64, |held, e| held.checked_add(e.shares))
        .ok_or_else(|| AppError::Overflow(symbol.to_string()))
}

fn last_price(entries: &[LedgerEntry], symbol: &str) -> Option<Decimal> {
    entries
        .iter()
        .rev()
        .find(|e| e.symbol == symbol)
        .map(|e| e.price)
}

/// `round(price * shares, 2)`, or `None` when the product does not fit.
fn cost(price: Decimal, shares: i64) -> Option<Decimal> {
    price.checked_mul(Decimal::from(shares)).map(round_cents)
}

/// Values positions at the given quotes. `total = round(shares * price, 2)`
/// and the grand total starts from cash.
pub fn value(cash: Decimal, held: Vec<(i64, Quote)>) -> Result<Portfolio, AppError> {
    let mut grand_total = cash;
    let mut positions = Vec::with_capacity(held.len());
    for (shares, quote) in held {
        let total = cost(quote.price, shares)
            .ok_or_else(|| AppError::Overflow(quote.symbol.clone()))?;
        grand_total = grand_total
            .checked_add(total)
            .ok_or_else(|| AppError::Overflow(quote.symbol.clone()))?;
        positions.push(Position {
            symbol: quote.symbol,
            name: quote.name,
            shares,
            price: quote.price,
            total,
        });
    }
    Ok(Portfolio {
        positions,
        cash,
        grand_total,
    })
}

pub async fn portfolio(
    db: &Database,
    oracle: &dyn PriceOracle,
    user: UserId,
) -> Result<Portfolio, AppError> {
    let (cash, entries) = db
        .with_connection(|conn| Ok((db::read_cash(conn, user)?, db::read_ledger(conn, user)?)))
        .await?;

    let mut held = Vec::new();
    for (symbol, shares) in holdings(&entries)? {
        let quote = match oracle.lookup(&symbol).await? {
            Some(quote) => quote,
            None => {
                warn!("No current price for held symbol {}, using last trade", symbol);
                Quote {
                    name: symbol.clone(),
                    price: last_price(&entries, &symbol).unwrap_or_default(),
                    symbol,
                }
            }
        };
        held.push((shares, quote));
    }
    value(cash, held)
}

pub async fn history(db: &Database, user: UserId) -> Result<Vec<LedgerEntry>, AppError> {
    db.ledger(user).await
}

/// Symbols the user currently holds a nonzero amount of.
pub async fn owned_symbols(db: &Database, user: UserId) -> Result<Vec<String>, AppError> {
    let entries = db.ledger(user).await?;
    Ok(holdings(&entries)?.into_keys().collect())
}

pub async fn quote(oracle: &dyn PriceOracle, symbol: Option<&str>) -> Result<Quote, AppError> {
    let symbol = required(symbol, "must provide stock symbol")?;
    resolve(oracle, &symbol).await
}

pub async fn buy(
    db: &Database,
    oracle: &dyn PriceOracle,
    user: UserId,
    symbol: Option<&str>,
    shares: Option<&str>,
) -> Result<Trade, AppError> {
    let symbol = required(symbol, "must provide stock symbol")?;
    let shares = required(shares, "must provide number of shares to purchase")?;
    let quote = resolve(oracle, &symbol).await?;
    let shares = parse_shares(&shares)?;

    let (symbol, price) = tradable(quote)?;
    let total = cost(price, shares).ok_or(AppError::InsufficientFunds)?;

    db.transaction(|conn| {
        let cash = db::read_cash(conn, user)?;
        if cash < total {
            return Err(AppError::InsufficientFunds);
        }
        let entries = db::read_ledger(conn, user)?;
        shares_held(&entries, &symbol)?
            .checked_add(shares)
            .ok_or_else(|| AppError::validation("must provide valid number of shares"))?;
        db::append_entry(conn, user, &symbol, shares, price)?;
        db::write_cash(conn, user, cash - total)?;
        Ok(())
    })
    .await?;

    info!("User {} bought {} {} at {}", user, shares, symbol, price);
    Ok(Trade {
        symbol,
        shares,
        price,
        total,
    })
}

pub async fn sell(
    db: &Database,
    oracle: &dyn PriceOracle,
    user: UserId,
    symbol: Option<&str>,
    shares: Option<&str>,
) -> Result<Trade, AppError> {
    let shares = required(shares, "must provide number of shares to sell")?;
    let shares = parse_shares(&shares)?;
    let symbol = required(symbol, "must provide valid stock symbol")?;

    // Refuse before asking for a price if the user cannot cover the sale.
    let entries = db.ledger(user).await?;
    if shares_held(&entries, &symbol.to_uppercase())? < shares {
        return Err(AppError::InsufficientShares);
    }

    let quote = resolve(oracle, &symbol).await?;
    let (symbol, price) = tradable(quote)?;
    let total = cost(price, shares).ok_or_else(|| AppError::Overflow(symbol.clone()))?;

    db.transaction(|conn| {
        let entries = db::read_ledger(conn, user)?;
        if shares_held(&entries, &symbol)? < shares {
            return Err(AppError::InsufficientShares);
        }
        let cash = db::read_cash(conn, user)?
            .checked_add(total)
            .ok_or_else(|| AppError::Overflow(symbol.clone()))?;
        db::append_entry(conn, user, &symbol, -shares, price)?;
        db::write_cash(conn, user, cash)?;
        Ok(())
    })
    .await?;

    info!("User {} sold {} {} at {}", user, shares, symbol, price);
    Ok(Trade {
        symbol,
        shares: -shares,
        price,
        total,
    })
}

/// Adds cash to the account. Deposits do not appear in the ledger.
pub async fn deposit(db: &Database, user: UserId, amount: Option<&str>) -> Result<Decimal, AppError> {
    let amount = required(amount, "must provide amount of cash to add")?;
    let amount = parse_amount(&amount)?;

    let cash = db
        .transaction(|conn| {
            let cash = db::read_cash(conn, user)?
                .checked_add(amount)
                .ok_or_else(|| AppError::validation("must provide valid amount of cash to add"))?;
            db::write_cash(conn, user, cash)?;
            Ok(cash)
        })
        .await?;

    info!("User {} deposited {}", user, amount);
    Ok(cash)
}

fn required(value: Option<&str>, message: &str) -> Result<String, AppError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::validation(message)),
    }
}

async fn resolve(oracle: &dyn PriceOracle, symbol: &str) -> Result<Quote, AppError> {
    oracle
        .lookup(symbol)
        .await?
        .ok_or_else(|| AppError::SymbolNotFound(symbol.to_string()))
}

/// The canonical symbol and the cent-rounded trade price. A quote that rounds
/// to nothing cannot be traded.
fn tradable(quote: Quote) -> Result<(String, Decimal), AppError> {
    let price = round_cents(quote.price);
    if price <= Decimal::ZERO {
        return Err(AppError::SymbolNotFound(quote.symbol));
    }
    Ok((quote.symbol, price))
}

/// A whole number of shares between 1 and [`MAX_SHARES`].
pub fn parse_shares(raw: &str) -> Result<i64, AppError> {
    match raw.trim().parse::<i64>() {
        Ok(shares) if shares > 0 && shares <= MAX_SHARES => Ok(shares),
        _ => Err(AppError::validation("must provide valid number of shares")),
    }
}

/// A strictly positive amount with at most two decimal places.
pub fn parse_amount(raw: &str) -> Result<Decimal, AppError> {
    match Decimal::from_str(raw.trim()) {
        Ok(amount) if amount > Decimal::ZERO && amount.normalize().scale() <= 2 => Ok(amount),
        _ => Err(AppError::validation("must provide valid amount of cash to add")),
    }
}
