// src/views.rs
//! HTML pages. Every dynamic value goes through `escape` before it is
//! placed in markup.

use crate::models::{LedgerEntry, Portfolio, Quote};
use crate::money::usd;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, logged_in: bool, main: &str) -> String {
    let nav = if logged_in {
        r#"<ul>
      <li><a href="/quote">Quote</a></li>
      <li><a href="/buy">Buy</a></li>
      <li><a href="/sell">Sell</a></li>
      <li><a href="/cash">Add Cash</a></li>
      <li><a href="/history">History</a></li>
      <li><a href="/logout">Log Out</a></li>
    </ul>"#
    } else {
        r#"<ul>
      <li><a href="/register">Register</a></li>
      <li><a href="/login">Log In</a></li>
    </ul>"#
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="initial-scale=1, width=device-width">
  <title>Finance: {title}</title>
</head>
<body>
  <nav>
    <a href="/">Finance</a>
    {nav}
  </nav>
  <main>
{main}
  </main>
</body>
</html>
"#,
        title = escape(title),
        nav = nav,
        main = main,
    )
}

fn form(action: &str, fields: &str, button: &str) -> String {
    format!(
        r#"<form action="{}" method="post">
{}
  <button type="submit">{}</button>
</form>"#,
        action, fields, button
    )
}

fn input(name: &str, kind: &str, placeholder: &str) -> String {
    format!(
        r#"  <div><input autocomplete="off" name="{name}" placeholder="{placeholder}" type="{kind}"></div>"#,
        name = name,
        kind = kind,
        placeholder = placeholder,
    )
}

pub fn login() -> String {
    let fields = [
        input("username", "text", "Username"),
        input("password", "password", "Password"),
    ]
    .join("\n");
    layout("Log In", false, &form("/login", &fields, "Log In"))
}

pub fn register() -> String {
    let fields = [
        input("username", "text", "Username"),
        input("password", "password", "Password"),
        input("confirmation", "password", "Confirm password"),
    ]
    .join("\n");
    layout("Register", false, &form("/register", &fields, "Register"))
}

pub fn quote_form() -> String {
    layout(
        "Quote",
        true,
        &form("/quote", &input("symbol", "text", "Symbol"), "Quote"),
    )
}

pub fn quoted(quote: &Quote) -> String {
    let body = format!(
        "<p>A share of {} ({}) costs {}.</p>",
        escape(&quote.name),
        escape(&quote.symbol),
        usd(quote.price)
    );
    layout("Quoted", true, &body)
}

pub fn buy_form() -> String {
    let fields = [
        input("symbol", "text", "Symbol"),
        input("shares", "number", "Shares"),
    ]
    .join("\n");
    layout("Buy", true, &form("/buy", &fields, "Buy"))
}

pub fn sell_form(symbols: &[String]) -> String {
    let options: String = symbols
        .iter()
        .map(|s| {
            let s = escape(s);
            format!(r#"<option value="{}">{}</option>"#, s, s)
        })
        .collect();
    let fields = format!(
        r#"  <div><select name="symbol"><option disabled selected value="">Symbol</option>{}</select></div>
{}"#,
        options,
        input("shares", "number", "Shares")
    );
    layout("Sell", true, &form("/sell", &fields, "Sell"))
}

pub fn cash_form() -> String {
    layout(
        "Add Cash",
        true,
        &form("/cash", &input("amount", "text", "Amount"), "Add Cash"),
    )
}

pub fn index(portfolio: &Portfolio) -> String {
    let rows: String = portfolio
        .positions
        .iter()
        .map(|p| {
            format!(
                "    <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&p.symbol),
                escape(&p.name),
                p.shares,
                usd(p.price),
                usd(p.total)
            )
        })
        .collect();
    let body = format!(
        r#"<table>
  <thead>
    <tr><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr>
  </thead>
  <tbody>
{rows}    <tr><td colspan="4">CASH</td><td>{cash}</td></tr>
  </tbody>
  <tfoot>
    <tr><td colspan="4"></td><td>{total}</td></tr>
  </tfoot>
</table>"#,
        rows = rows,
        cash = usd(portfolio.cash),
        total = usd(portfolio.grand_total),
    );
    layout("Portfolio", true, &body)
}

pub fn history(entries: &[LedgerEntry]) -> String {
    let rows: String = entries
        .iter()
        .map(|e| {
            format!(
                "    <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&e.symbol),
                e.shares,
                usd(e.price),
                escape(&e.date),
                escape(&e.time)
            )
        })
        .collect();
    let body = format!(
        r#"<table>
  <thead>
    <tr><th>Symbol</th><th>Shares</th><th>Price</th><th>Date</th><th>Time</th></tr>
  </thead>
  <tbody>
{}  </tbody>
</table>"#,
        rows
    );
    layout("History", true, &body)
}

/// The page every failure is rendered with.
pub fn apology(code: u16, message: &str) -> String {
    let body = format!(
        r#"<h1 class="apology">{}</h1>
<p>{}</p>"#,
        code,
        escape(message)
    );
    layout("Apology", false, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use rust_decimal_macros::dec;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#x27;s&lt;/a&gt;"
        );
    }

    #[test]
    fn index_shows_currency_totals() {
        let page = index(&Portfolio {
            positions: vec![Position {
                symbol: "AAPL".into(),
                name: "Apple Inc.".into(),
                shares: 5,
                price: dec!(150),
                total: dec!(750),
            }],
            cash: dec!(9250),
            grand_total: dec!(10000),
        });
        assert!(page.contains("<td>AAPL</td><td>Apple Inc.</td><td>5</td><td>$150.00</td><td>$750.00</td>"));
        assert!(page.contains("$9,250.00"));
        assert!(page.contains("$10,000.00"));
    }

    #[test]
    fn sell_form_lists_symbols() {
        let page = sell_form(&["AAPL".to_string(), "MSFT".to_string()]);
        assert!(page.contains(r#"<option value="AAPL">AAPL</option>"#));
        assert!(page.contains(r#"<option value="MSFT">MSFT</option>"#));
    }

    #[test]
    fn apology_carries_code_and_message() {
        let page = apology(400, "must provide <symbol>");
        assert!(page.contains("400"));
        assert!(page.contains("must provide &lt;symbol&gt;"));
    }
}
