use super::text::{element_text, parse_cell_number, parse_transaction_date};
use super::types::{InsiderTrade, TransactionType};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("static selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("static selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("static selector"));

/// Column index per semantic role, taken from a table's first row.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ColumnRoles {
    date: Option<usize>,
    code: Option<usize>,
    shares: Option<usize>,
    price: Option<usize>,
    value: Option<usize>,
}

impl ColumnRoles {
    /// Each header gets at most one role, checked in a fixed order; the
    /// first header claiming a role keeps it.
    fn from_headers(headers: &[String]) -> Self {
        let mut roles = ColumnRoles::default();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.to_lowercase();
            let slot = if header.contains("date") {
                &mut roles.date
            } else if header.contains("transaction") || header.contains("code") {
                &mut roles.code
            } else if header.contains("shares") && !header.contains("acquired") {
                &mut roles.shares
            } else if header.contains("price") {
                &mut roles.price
            } else if header.contains("value") || header.contains("amount") {
                &mut roles.value
            } else {
                continue;
            };
            slot.get_or_insert(idx);
        }
        roles
    }
}

/// Maps a transaction code cell to a trade type by ordered substring checks.
pub fn transaction_type(code: &str) -> TransactionType {
    let code = code.to_uppercase();
    if code.contains('P') || code.contains("PURCHASE") {
        TransactionType::Buy
    } else if code.contains('S') || code.contains("SALE") {
        TransactionType::Sell
    } else if code.contains('A') || code.contains("AWARD") {
        TransactionType::Grant
    } else if code.contains('F') || code.contains("EXERCISE") {
        TransactionType::OptionExercise
    } else {
        TransactionType::Unknown
    }
}

fn cells(row: ElementRef<'_>) -> Vec<String> {
    row.select(&CELL).map(element_text).collect()
}

fn first_text(html: &Html, tag: &str) -> Option<String> {
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name().eq_ignore_ascii_case(tag))
        .map(element_text)
        .filter(|text| !text.is_empty())
}

fn trade_from_row(
    roles: &ColumnRoles,
    cells: &[String],
    insider_name: &Option<String>,
    insider_title: &Option<String>,
) -> Option<InsiderTrade> {
    let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i));

    let transaction_date = cell(roles.date).and_then(|raw| parse_transaction_date(raw))?;
    let transaction_type =
        cell(roles.code).map_or(TransactionType::Unknown, |code| transaction_type(code));

    let shares = cell(roles.shares)
        .and_then(|raw| parse_cell_number(raw))
        .map(|n| n.trunc() as u64);
    let price_per_share = cell(roles.price).and_then(|raw| parse_cell_number(raw));
    let total_value = match cell(roles.value) {
        Some(raw) => parse_cell_number(raw),
        None => match (shares, price_per_share) {
            (Some(shares), Some(price)) if shares > 0 && price > 0.0 => Some(shares as f64 * price),
            _ => None,
        },
    };

    Some(InsiderTrade {
        insider_name: insider_name.clone(),
        insider_title: insider_title.clone(),
        transaction_type,
        shares,
        price_per_share,
        total_value,
        transaction_date,
    })
}

/// Extracts insider transactions from every table with a header and at least one data row.
pub fn extract_insider_trades(markup: &str) -> Vec<InsiderTrade> {
    let html = Html::parse_document(markup);
    let insider_name = first_text(&html, "rptOwnerName");
    let insider_title = first_text(&html, "officerTitle");

    let mut trades = Vec::new();
    for table in html.select(&TABLE) {
        let rows: Vec<ElementRef<'_>> = table.select(&ROW).collect();
        let Some((header, data)) = rows.split_first() else {
            continue;
        };
        if data.is_empty() {
            continue;
        }

        let roles = ColumnRoles::from_headers(&cells(*header));
        log::debug!("Insider table column roles: {:?}", roles);
        trades.extend(data.iter().filter_map(|row| {
            trade_from_row(&roles, &cells(*row), &insider_name, &insider_title)
        }));
    }

    log::info!("Extracted {} insider trades", trades.len());
    trades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::parsing::tests::read_test_file;
    use chrono::NaiveDate;

    #[test]
    fn test_simple_sale_table() {
        let markup = "<table><tr><th>Date</th><th>Transaction Code</th><th>Shares</th><th>Price</th></tr>\
                      <tr><td>01/15/2024</td><td>S</td><td>1000</td><td>150.00</td></tr></table>";
        let trades = extract_insider_trades(markup);
        assert_eq!(
            trades,
            vec![InsiderTrade {
                insider_name: None,
                insider_title: None,
                transaction_type: TransactionType::Sell,
                shares: Some(1000),
                price_per_share: Some(150.0),
                total_value: Some(150_000.0),
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            }]
        );
    }

    #[test]
    fn test_table_without_code_column() {
        let markup = "<table><tr><th>Date</th><th>Shares</th><th>Price</th></tr>\
                      <tr><td>01/15/2024</td><td>1000</td><td>150.00</td></tr></table>";
        let trades = extract_insider_trades(markup);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].transaction_type, TransactionType::Unknown);
        assert_eq!(trades[0].shares, Some(1000));
        assert_eq!(trades[0].price_per_share, Some(150.0));
        assert_eq!(trades[0].total_value, Some(150_000.0));
    }

    #[test]
    fn test_header_roles_first_wins() {
        let headers: Vec<String> = [
            "Transaction Date",
            "Deemed Execution Date",
            "Transaction Code",
            "Amount of Securities Acquired",
            "Shares Owned Following",
            "Price",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let roles = ColumnRoles::from_headers(&headers);
        assert_eq!(roles.date, Some(0));
        assert_eq!(roles.code, Some(2));
        assert_eq!(roles.value, Some(3));
        assert_eq!(roles.shares, Some(4));
        assert_eq!(roles.price, Some(5));
    }

    #[test]
    fn test_transaction_codes() {
        assert_eq!(transaction_type("P"), TransactionType::Buy);
        assert_eq!(transaction_type("s"), TransactionType::Sell);
        assert_eq!(transaction_type("A"), TransactionType::Grant);
        assert_eq!(transaction_type("F"), TransactionType::OptionExercise);
        assert_eq!(transaction_type("M"), TransactionType::Unknown);
        assert_eq!(transaction_type(""), TransactionType::Unknown);
    }

    #[test]
    fn test_rendered_form4_with_owner() {
        let markup = read_test_file("form4_rendered.html");
        let trades = extract_insider_trades(&markup);
        assert_eq!(trades.len(), 2);

        assert_eq!(trades[0].insider_name.as_deref(), Some("HUANG JEN HSUN"));
        assert_eq!(trades[0].insider_title.as_deref(), Some("President and CEO"));
        assert_eq!(trades[0].transaction_type, TransactionType::Sell);
        assert_eq!(trades[0].shares, Some(120_000));
        assert_eq!(trades[0].price_per_share, Some(118.25));
        assert_eq!(trades[0].total_value, Some(14_190_000.0));

        // the row with an impossible date is skipped
        assert_eq!(trades[1].transaction_type, TransactionType::Grant);
        assert_eq!(trades[1].transaction_date, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert_eq!(trades[1].total_value, Some(0.0));
    }

    #[test]
    fn test_tables_without_data_rows_are_ignored() {
        let markup = "<table><tr><th>Date</th><th>Code</th></tr></table>";
        assert!(extract_insider_trades(markup).is_empty());
    }
}
