//! CSV loaders for instruments and positions
//!
//! Instruments: `ticker,kind,underlying,strike,expiry,option_kind,multiplier`
//! where `kind` is `stock`, `option`, `call`, `put` or `rate`. Options use
//! `option_kind` (call/put) unless the kind already names the right; expiry
//! is a `YYYY-MM-DD` date and the contract expires at 16:00 UTC on that day.
//!
//! Positions: `position_id,ticker,quantity,portfolio_id`, or the two-column
//! `symbol,positionSize` layout where the ticker doubles as the position id
//! and every row lands in the configured default portfolio.
//!
//! Malformed rows are logged and skipped; only an unreadable file fails.

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};
use valuation_engine::{ContractTerms, EngineError, OptionKind, OptionTerms, Position, Timestamp, ValuationEngine};

/// Hour of day (UTC) at which an option expires on its expiry date
const EXPIRY_HOUR_UTC: u32 = 16;

/// Outcome of loading one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
}

/// Why a single row was skipped
#[derive(Debug, Error)]
pub enum RowError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("unknown instrument kind: {0:?}")]
    UnknownKind(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    ticker: String,
    kind: String,
    underlying: Option<String>,
    strike: Option<String>,
    expiry: Option<String>,
    option_kind: Option<String>,
    multiplier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    position_id: String,
    ticker: String,
    quantity: String,
    portfolio_id: String,
}

#[derive(Debug, Deserialize)]
struct SymbolPositionRow {
    symbol: String,
    #[serde(rename = "positionSize")]
    position_size: String,
}

/// Load every instrument in the file into the engine. Stocks and rates are
/// loaded before options so an option's underlying is always present.
pub fn load_instruments(engine: &ValuationEngine, path: &Path) -> Result<LoadSummary> {
    let mut reader = open_csv(path)?;
    let default_multiplier = engine.config().pricing.default_contract_multiplier;
    let mut summary = LoadSummary::default();
    let mut parsed = Vec::new();

    for (index, row) in reader.deserialize::<InstrumentRow>().enumerate() {
        let line = index + 2;
        let outcome = row
            .map_err(|e| RowError::InvalidField { field: "row", value: e.to_string() })
            .and_then(|row| parse_instrument(&row, default_multiplier));
        match outcome {
            Ok(instrument) => parsed.push((line, instrument)),
            Err(e) => {
                warn!("Skipping instrument row {} in {:?}: {}", line, path, e);
                summary.skipped += 1;
            }
        }
    }

    parsed.sort_by_key(|(line, (_, terms))| (matches!(terms, ContractTerms::Option(_)), *line));
    for (line, (ticker, terms)) in parsed {
        match engine.load_instrument(&ticker, terms) {
            Ok(_) => summary.loaded += 1,
            Err(e) => {
                warn!("Skipping instrument row {} in {:?}: {}", line, path, e);
                summary.skipped += 1;
            }
        }
    }

    info!("Loaded {} instruments from {:?} ({} skipped)", summary.loaded, path, summary.skipped);
    Ok(summary)
}

/// Register every position in the file with the engine
pub fn load_positions(engine: &ValuationEngine, path: &Path, default_portfolio_id: &str) -> Result<LoadSummary> {
    let mut reader = open_csv(path)?;
    let symbol_layout = reader
        .headers()
        .with_context(|| format!("read positions header: {}", path.display()))?
        .iter()
        .any(|header| header == "positionSize");

    let rows: Vec<(usize, std::result::Result<Position, RowError>)> = if symbol_layout {
        reader
            .deserialize::<SymbolPositionRow>()
            .enumerate()
            .map(|(index, row)| {
                let position = row
                    .map_err(|e| RowError::InvalidField { field: "row", value: e.to_string() })
                    .and_then(|row| parse_symbol_position(&row, default_portfolio_id));
                (index + 2, position)
            })
            .collect()
    } else {
        reader
            .deserialize::<PositionRow>()
            .enumerate()
            .map(|(index, row)| {
                let position = row
                    .map_err(|e| RowError::InvalidField { field: "row", value: e.to_string() })
                    .and_then(|row| parse_position(&row));
                (index + 2, position)
            })
            .collect()
    };

    let mut summary = LoadSummary::default();
    for (line, position) in rows {
        let registered = position.and_then(|position| engine.register_position(position).map_err(RowError::from));
        match registered {
            Ok(_) => summary.loaded += 1,
            Err(e) => {
                warn!("Skipping position row {} in {:?}: {}", line, path, e);
                summary.skipped += 1;
            }
        }
    }

    info!("Loaded {} positions from {:?} ({} skipped)", summary.loaded, path, summary.skipped);
    Ok(summary)
}

fn open_csv(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("open csv: {}", path.display()))
}

fn parse_instrument(
    row: &InstrumentRow,
    default_multiplier: Decimal,
) -> std::result::Result<(String, ContractTerms), RowError> {
    let ticker = required(Some(row.ticker.as_str()), "ticker")?.to_string();
    let option_kind = match row.kind.to_ascii_lowercase().as_str() {
        "stock" => return Ok((ticker, ContractTerms::Stock)),
        "rate" => return Ok((ticker, ContractTerms::Rate)),
        "call" => OptionKind::Call,
        "put" => OptionKind::Put,
        "option" => parse_option_kind(required(row.option_kind.as_deref(), "option_kind")?)?,
        other => return Err(RowError::UnknownKind(other.to_string())),
    };

    let multiplier = match row.multiplier.as_deref().filter(|value| !value.is_empty()) {
        Some(value) => parse_decimal("multiplier", value)?,
        None => default_multiplier,
    };

    let terms = OptionTerms {
        underlying_id: required(row.underlying.as_deref(), "underlying")?.to_string(),
        strike: parse_decimal("strike", required(row.strike.as_deref(), "strike")?)?,
        expiry: parse_expiry(required(row.expiry.as_deref(), "expiry")?)?,
        kind: option_kind,
        multiplier,
    };
    Ok((ticker, ContractTerms::Option(terms)))
}

fn parse_position(row: &PositionRow) -> std::result::Result<Position, RowError> {
    Ok(Position::new(
        required(Some(row.position_id.as_str()), "position_id")?,
        required(Some(row.ticker.as_str()), "ticker")?,
        parse_decimal("quantity", &row.quantity)?,
        required(Some(row.portfolio_id.as_str()), "portfolio_id")?,
    ))
}

fn parse_symbol_position(row: &SymbolPositionRow, portfolio_id: &str) -> std::result::Result<Position, RowError> {
    let symbol = required(Some(row.symbol.as_str()), "symbol")?;
    Ok(Position::new(symbol, symbol, parse_decimal("positionSize", &row.position_size)?, portfolio_id))
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> std::result::Result<&'a str, RowError> {
    value.filter(|value| !value.is_empty()).ok_or(RowError::MissingField(field))
}

fn parse_decimal(field: &'static str, value: &str) -> std::result::Result<Decimal, RowError> {
    Decimal::from_str(value).map_err(|_| RowError::InvalidField { field, value: value.to_string() })
}

fn parse_option_kind(value: &str) -> std::result::Result<OptionKind, RowError> {
    match value.to_ascii_lowercase().as_str() {
        "call" | "c" => Ok(OptionKind::Call),
        "put" | "p" => Ok(OptionKind::Put),
        _ => Err(RowError::InvalidField { field: "option_kind", value: value.to_string() }),
    }
}

fn parse_expiry(value: &str) -> std::result::Result<Timestamp, RowError> {
    let invalid = || RowError::InvalidField { field: "expiry", value: value.to_string() };
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
    let close = date.and_hms_opt(EXPIRY_HOUR_UTC, 0, 0).ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&close))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use valuation_engine::{EngineConfig, InstrumentKind};

    fn create_test_engine() -> ValuationEngine {
        ValuationEngine::new(EngineConfig { worker_threads: 1, ..Default::default() }).unwrap()
    }

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_instruments_orders_options_after_stocks() {
        let engine = create_test_engine();
        let file = write_csv(
            "ticker,kind,underlying,strike,expiry,option_kind,multiplier\n\
             AAPL-OCT-2030-110-C,option,AAPL,110,2030-10-18,call,\n\
             AAPL-OCT-2030-110-P,put,AAPL,110,2030-10-18,,10\n\
             AAPL,stock,,,,,\n",
        );

        let summary = load_instruments(&engine, file.path()).unwrap();
        assert_eq!(summary, LoadSummary { loaded: 3, skipped: 0 });

        let call = engine.instrument("AAPL-OCT-2030-110-C").unwrap();
        match &call.terms {
            ContractTerms::Option(terms) => {
                assert_eq!(terms.kind, OptionKind::Call);
                assert_eq!(terms.multiplier, Decimal::from(100));
                assert_eq!(terms.expiry, Utc.with_ymd_and_hms(2030, 10, 18, 16, 0, 0).unwrap());
            }
            other => panic!("expected option terms, got {:?}", other),
        }

        let put = engine.instrument("AAPL-OCT-2030-110-P").unwrap();
        match &put.terms {
            ContractTerms::Option(terms) => {
                assert_eq!(terms.kind, OptionKind::Put);
                assert_eq!(terms.multiplier, Decimal::from(10));
            }
            other => panic!("expected option terms, got {:?}", other),
        }
        assert_eq!(engine.instrument("AAPL").unwrap().kind(), InstrumentKind::Stock);
    }

    #[test]
    fn test_invalid_instrument_rows_are_skipped() {
        let engine = create_test_engine();
        let file = write_csv(
            "ticker,kind,underlying,strike,expiry,option_kind,multiplier\n\
             MSFT,stock,,,,,\n\
             BOND,future,,,,,\n\
             MSFT-C,option,MSFT,abc,2030-01-01,call,\n\
             MSFT-X,option,MSFT,300,2030-13-01,call,\n\
             TSLA-C,option,TSLA,300,2030-01-01,call,\n",
        );

        let summary = load_instruments(&engine, file.path()).unwrap();
        assert_eq!(summary, LoadSummary { loaded: 1, skipped: 4 });
        assert!(engine.instrument("TSLA-C").is_none());
    }

    #[test]
    fn test_load_positions_four_column_layout() {
        let engine = create_test_engine();
        engine.load_instrument("AAPL", ContractTerms::Stock).unwrap();
        let file = write_csv(
            "position_id,ticker,quantity,portfolio_id\n\
             P1,AAPL,100,PF1\n\
             P2,AAPL,-25.5,PF2\n\
             P3,MSFT,10,PF1\n\
             P1,AAPL,5,PF1\n",
        );

        let summary = load_positions(&engine, file.path(), "default").unwrap();
        assert_eq!(summary, LoadSummary { loaded: 2, skipped: 2 });
        assert_eq!(engine.position("P2").unwrap().quantity, Decimal::from_str("-25.5").unwrap());
        assert_eq!(engine.position("P1").unwrap().portfolio_id, "PF1");
    }

    #[test]
    fn test_load_positions_symbol_layout_uses_default_portfolio() {
        let engine = create_test_engine();
        engine.load_instrument("AAPL", ContractTerms::Stock).unwrap();
        engine.load_instrument("TELSA", ContractTerms::Stock).unwrap();
        let file = write_csv("symbol,positionSize\nAAPL,1000\nTELSA,-500\nBAD,xyz\n");

        let summary = load_positions(&engine, file.path(), "main").unwrap();
        assert_eq!(summary, LoadSummary { loaded: 2, skipped: 1 });

        let position = engine.position("TELSA").unwrap();
        assert_eq!(position.instrument_id, "TELSA");
        assert_eq!(position.quantity, Decimal::from(-500));
        assert_eq!(position.portfolio_id, "main");
    }

    #[test]
    fn test_bundled_sample_data_loads_cleanly() {
        let engine = create_test_engine();
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");

        let instruments = load_instruments(&engine, &dir.join("instruments.csv")).unwrap();
        assert_eq!(instruments, LoadSummary { loaded: 6, skipped: 0 });

        let positions = load_positions(&engine, &dir.join("positions.csv"), "default").unwrap();
        assert_eq!(positions, LoadSummary { loaded: 8, skipped: 0 });
        assert_eq!(engine.portfolio_ids(), vec!["hedge".to_string(), "main".to_string()]);
    }

    #[test]
    fn test_missing_file_fails() {
        let engine = create_test_engine();
        let result = load_positions(&engine, Path::new("/nonexistent/positions.csv"), "default");
        assert!(result.is_err());
    }
}
