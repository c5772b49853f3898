use crate::domain::contract::{ContractRecord, OptionType};
use crate::ingest::types::{ChainSnapshot, ContractQuote, ExpDateMap};
use chrono::NaiveDate;

/// Flattens a broker snapshot into contract rows: calls first, then puts, each in
/// the order the broker listed expirations and strikes.
pub fn normalize_chain(snapshot: &ChainSnapshot, data_date: NaiveDate) -> Vec<ContractRecord> {
    let underlying_symbol = snapshot
        .symbol
        .as_deref()
        .or_else(|| snapshot.underlying.as_ref().and_then(|u| u.symbol.as_deref()))
        .unwrap_or_default();

    let underlying_price = snapshot
        .underlying
        .as_ref()
        .and_then(|u| u.last)
        .or(snapshot.underlying_price);

    let side = Side {
        underlying_symbol,
        underlying_price,
        data_date,
    };

    let mut out = Vec::new();
    side.push(&mut out, &snapshot.call_exp_date_map, OptionType::Call);
    side.push(&mut out, &snapshot.put_exp_date_map, OptionType::Put);
    out
}

/// Columns shared by every row of one snapshot.
struct Side<'a> {
    underlying_symbol: &'a str,
    underlying_price: Option<f64>,
    data_date: NaiveDate,
}

/// Columns shared by every quote listed under one (expiration, strike) key.
struct Contract<'a> {
    option_symbol: &'a str,
    option_type: OptionType,
    expiration: NaiveDate,
    strike: f64,
}

impl Side<'_> {
    fn push(&self, out: &mut Vec<ContractRecord>, map: &ExpDateMap, option_type: OptionType) {
        let underlying_symbol = self.underlying_symbol;
        for (exp_key, strikes) in map.iter() {
            let Some(expiration) = parse_expiration_key(exp_key) else {
                tracing::warn!(underlying_symbol, exp_key, "unparsable expiration key; skipping");
                continue;
            };

            for (strike_key, quotes) in strikes.iter() {
                let Ok(strike) = strike_key.trim().parse::<f64>() else {
                    tracing::warn!(underlying_symbol, strike_key, "unparsable strike key; skipping");
                    continue;
                };

                let symbol = option_symbol(underlying_symbol, expiration, option_type, strike);
                let contract = Contract {
                    option_symbol: &symbol,
                    option_type,
                    expiration,
                    strike,
                };
                out.extend(quotes.iter().map(|quote| self.to_record(&contract, quote)));
            }
        }
    }

    fn to_record(&self, contract: &Contract<'_>, quote: &ContractQuote) -> ContractRecord {
        ContractRecord {
            underlying_symbol: self.underlying_symbol.to_string(),
            underlying_price: self.underlying_price,
            exchange: quote.exchange_name.clone(),
            option_symbol: contract.option_symbol.to_string(),
            option_ext: String::new(),
            option_type: contract.option_type,
            expiration: contract.expiration,
            data_date: self.data_date,
            strike: contract.strike,
            last: quote.last,
            bid: quote.bid,
            ask: quote.ask,
            volume: quote.total_volume,
            open_interest: quote.open_interest,
            // Broker reports volatility in percent and theta/vega per 1.00 move.
            iv: scaled(quote.volatility, |v| v / 100.0),
            delta: quote.delta,
            gamma: quote.gamma,
            theta: scaled(quote.theta, |v| v * 100.0),
            vega: scaled(quote.vega, |v| v * 100.0),
            alias: contract.option_symbol.to_string(),
        }
    }
}

/// `"2019-03-01:7"` -> 2019-03-01. The suffix after `:` is days to expiration.
pub fn parse_expiration_key(key: &str) -> Option<NaiveDate> {
    let date_part = key.split(':').next()?;
    NaiveDate::parse_from_str(date_part.trim(), "%Y-%m-%d").ok()
}

/// OCC-style symbol: underlying + yyMMdd + C/P + strike with three implied decimals.
pub fn option_symbol(
    underlying: &str,
    expiration: NaiveDate,
    option_type: OptionType,
    strike: f64,
) -> String {
    format!(
        "{underlying}{}{}{}",
        expiration.format("%y%m%d"),
        option_type.type_char(),
        strike_segment(strike)
    )
}

fn strike_segment(strike: f64) -> String {
    format!("{strike:09.3}").replace('.', "")
}

fn scaled(raw: Option<f64>, f: impl Fn(f64) -> f64) -> Option<f64> {
    raw.map(|v| round2(f(v))).filter(|v| v.is_finite())
}

/// Two decimals, rounded on the exact binary value: 2.675 is stored as
/// 2.67499.. and becomes 2.67. Scaling by 100 first would turn it into 267.5 and
/// round up.
fn round2(v: f64) -> f64 {
    format!("{v:.2}").parse().unwrap_or(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn quote(exchange: &str) -> serde_json::Value {
        json!({
            "exchangeName": exchange,
            "symbol": "ignored",
            "last": 69.1,
            "bid": 68.9,
            "ask": 69.4,
            "totalVolume": 3,
            "openInterest": 12,
            "volatility": 42.567,
            "delta": 0.98,
            "gamma": 0.001,
            "theta": -0.01234,
            "vega": 0.0049
        })
    }

    fn snapshot() -> ChainSnapshot {
        serde_json::from_value(json!({
            "symbol": "NVDA",
            "status": "SUCCESS",
            "underlying": {"symbol": "NVDA", "last": 154.2, "quoteTime": 1550869200000i64},
            "underlyingPrice": 154.0,
            "callExpDateMap": {
                "2019-03-08:14": {"90.0": [quote("OPR")]},
                "2019-03-01:7": {"95.0": [quote("OPR")], "85.0": [quote("OPR"), quote("CBOE")]}
            },
            "putExpDateMap": {
                "2019-03-01:7": {
                    "85.0": [{
                        "exchangeName": "OPR",
                        "totalVolume": 0,
                        "openInterest": 0,
                        "volatility": "NaN",
                        "theta": null,
                        "delta": -0.01
                    }]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn synthesizes_occ_option_symbol() {
        assert_eq!(
            option_symbol("NVDA", d(2019, 3, 1), OptionType::Call, 85.0),
            "NVDA190301C00085000"
        );
        assert_eq!(
            option_symbol("SPY", d(2024, 12, 20), OptionType::Put, 602.5),
            "SPY241220P00602500"
        );
        assert_eq!(
            option_symbol("F", d(2020, 1, 17), OptionType::Call, 7.375),
            "F200117C00007375"
        );
    }

    #[test]
    fn keeps_broker_order_calls_before_puts() {
        let rows = normalize_chain(&snapshot(), d(2019, 2, 22));
        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.option_symbol.as_str(), r.exchange.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("NVDA190308C00090000", "OPR"),
                ("NVDA190301C00095000", "OPR"),
                ("NVDA190301C00085000", "OPR"),
                ("NVDA190301C00085000", "CBOE"),
                ("NVDA190301P00085000", "OPR"),
            ]
        );
    }

    #[test]
    fn maps_fields_and_applies_rounding_policy() {
        let rows = normalize_chain(&snapshot(), d(2019, 2, 22));
        let r = &rows[2];
        assert_eq!(r.underlying_symbol, "NVDA");
        assert_eq!(r.underlying_price, Some(154.2));
        assert_eq!(r.option_type, OptionType::Call);
        assert_eq!(r.expiration, d(2019, 3, 1));
        assert_eq!(r.data_date, d(2019, 2, 22));
        assert_eq!(r.strike, 85.0);
        assert_eq!(r.volume, 3);
        assert_eq!(r.open_interest, 12);
        assert_eq!(r.iv, Some(0.43));
        assert_eq!(r.theta, Some(-1.23));
        assert_eq!(r.vega, Some(0.49));
        assert_eq!(r.delta, Some(0.98));
        assert_eq!(r.alias, r.option_symbol);
        assert!(r.option_ext.is_empty());
    }

    #[test]
    fn missing_analytics_become_nan_sentinels() {
        let rows = normalize_chain(&snapshot(), d(2019, 2, 22));
        let put = rows.last().unwrap();
        assert_eq!(put.iv, None);
        assert_eq!(put.theta, None);
        assert_eq!(put.vega, None);

        let v = serde_json::to_value(put).unwrap();
        assert_eq!(v["IV"], json!("NaN"));
        assert_eq!(v["Theta"], json!("NaN"));
        assert_eq!(v["Vega"], json!("NaN"));
        assert_eq!(v["Last"], json!(null));
    }

    #[test]
    fn falls_back_to_top_level_underlying_price() {
        let mut snap = snapshot();
        snap.underlying = None;
        let rows = normalize_chain(&snap, d(2019, 2, 22));
        assert!(rows.iter().all(|r| r.underlying_price == Some(154.0)));
    }

    #[test]
    fn is_deterministic() {
        let snap = snapshot();
        let a = serde_json::to_vec(&normalize_chain(&snap, d(2019, 2, 22))).unwrap();
        let b = serde_json::to_vec(&normalize_chain(&snap, d(2019, 2, 22))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn skips_unparsable_keys_but_keeps_the_rest() {
        let snap: ChainSnapshot = serde_json::from_value(json!({
            "symbol": "XYZ",
            "status": "SUCCESS",
            "callExpDateMap": {
                "not-a-date:3": {"10.0": [quote("OPR")]},
                "2021-06-18:30": {"ten": [quote("OPR")], "10.0": [quote("OPR")]}
            }
        }))
        .unwrap();

        let rows = normalize_chain(&snap, d(2021, 5, 19));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].option_symbol, "XYZ210618C00010000");
        assert_eq!(rows[0].underlying_price, None);
    }

    #[test]
    fn rounds_on_the_stored_binary_value() {
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(1.115), 1.11);
        assert_eq!(round2(0.42567), 0.43);
        assert_eq!(round2(-1.234), -1.23);
        assert_eq!(round2(0.49), 0.49);
        assert_eq!(scaled(Some(111.5), |v| v / 100.0), Some(1.11));
    }

    #[test]
    fn parses_expiration_keys() {
        assert_eq!(parse_expiration_key("2019-03-01:7"), Some(d(2019, 3, 1)));
        assert_eq!(parse_expiration_key("2019-03-01"), Some(d(2019, 3, 1)));
        assert_eq!(parse_expiration_key("03/01/2019:7"), None);
    }
}
