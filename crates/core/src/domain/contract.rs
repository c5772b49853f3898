use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn type_char(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }
}

/// One normalized option contract row.
///
/// Field names follow the historical L2 options CSV layout so that rows imported
/// from CSV dumps and rows normalized from broker snapshots share one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContractRecord {
    pub underlying_symbol: String,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub underlying_price: Option<f64>,
    pub exchange: String,
    pub option_symbol: String,
    #[serde(default)]
    pub option_ext: String,
    #[serde(rename = "Type")]
    pub option_type: OptionType,
    #[serde(with = "mdy_date")]
    pub expiration: NaiveDate,
    #[serde(with = "mdy_date")]
    pub data_date: NaiveDate,
    pub strike: f64,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count::deserialize")]
    pub volume: i64,
    #[serde(default, deserialize_with = "lenient_count::deserialize")]
    pub open_interest: i64,
    #[serde(rename = "IV", default, with = "nan_sentinel")]
    pub iv: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub gamma: Option<f64>,
    #[serde(default, with = "nan_sentinel")]
    pub theta: Option<f64>,
    #[serde(default, with = "nan_sentinel")]
    pub vega: Option<f64>,
    #[serde(rename = "AKA", default)]
    pub alias: String,
}

/// The unit persisted by the snapshot store, keyed by (data_date, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDocument {
    pub symbol: String,
    pub data_date: NaiveDate,
    pub chain: Vec<ContractRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl SymbolDocument {
    pub fn new(symbol: impl Into<String>, data_date: NaiveDate, chain: Vec<ContractRecord>) -> Self {
        Self {
            symbol: symbol.into(),
            data_date,
            chain,
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Optional analytics rendered as the literal string `"NaN"` when absent.
///
/// Deserialization is lenient: numbers, numeric strings, `null`, empty strings and
/// the `"NaN"` string are all accepted. Non-finite values collapse to `None`.
pub mod nan_sentinel {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub const SENTINEL: &str = "NaN";

    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_finite() => s.serialize_f64(*v),
            _ => s.serialize_str(SENTINEL),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        d.deserialize_any(LenientF64)
    }

    struct LenientF64;

    impl<'de> Visitor<'de> for LenientF64 {
        type Value = Option<f64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number, a numeric string, null or \"NaN\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(v.is_finite().then_some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let t = v.trim();
            if t.is_empty() || t.eq_ignore_ascii_case(SENTINEL) {
                return Ok(None);
            }
            t.parse::<f64>()
                .map(|n| n.is_finite().then_some(n))
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: serde::Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(LenientF64)
        }
    }
}

/// Counts (volume, open interest) that may arrive as null, floats or numeric strings.
/// Anything without a number reads as 0.
pub mod lenient_count {
    use serde::Deserializer;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(super::nan_sentinel::deserialize(d)?.map_or(0, |v| v as i64))
    }
}

/// `null` reads as the type's default.
pub mod null_default {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
    }
}

/// `MM/DD/YYYY` dates, as used by the L2 CSV layout. ISO dates are accepted on input.
pub mod mdy_date {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%m/%d/%Y";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&date.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid date: {s}")))
    }

    pub fn parse(s: &str) -> Option<NaiveDate> {
        let t = s.trim();
        NaiveDate::parse_from_str(t, FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(t, "%Y-%m-%d"))
            .ok()
    }
}
