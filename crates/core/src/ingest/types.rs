use crate::domain::contract::{lenient_count, nan_sentinel, null_default};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Chain endpoint response for one underlying.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub underlying: Option<UnderlyingQuote>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub call_exp_date_map: ExpDateMap,
    #[serde(default)]
    pub put_exp_date_map: ExpDateMap,
}

/// expiration key (`YYYY-MM-DD:N`) -> strike key -> quotes, in broker order.
pub type ExpDateMap = OrderedMap<OrderedMap<Vec<ContractQuote>>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderlyingQuote {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub mark: Option<f64>,
    #[serde(default)]
    pub quote_time: Option<i64>,
    #[serde(default)]
    pub trade_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractQuote {
    #[serde(default, deserialize_with = "null_default::deserialize")]
    pub exchange_name: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub last: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count::deserialize")]
    pub total_volume: i64,
    #[serde(default, deserialize_with = "lenient_count::deserialize")]
    pub open_interest: i64,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub volatility: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub gamma: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub theta: Option<f64>,
    #[serde(default, deserialize_with = "nan_sentinel::deserialize")]
    pub vega: Option<f64>,
}

/// A JSON object kept as a list of entries so iteration follows the payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry::<String, V>()? {
                    entries.push((k, v));
                }
                Ok(OrderedMap(entries))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::default())
            }
        }

        d.deserialize_any(EntriesVisitor(PhantomData))
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}
