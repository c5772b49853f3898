use serde_json::{Map, Value};

/// Rewrites every `.` in object keys to `,`, at any depth (including objects inside
/// arrays). Values are left untouched. Strike keys like `"85.0"` would otherwise be
/// read as path separators by document stores.
pub fn sanitize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(key.replace('.', ","), sanitize_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_dots_in_nested_keys_only() {
        let input = json!({"a.b": {"c.d": 1}, "e": "f.g"});
        assert_eq!(sanitize_keys(input), json!({"a,b": {"c,d": 1}, "e": "f.g"}));
    }

    #[test]
    fn descends_into_arrays_and_keeps_order() {
        let input = json!({
            "callExpDateMap": {
                "2019-03-01:7": {
                    "95.0": [{"last.price": 1.5}],
                    "85.0": [{"symbol": "NVDA_030119C85"}]
                }
            }
        });
        let out = sanitize_keys(input);
        let strikes: Vec<&String> = out["callExpDateMap"]["2019-03-01:7"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(strikes, vec!["95,0", "85,0"]);
        assert_eq!(out["callExpDateMap"]["2019-03-01:7"]["95,0"][0]["last,price"], json!(1.5));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(sanitize_keys(json!("1.5")), json!("1.5"));
        assert_eq!(sanitize_keys(json!(null)), json!(null));
    }
}
