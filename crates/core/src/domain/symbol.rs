/// Alternate `$SYMBOL.X` spelling the broker expects for some index and ETF tickers.
pub fn extra_class_form(symbol: &str) -> String {
    format!("${}.X", symbol.trim())
}

pub fn is_extra_class_form(symbol: &str) -> bool {
    symbol.starts_with('$') && symbol.ends_with(".X")
}

/// Splits a comma separated list, trimming and uppercasing, dropping empties and duplicates.
pub fn parse_symbol_list(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in s.split(',') {
        let sym = part.trim().to_ascii_uppercase();
        if sym.is_empty() || out.contains(&sym) {
            continue;
        }
        out.push(sym);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_extra_class_form() {
        assert_eq!(extra_class_form("SPX"), "$SPX.X");
        assert!(is_extra_class_form("$SPX.X"));
        assert!(!is_extra_class_form("SPX"));
    }

    #[test]
    fn parses_symbol_lists() {
        assert_eq!(parse_symbol_list(" spy,QQQ,,spy , brk.b"), vec!["SPY", "QQQ", "BRK.B"]);
        assert!(parse_symbol_list("").is_empty());
    }
}
