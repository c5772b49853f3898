use optarchive_core::domain::symbol::parse_symbol_list;

/// Tickers that must be archived every day. Retried with the mandatory round budget and
/// raised as an operator alert when still missing.
pub const MANDATORY_SYMBOLS: &[&str] = &[
    "A", "AAPL", "ABBV", "ABT", "ACN", "ADBE", "ADM", "ADP", "AFL", "AGN", "AIG", "ALB",
    "ALL", "AMCR", "AMGN", "AMZN", "AOS", "APD", "ATO", "AXP", "AZO", "BA", "BAC", "BDX",
    "BEN", "BF.B", "BIIB", "BK", "BKNG", "BKX", "BLK", "BMY", "BNS", "BRK.B", "BYND", "C",
    "CAH", "CAT", "CB", "CHTR", "CINF", "CL", "CLX", "CLDT", "CMCSA", "CNP", "CMG", "COF",
    "COP", "COST", "CSCO", "CTAS", "CVS", "CVX", "CZNC", "D", "DD", "DHR", "DIA", "DIS",
    "DJX", "DOV", "DOW", "DUK", "ECL", "ED", "EEM", "EMN", "EMR", "ESS", "EWW", "EWZ",
    "EXC", "EXPD", "EXPE", "F", "FB", "FDX", "FRT", "FXI", "GD", "GDX", "GE", "GEO", "GILD",
    "GLD", "GM", "GOOG", "GOOGL", "GPC", "GS", "GWW", "HAL", "HD", "HGX", "HON", "HRL",
    "HSBC", "IBM", "INTC", "IP", "ITW", "IWM", "IYR", "JNJ", "JNUG", "JPM", "KEY", "KHC",
    "KMB", "KMI", "KO", "KR", "KTB", "LEG", "LIN", "LLY", "LMT", "LOW", "LYB", "LYFT", "M",
    "MA", "MCD", "MDLZ", "MDT", "MET", "MKC", "MMM", "MO", "MPC", "MRK", "MS", "MSFT",
    "MYL", "NDX", "NEE", "NFLX", "NGG", "NKE", "NNN", "NOV", "NUE", "NVDA", "O", "ODP",
    "OEX", "OHI", "OIH", "OMC", "ORCL", "OSX", "OXY", "OZK", "PBCT", "PEAK", "PEB", "PEP",
    "PFE", "PG", "PM", "PNR", "PPG", "PPL", "PYPL", "QCOM", "QQQ", "RLG", "RLV", "ROP",
    "ROST", "RTN", "RUI", "RUT", "SBUX", "SHW", "SIXB", "SIXI", "SIXM", "SIXRE", "SIXU",
    "SIXV", "SIXY", "SKT", "SLB", "SLV", "SMH", "SO", "SOX", "SPG", "SPGI", "SPY", "SPX",
    "STAG", "SWK", "SYY", "T", "TAN", "TGT", "TLT", "TROW", "TSLA", "TXN", "UBER", "UNH",
    "UNP", "UPS", "USB", "USO", "UTX", "UTY", "V", "VFC", "VIAC", "VIACA", "VIX", "VTR",
    "VZ", "WBA", "WDC", "WELL", "WFC", "WMT", "WPC", "WRK", "X", "XAU", "XBI", "XDA", "XDB",
    "XDC", "XDE", "XDN", "XDS", "XDZ", "XEO", "XLB", "XLE", "XLP", "XLU", "XLY", "XOM",
    "XOP", "XRT", "XSP",
];

/// The built-in list, or `MANDATORY_SYMBOLS="A,B,C"` when set.
pub fn mandatory_symbols() -> Vec<String> {
    match std::env::var("MANDATORY_SYMBOLS") {
        Ok(s) if !s.trim().is_empty() => parse_symbol_list(&s),
        _ => MANDATORY_SYMBOLS.iter().map(|s| s.to_string()).collect(),
    }
}
