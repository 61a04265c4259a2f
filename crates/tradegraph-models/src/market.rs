use serde::{Deserialize, Serialize};

/// Exchange family an instrument trades on, derived from its ticker format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    ChinaA,
    HongKong,
    Us,
}

impl Market {
    /// Classify a ticker:
    /// - six digits (e.g. `600519`, `000001.SZ`) -> China A-share
    /// - `.HK` suffix or four/five digits (e.g. `0700.HK`, `00700`) -> Hong Kong
    /// - anything else -> US
    pub fn classify(ticker: &str) -> Self {
        let upper = ticker.trim().to_ascii_uppercase();
        if upper.ends_with(".HK") {
            return Self::HongKong;
        }
        let code = upper
            .split_once('.')
            .map(|(code, _)| code)
            .unwrap_or(upper.as_str());
        let all_digits = !code.is_empty() && code.chars().all(|c| c.is_ascii_digit());
        match (all_digits, code.len()) {
            (true, 6) => Self::ChinaA,
            (true, 4 | 5) => Self::HongKong,
            _ => Self::Us,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ChinaA => "China A-share",
            Self::HongKong => "Hong Kong",
            Self::Us => "US",
        }
    }

    pub fn currency_name(self) -> &'static str {
        match self {
            Self::ChinaA => "CNY",
            Self::HongKong => "HKD",
            Self::Us => "USD",
        }
    }

    pub fn currency_symbol(self) -> &'static str {
        match self {
            Self::ChinaA => "¥",
            Self::HongKong => "HK$",
            Self::Us => "$",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_china_a_share() {
        assert_eq!(Market::classify("600519"), Market::ChinaA);
        assert_eq!(Market::classify("000001.SZ"), Market::ChinaA);
    }

    #[test]
    fn classify_hong_kong() {
        assert_eq!(Market::classify("0700.HK"), Market::HongKong);
        assert_eq!(Market::classify("00700"), Market::HongKong);
        assert_eq!(Market::classify("9988.hk"), Market::HongKong);
    }

    #[test]
    fn classify_us_default() {
        assert_eq!(Market::classify("NVDA"), Market::Us);
        assert_eq!(Market::classify("BRK.B"), Market::Us);
        assert_eq!(Market::classify("TICK1"), Market::Us);
    }

    #[test]
    fn currency_symbols() {
        assert_eq!(Market::ChinaA.currency_symbol(), "¥");
        assert_eq!(Market::HongKong.currency_name(), "HKD");
        assert_eq!(Market::Us.currency_symbol(), "$");
    }
}
