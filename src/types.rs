//! Core domain types shared across the broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading pair identity, e.g. `BTCUSDT`. Always uppercase on the wire.
pub type Symbol = String;

/// Kline interval, one of the fixed set the exchange publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "3m" => Ok(Self::ThreeMinutes),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "2h" => Ok(Self::TwoHours),
            "4h" => Ok(Self::FourHours),
            "6h" => Ok(Self::SixHours),
            "8h" => Ok(Self::EightHours),
            "12h" => Ok(Self::TwelveHours),
            "1d" => Ok(Self::OneDay),
            "3d" => Ok(Self::ThreeDays),
            "1w" => Ok(Self::OneWeek),
            "1M" => Ok(Self::OneMonth),
            other => Err(format!("invalid interval '{other}'")),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV bar. `is_final` marks a closed (non-forming) candle.
///
/// Invariant: within a series, `time` is strictly non-decreasing. A duplicate
/// `time` replaces the prior entry, a strictly greater one appends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
}

impl Candle {
    /// Appends or replaces `candle` into `series`, preserving the
    /// non-decreasing `time` invariant.
    pub fn merge(series: &mut Vec<Candle>, candle: Candle) {
        match series.last() {
            Some(last) if last.time == candle.time => {
                *series.last_mut().unwrap() = candle;
            }
            Some(last) if candle.time > last.time => series.push(candle),
            None => series.push(candle),
            _ => {
                // Older or out-of-order candle; drop.
            }
        }
    }
}

/// Binance-compatible exchange environment selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Testnet => "https://testnet.binance.vision",
            Self::Mainnet => "https://api.binance.com",
        }
    }

    pub fn ws_base_url(&self) -> &'static str {
        match self {
            Self::Testnet => "wss://stream.testnet.binance.vision",
            Self::Mainnet => "wss://stream.binance.com:9443",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            _ => Err(format!(
                "Invalid environment '{}'. Must be 'testnet' or 'mainnet'",
                s
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testnet => write!(f, "testnet"),
            Self::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Order side, as sent by renderers and echoed by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("invalid side '{other}'")),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_base_url() {
        assert_eq!(
            Environment::Testnet.base_url(),
            "https://testnet.binance.vision"
        );
        assert_eq!(Environment::Mainnet.base_url(), "https://api.binance.com");
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!(
            Environment::from_str("testnet").unwrap(),
            Environment::Testnet
        );
        assert_eq!(
            Environment::from_str("MAINNET").unwrap(),
            Environment::Mainnet
        );
        assert!(Environment::from_str("production").is_err());
    }

    #[test]
    fn test_interval_roundtrip() {
        for s in ["1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M"] {
            let parsed = Interval::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(Interval::from_str("2m").is_err());
    }

    #[test]
    fn test_candle_merge_appends_strictly_greater() {
        let mut series = Vec::new();
        Candle::merge(
            &mut series,
            Candle { time: 1, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0, is_final: true },
        );
        Candle::merge(
            &mut series,
            Candle { time: 2, open: 2.0, high: 2.0, low: 2.0, close: 2.0, volume: 2.0, is_final: false },
        );
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].time, 2);
    }

    #[test]
    fn test_candle_merge_replaces_duplicate_time() {
        let mut series = vec![Candle { time: 1, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0, is_final: false }];
        Candle::merge(
            &mut series,
            Candle { time: 1, open: 1.0, high: 2.0, low: 1.0, close: 2.0, volume: 3.0, is_final: true },
        );
        assert_eq!(series.len(), 1);
        assert!(series[0].is_final);
        assert_eq!(series[0].close, 2.0);
    }

    #[test]
    fn test_candle_merge_drops_out_of_order() {
        let mut series = vec![Candle { time: 5, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0, is_final: true }];
        Candle::merge(
            &mut series,
            Candle { time: 3, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0, is_final: true },
        );
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].time, 5);
    }

    #[test]
    fn test_side_from_str() {
        assert_eq!(Side::from_str("buy").unwrap(), Side::Buy);
        assert_eq!(Side::from_str("SELL").unwrap(), Side::Sell);
        assert!(Side::from_str("hold").is_err());
        assert_eq!(Side::Buy.to_string(), "BUY");
    }
}
