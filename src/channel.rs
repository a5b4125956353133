//! `Channel`, an addressable subscription identified by
//! `(type, symbol, interval)`, producing a typed stream of frames to one
//! renderer.

use crate::depth_cache::DepthCache;
use crate::types::{Interval, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Detail,
    Mini,
    Global,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detail => "detail",
            Self::Mini => "mini",
            Self::Global => "global",
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detail" => Ok(Self::Detail),
            "mini" => Ok(Self::Mini),
            "global" => Ok(Self::Global),
            other => Err(format!("invalid channel type '{other}'")),
        }
    }
}

/// Deterministic channel id: `"<type>-<SYMBOL>-<interval>"`, so repeated
/// subscribe calls with identical parameters are idempotent.
pub fn channel_id(channel_type: ChannelType, symbol: &str, interval: Interval) -> String {
    format!("{}-{}-{}", channel_type.as_str(), symbol, interval)
}

pub struct Channel {
    pub id: String,
    pub channel_type: ChannelType,
    pub symbol: Symbol,
    pub interval: Interval,
    pub created_at: i64,
    /// Only populated for `ChannelType::Detail` channels.
    pub depth_cache: Option<DepthCache>,
}

impl Channel {
    pub fn new(
        id: String,
        channel_type: ChannelType,
        symbol: Symbol,
        interval: Interval,
        created_at: i64,
    ) -> Self {
        let depth_cache = matches!(channel_type, ChannelType::Detail).then(DepthCache::new);
        Self {
            id,
            channel_type,
            symbol,
            interval,
            created_at,
            depth_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_is_deterministic() {
        let a = channel_id(ChannelType::Detail, "BTCUSDT", Interval::OneHour);
        let b = channel_id(ChannelType::Detail, "BTCUSDT", Interval::OneHour);
        assert_eq!(a, b);
        assert_eq!(a, "detail-BTCUSDT-1h");
    }

    #[test]
    fn only_detail_channels_get_a_depth_cache() {
        let detail = Channel::new("d".into(), ChannelType::Detail, "BTCUSDT".into(), Interval::OneHour, 0);
        let mini = Channel::new("m".into(), ChannelType::Mini, "BTCUSDT".into(), Interval::OneHour, 0);
        assert!(detail.depth_cache.is_some());
        assert!(mini.depth_cache.is_none());
    }
}
