use serde::{Deserialize, Serialize};

/// One decoded candle. Prices and volumes keep the exact decimal text the
/// exchange sent; only the timestamps are integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trades: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_base_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_quote_volume: Option<String>,
}
