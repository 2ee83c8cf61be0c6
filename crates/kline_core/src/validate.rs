use thiserror::Error;

const MIN_SYMBOL_LEN: usize = 4;
const MAX_SYMBOL_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("symbol must be 4-20 uppercase letters or digits, got {0:?}")]
    InvalidSymbol(String),
}

/// Checks a trading pair symbol such as `BTCUSDT` and returns it trimmed.
pub fn validate_symbol(raw: &str) -> Result<String, ValidationError> {
    let symbol = raw.trim();
    let len_ok = (MIN_SYMBOL_LEN..=MAX_SYMBOL_LEN).contains(&symbol.len());
    let chars_ok = symbol
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if len_ok && chars_ok {
        Ok(symbol.to_string())
    } else {
        Err(ValidationError::InvalidSymbol(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_pairs() {
        assert_eq!(validate_symbol("BTCUSDT"), Ok("BTCUSDT".to_string()));
        assert_eq!(validate_symbol("  1INCHBTC "), Ok("1INCHBTC".to_string()));
    }

    #[test]
    fn rejects_bad_symbols() {
        for bad in ["", "BTC", "btcusdt", "BTC-USDT", "ABCDEFGHIJKLMNOPQRSTU", "BTC USDT"] {
            assert!(validate_symbol(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
