use kline_core::Kline;
use serde_json::Value;

/// Fields every row must carry: open time, OHLC, volume, close time.
const REQUIRED_FIELDS: usize = 7;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response is not a JSON array of rows: {0}")]
    NotRows(String),
    #[error("row {row} has {len} fields, expected at least 7")]
    ShortRow { row: usize, len: usize },
    #[error("row {row} field {field} is not {expected}")]
    BadField {
        row: usize,
        field: usize,
        expected: &'static str,
    },
}

/// Decode a klines response body: an array of fixed-length tuples.
pub fn decode_klines(bytes: &[u8]) -> Result<Vec<Kline>, DecodeError> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_slice(bytes).map_err(|err| DecodeError::NotRows(err.to_string()))?;

    rows.iter()
        .enumerate()
        .map(|(row, fields)| decode_row(row, fields))
        .collect()
}

fn decode_row(row: usize, fields: &[Value]) -> Result<Kline, DecodeError> {
    if fields.len() < REQUIRED_FIELDS {
        return Err(DecodeError::ShortRow {
            row,
            len: fields.len(),
        });
    }
    let cursor = RowCursor { row, fields };

    Ok(Kline {
        open_time: cursor.integer(0)?,
        open: cursor.decimal(1)?,
        high: cursor.decimal(2)?,
        low: cursor.decimal(3)?,
        close: cursor.decimal(4)?,
        volume: cursor.decimal(5)?,
        close_time: cursor.integer(6)?,
        quote_volume: cursor.optional(7, RowCursor::decimal)?,
        trades: cursor.optional(8, RowCursor::count)?,
        taker_buy_base_volume: cursor.optional(9, RowCursor::decimal)?,
        taker_buy_quote_volume: cursor.optional(10, RowCursor::decimal)?,
    })
}

struct RowCursor<'a> {
    row: usize,
    fields: &'a [Value],
}

impl RowCursor<'_> {
    fn bad(&self, field: usize, expected: &'static str) -> DecodeError {
        DecodeError::BadField {
            row: self.row,
            field,
            expected,
        }
    }

    fn integer(&self, field: usize) -> Result<i64, DecodeError> {
        let value = match &self.fields[field] {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| self.bad(field, "an integer"))
    }

    fn count(&self, field: usize) -> Result<u64, DecodeError> {
        let value = match &self.fields[field] {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| self.bad(field, "a count"))
    }

    /// Decimal values keep their textual form so no precision is lost. Bare
    /// JSON numbers keep the digits they were written with (serde_json's
    /// `arbitrary_precision`).
    fn decimal(&self, field: usize) -> Result<String, DecodeError> {
        match &self.fields[field] {
            Value::String(s) if is_decimal(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(self.bad(field, "a decimal")),
        }
    }

    fn optional<T>(
        &self,
        field: usize,
        read: impl Fn(&Self, usize) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => read(self, field).map(Some),
        }
    }
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next().unwrap_or_default();
    !(whole.is_empty() && frac.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_rows_keeping_decimal_text() {
        let body = br#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]]"#;
        let klines = decode_klines(body).unwrap();
        assert_eq!(klines.len(), 1);
        let k = &klines[0];
        assert_eq!(k.open_time, 1_499_040_000_000);
        assert_eq!(k.open, "0.01634790");
        assert_eq!(k.close_time, 1_499_644_799_999);
        assert_eq!(k.quote_volume.as_deref(), Some("2434.19055334"));
        assert_eq!(k.trades, Some(308));
        assert_eq!(k.taker_buy_quote_volume.as_deref(), Some("28.46694368"));
    }

    #[test]
    fn extended_fields_are_optional() {
        let body = br#"[[1,"1","2","0.5","1.5","10",2]]"#;
        let k = &decode_klines(body).unwrap()[0];
        assert_eq!(k.quote_volume, None);
        assert_eq!(k.trades, None);
    }

    #[test]
    fn numeric_decimals_keep_their_written_digits() {
        let body = br#"[[1,0.00000001,"2","0.5",1.50,123456789012345678901234567890.5,2]]"#;
        let k = &decode_klines(body).unwrap()[0];
        assert_eq!(k.open, "0.00000001");
        assert_eq!(k.close, "1.50");
        assert_eq!(k.volume, "123456789012345678901234567890.5");
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(matches!(
            decode_klines(br#"{"code":0}"#),
            Err(DecodeError::NotRows(_))
        ));
        assert_eq!(
            decode_klines(br#"[[1,"1","2"]]"#),
            Err(DecodeError::ShortRow { row: 0, len: 3 })
        );
        assert_eq!(
            decode_klines(br#"[[1,"abc","2","0.5","1.5","10",2]]"#),
            Err(DecodeError::BadField {
                row: 0,
                field: 1,
                expected: "a decimal"
            })
        );
    }

    #[test]
    fn empty_array_is_an_empty_batch() {
        assert_eq!(decode_klines(b"[]").unwrap(), Vec::new());
    }
}
