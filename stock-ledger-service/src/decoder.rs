use crate::error::DecodeError;
use crate::model::TransactionRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

pub const CSV_DELIMITER: u8 = b';';

/// Turns a raw batch payload into records, preserving row order.
pub trait BatchDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Vec<TransactionRecord>, DecodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Csv,
    Json,
}

impl PayloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadFormat::Csv => "csv",
            PayloadFormat::Json => "json",
        }
    }

    pub fn decoder(&self) -> Box<dyn BatchDecoder> {
        match self {
            PayloadFormat::Csv => Box::new(CsvBatchDecoder),
            PayloadFormat::Json => Box::new(JsonBatchDecoder),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(PayloadFormat::Csv),
            "json" => Ok(PayloadFormat::Json),
            other => Err(format!("unsupported payload format `{other}` (expected csv or json)")),
        }
    }
}

/// Semicolon-delimited export with a
/// `Timestamp;WarehouseName;ItemId;ItemName;StockLevelChange` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvBatchDecoder;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
    #[serde(rename = "Timestamp")]
    timestamp: Option<String>,
    #[serde(rename = "WarehouseName")]
    warehouse: Option<String>,
    #[serde(rename = "ItemId")]
    item_id: Option<String>,
    #[serde(rename = "ItemName")]
    item_name: Option<String>,
    #[serde(rename = "StockLevelChange")]
    delta: Option<String>,
}

impl BatchDecoder for CsvBatchDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<TransactionRecord>, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(CSV_DELIMITER)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row_no = idx + 1;
            let row = row.map_err(|e| DecodeError::Csv(e.to_string()))?;
            let delta_raw = required(row.delta, row_no, "StockLevelChange")?;
            let delta = delta_raw
                .parse::<i64>()
                .map_err(|_| DecodeError::InvalidDelta { row: row_no, value: delta_raw.clone() })?;
            records.push(TransactionRecord {
                timestamp: parse_timestamp(&required(row.timestamp, row_no, "Timestamp")?, row_no)?,
                warehouse: required(row.warehouse, row_no, "WarehouseName")?,
                item_id: required(row.item_id, row_no, "ItemId")?,
                item_name: row.item_name.unwrap_or_default(),
                delta,
            });
        }
        Ok(records)
    }
}

/// JSON array of objects keyed like the CSV header.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonBatchDecoder;

impl BatchDecoder for JsonBatchDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<TransactionRecord>, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let rows: Vec<serde_json::Map<String, Value>> =
            serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;

        rows.into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let row_no = idx + 1;
                let delta = match row.get("StockLevelChange") {
                    None | Some(Value::Null) => {
                        return Err(DecodeError::MissingField {
                            row: row_no,
                            field: "StockLevelChange",
                        })
                    }
                    Some(Value::Number(n)) => n
                        .as_i64()
                        .ok_or_else(|| DecodeError::InvalidDelta {
                            row: row_no,
                            value: n.to_string(),
                        })?,
                    Some(Value::String(s)) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| DecodeError::InvalidDelta { row: row_no, value: s.clone() })?,
                    Some(other) => {
                        return Err(DecodeError::InvalidDelta {
                            row: row_no,
                            value: other.to_string(),
                        })
                    }
                };
                let timestamp = required(json_str(&row, "Timestamp"), row_no, "Timestamp")?;
                Ok(TransactionRecord {
                    timestamp: parse_timestamp(&timestamp, row_no)?,
                    warehouse: required(json_str(&row, "WarehouseName"), row_no, "WarehouseName")?,
                    item_id: required(json_str(&row, "ItemId"), row_no, "ItemId")?,
                    item_name: json_str(&row, "ItemName").unwrap_or_default(),
                    delta,
                })
            })
            .collect()
    }
}

fn json_str(row: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(value: Option<String>, row: usize, field: &'static str) -> Result<String, DecodeError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(DecodeError::MissingField { row, field })
}

fn parse_timestamp(value: &str, row: usize) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp { row, value: value.to_string() })
}
