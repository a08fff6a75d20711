//! RowMapper - JSON record to table row
//!
//! Each configured field becomes one column value. Dotted names (`user.id`)
//! walk nested objects.

use serde_json::{Map, Value};

use contracts::{ColumnValue, ContractError};

/// Maps JSON-object payloads onto a fixed column list
#[derive(Debug, Clone)]
pub struct RowMapper {
    fields: Vec<String>,
    allow_missing_fields: bool,
}

impl RowMapper {
    pub fn new(fields: Vec<String>, allow_missing_fields: bool) -> Self {
        Self {
            fields,
            allow_missing_fields,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Build one row from a record payload
    ///
    /// Missing fields become NULL when allowed; otherwise the record is
    /// rejected naming every missing field.
    pub fn map(&self, payload: &[u8]) -> Result<Vec<ColumnValue>, ContractError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ContractError::row_mapping(format!("record is not valid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| ContractError::row_mapping("record is not a JSON object"))?;

        let mut row = Vec::with_capacity(self.fields.len());
        let mut missing = Vec::new();
        for field in &self.fields {
            match lookup(object, field) {
                Some(v) => row.push(to_column(v)),
                None if self.allow_missing_fields => row.push(ColumnValue::Null),
                None => missing.push(field.as_str()),
            }
        }

        if !missing.is_empty() {
            return Err(ContractError::row_mapping(format!(
                "record is missing expected fields: {}",
                missing.join(", ")
            )));
        }
        Ok(row)
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    if let Some(value) = object.get(field) {
        return Some(value);
    }

    let mut parts = field.split('.');
    let mut current = object.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn to_column(value: &Value) -> ColumnValue {
    match value {
        Value::Null => ColumnValue::Null,
        Value::Bool(b) => ColumnValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ColumnValue::Int(i),
            None => ColumnValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => ColumnValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => ColumnValue::Json(value.clone()),
    }
}
