//! Database-agnostic row representation.
//!
//! Every driver row is converted into a [`Record`]: the column names of the
//! result set plus one JSON value per column. Records then decode into any
//! `serde::Deserialize` type, which is how commands and queries receive typed
//! results without per-dialect code.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! SQL Server rows arrive as tiberius `ColumnData` and are converted directly.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::Deserializer;
use serde::de::{DeserializeOwned, Visitor};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::ops::Range;
use std::sync::Arc;

// =============================================================================
// Record
// =============================================================================

/// One row: shared column names plus the row's values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<JsonValue>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Vec<JsonValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column with this name, ignoring ASCII case.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    /// Index of the last column with this name, ignoring ASCII case.
    pub fn rposition(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .rposition(|c| c.eq_ignore_ascii_case(column))
    }

    /// JSON object of the columns in `range`, keyed by the struct field each
    /// column matches ignoring ASCII case, else by the lowercased column
    /// name. When keys repeat, the first column wins.
    fn to_object(&self, range: Range<usize>, fields: &[&str]) -> JsonValue {
        let mut map = serde_json::Map::with_capacity(range.len());
        for idx in range {
            let column = &self.columns[idx];
            let key = fields
                .iter()
                .find(|field| field.eq_ignore_ascii_case(column))
                .map_or_else(|| column.to_ascii_lowercase(), |field| field.to_string());
            if !map.contains_key(&key) {
                map.insert(key, self.values[idx].clone());
            }
        }
        JsonValue::Object(map)
    }

    /// Decode the whole row into `T`. Column names are matched against field
    /// names ignoring case.
    pub fn decode<T: DeserializeOwned>(&self) -> DbResult<T> {
        self.decode_range(0..self.len())
    }

    /// Decode the columns in `range` into `T`.
    pub fn decode_range<T: DeserializeOwned>(&self, range: Range<usize>) -> DbResult<T> {
        T::deserialize(RowDeserializer { record: self, range })
            .map_err(|e| DbError::mapping(e.to_string(), std::any::type_name::<T>()))
    }

    /// Decode the columns in `range` into `T`, decoding from SQL `NULL` first
    /// when every value in the range is NULL. This lets `Option<_>` targets
    /// absorb the empty side of an outer join.
    pub fn decode_range_or_null<T: DeserializeOwned>(&self, range: Range<usize>) -> DbResult<T> {
        if self.values[range.clone()].iter().all(JsonValue::is_null) {
            if let Ok(value) = serde_json::from_value::<T>(JsonValue::Null) {
                return Ok(value);
            }
        }
        self.decode_range(range)
    }

    /// Decode the first column into `T`.
    pub fn scalar<T: DeserializeOwned>(&self) -> DbResult<T> {
        let value = self
            .values
            .first()
            .cloned()
            .ok_or_else(|| DbError::mapping("row has no columns", std::any::type_name::<T>()))?;
        from_json(value)
    }

    /// Row as a JSON object with original column names, for display.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.columns
                .iter()
                .cloned()
                .zip(self.values.iter().cloned())
                .collect(),
        )
    }
}

/// Deserializer over some of a record's columns. Structs see their own field
/// names; maps and flattened structs see lowercased column names.
struct RowDeserializer<'r> {
    record: &'r Record,
    range: Range<usize>,
}

impl<'de> Deserializer<'de> for RowDeserializer<'_> {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.record.to_object(self.range, &[]).deserialize_any(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.record
            .to_object(self.range, fields)
            .deserialize_struct(name, fields, visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.record
            .to_object(self.range, &[])
            .deserialize_enum(name, variants, visitor)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier ignored_any
    }
}

fn from_json<T: DeserializeOwned>(value: JsonValue) -> DbResult<T> {
    serde_json::from_value(value)
        .map_err(|e| DbError::mapping(e.to_string(), std::any::type_name::<T>()))
}

/// Column names of a row, shared by every record of one result set.
pub(crate) fn column_names<R: Row>(row: &R) -> Arc<[String]> {
    row.columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into()
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        // SQLite has no date type; values come back as stored text
        if db == DatabaseType::SQLite {
            return TypeCategory::Unknown;
        }
        return TypeCategory::Temporal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Decimal text as a JSON number when it fits an f64, else kept as text.
pub fn decimal_value(text: &str) -> JsonValue {
    text.trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(text.to_string()))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Encode binary data as base64 text.
pub fn binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn temporal_value<T: serde::Serialize>(v: T) -> JsonValue {
    serde_json::to_value(v).unwrap_or(JsonValue::Null)
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting driver rows to records.
pub trait RowToRecord {
    /// Convert with column names already collected for this result set.
    fn to_record_with(&self, columns: Arc<[String]>) -> Record;

    fn to_record(&self) -> Record;
}

macro_rules! impl_row_to_record {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToRecord for $row {
            fn to_record_with(&self, columns: Arc<[String]>) -> Record {
                let values = self
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        $decoder(self, idx, type_name, category)
                    })
                    .collect();
                Record::new(columns, values)
            }

            fn to_record(&self) -> Record {
                self.to_record_with(column_names(self))
            }
        }
    };
}

impl_row_to_record!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_record!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_record!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => decimal_value(&v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        // Check NULL first
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // Unsigned columns (LAST_INSERT_ID() is BIGINT UNSIGNED)
        if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        JsonValue::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        JsonValue::Null
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        _type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => decimal_value(&v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> JsonValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v.map(temporal_value).unwrap_or(JsonValue::Null);
        }
        JsonValue::Null
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<sqlx::types::Uuid>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            _ => decode_dynamic(row, idx, type_name),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    /// REAL and NUMERIC affinity columns may still store integers or text.
    fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return float_value(v as f64);
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return decimal_value(&v);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    /// Expression columns (`COUNT(*)`, `last_insert_rowid()`) report the
    /// storage class of the value ("INTEGER", "REAL", "TEXT", "NULL") or no
    /// declared type at all, so the value itself decides.
    fn decode_dynamic(row: &SqliteRow, idx: usize, type_name: &str) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return binary_value(&v);
        }
        JsonValue::Null
    }
}

// =============================================================================
// SQL Server
// =============================================================================

pub(crate) mod mssql {
    use super::*;
    use tiberius::{ColumnData, FromSql};

    pub fn column_names(row: &tiberius::Row) -> Arc<[String]> {
        row.columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
            .into()
    }

    pub fn to_record(row: tiberius::Row, columns: Arc<[String]>) -> Record {
        let values = row.into_iter().map(|data| decode_column(&data)).collect();
        Record::new(columns, values)
    }

    fn temporal<'a, T>(data: &'a ColumnData<'static>) -> JsonValue
    where
        T: FromSql<'a> + serde::Serialize,
    {
        match T::from_sql(data) {
            Ok(Some(v)) => temporal_value(v),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode SQL Server date/time: {:?}", e);
                JsonValue::Null
            }
        }
    }

    pub fn decode_column(data: &ColumnData<'static>) -> JsonValue {
        use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

        match data {
            ColumnData::U8(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I16(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I32(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::I64(v) => v.map(|v| JsonValue::Number(v.into())).unwrap_or(JsonValue::Null),
            ColumnData::F32(v) => v.map(|v| float_value(v as f64)).unwrap_or(JsonValue::Null),
            ColumnData::F64(v) => v.map(float_value).unwrap_or(JsonValue::Null),
            ColumnData::Bit(v) => v.map(JsonValue::Bool).unwrap_or(JsonValue::Null),
            ColumnData::String(v) => v
                .as_ref()
                .map(|s| JsonValue::String(s.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Guid(v) => v
                .map(|g| JsonValue::String(g.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Binary(v) => v
                .as_ref()
                .map(|b| binary_value(b))
                .unwrap_or(JsonValue::Null),
            ColumnData::Numeric(v) => v
                .as_ref()
                .map(|n| decimal_value(&n.to_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::Xml(v) => v
                .as_ref()
                .map(|x| JsonValue::String(x.as_ref().clone().into_string()))
                .unwrap_or(JsonValue::Null),
            ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
                temporal::<NaiveDateTime>(data)
            }
            ColumnData::Date(_) => temporal::<NaiveDate>(data),
            ColumnData::Time(_) => temporal::<NaiveTime>(data),
            ColumnData::DateTimeOffset(_) => temporal::<DateTime<FixedOffset>>(data),
            #[allow(unreachable_patterns)]
            _ => JsonValue::Null,
        }
    }
}
