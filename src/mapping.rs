//! Coercion of column values into Rust types.
//!
//! [`FromValue`] converts one column value; [`Mappable`] describes a whole mapping target,
//! either a scalar (read from the first column) or a record whose fields are bound to columns
//! by case-insensitive name. Records declare their field list once through
//! [`RecordSchema`], usually via [`impl_mappable!`](crate::impl_mappable), and the mapper
//! resolves that list against a result's columns once per result set.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::SqlSessionError;
use crate::types::{RowValues, parse_timestamp};

static NULL: RowValues = RowValues::Null;

/// Conversion from a single column value.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if the value is NULL and `Self` is not nullable,
    /// or if there is no coercion rule from the value's kind.
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError>;
}

fn null_into(target: &str) -> SqlSessionError {
    SqlSessionError::MappingError(format!("NULL cannot be mapped into non-nullable {target}"))
}

fn no_rule(value: &RowValues, target: &str) -> SqlSessionError {
    SqlSessionError::MappingError(format!(
        "no coercion from {} value into {target}",
        value.kind()
    ))
}

fn unparsable(text: &str, target: &str) -> SqlSessionError {
    SqlSessionError::MappingError(format!("text `{text}` is not a valid {target}"))
}

impl FromValue for i64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Int(i) => Ok(*i),
            RowValues::Bool(b) => Ok(i64::from(*b)),
            #[allow(clippy::cast_possible_truncation)]
            RowValues::Float(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Ok(*f as i64)
            }
            RowValues::Text(s) => s.trim().parse().map_err(|_| unparsable(s, "integer")),
            RowValues::Null => Err(null_into("integer")),
            other => Err(no_rule(other, "integer")),
        }
    }
}

macro_rules! narrow_integer {
    ($($ty:ty),+) => {$(
        impl FromValue for $ty {
            fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
                let wide = i64::from_value(value)?;
                <$ty>::try_from(wide).map_err(|_| {
                    SqlSessionError::MappingError(format!(
                        "integer {wide} is out of range for {}",
                        stringify!($ty)
                    ))
                })
            }
        }
    )+};
}

narrow_integer!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Float(f) => Ok(*f),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(i) => Ok(*i as f64),
            RowValues::Text(s) => s.trim().parse().map_err(|_| unparsable(s, "float")),
            RowValues::Null => Err(null_into("float")),
            other => Err(no_rule(other, "float")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        #[allow(clippy::cast_possible_truncation)]
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        if let Some(b) = value.as_bool() {
            return Ok(*b);
        }
        match value {
            RowValues::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(true),
                "false" | "f" | "0" | "no" => Ok(false),
                _ => Err(unparsable(s, "boolean")),
            },
            RowValues::Null => Err(null_into("boolean")),
            other => Err(no_rule(other, "boolean")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Text(s) => Ok(s.clone()),
            RowValues::Int(i) => Ok(i.to_string()),
            RowValues::Float(f) => Ok(f.to_string()),
            RowValues::Bool(b) => Ok(b.to_string()),
            RowValues::Timestamp(ts) => Ok(ts.format("%F %T%.f").to_string()),
            RowValues::JSON(json) => Ok(json.to_string()),
            RowValues::Blob(bytes) => String::from_utf8(bytes.clone()).map_err(|_| {
                SqlSessionError::MappingError("blob is not valid UTF-8 text".into())
            }),
            RowValues::Null => Err(null_into("string")),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Timestamp(ts) => Ok(*ts),
            RowValues::Text(s) => parse_timestamp(s).ok_or_else(|| unparsable(s, "timestamp")),
            RowValues::Int(secs) => DateTime::<Utc>::from_timestamp(*secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    SqlSessionError::MappingError(format!("{secs} is not a valid unix timestamp"))
                }),
            RowValues::Null => Err(null_into("timestamp")),
            other => Err(no_rule(other, "timestamp")),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Null => Err(null_into("date")),
            RowValues::Text(s) => value.as_date().ok_or_else(|| unparsable(s, "date")),
            other => other.as_date().ok_or_else(|| no_rule(other, "date")),
        }
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::JSON(json) => Ok(json.clone()),
            RowValues::Text(s) => serde_json::from_str(s).map_err(|_| unparsable(s, "JSON")),
            RowValues::Int(i) => Ok(JsonValue::from(*i)),
            RowValues::Float(f) => Ok(JsonValue::from(*f)),
            RowValues::Bool(b) => Ok(JsonValue::Bool(*b)),
            RowValues::Null => Err(null_into("JSON")),
            other => Err(no_rule(other, "JSON")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        match value {
            RowValues::Blob(bytes) => Ok(bytes.clone()),
            RowValues::Text(s) => Ok(s.clone().into_bytes()),
            RowValues::Null => Err(null_into("blob")),
            other => Err(no_rule(other, "blob")),
        }
    }
}

impl FromValue for RowValues {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &RowValues) -> Result<Self, SqlSessionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Ordered field names of a composite mapping target.
///
/// Field `i` of the record is filled from the column whose name equals `fields[i]` ignoring
/// ASCII case. Fields with no matching column read as NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    fields: &'static [&'static str],
}

impl RecordSchema {
    #[must_use]
    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Resolve each field to a column position.
    #[must_use]
    pub fn bind(&self, columns: &[String]) -> Vec<Option<usize>> {
        self.fields
            .iter()
            .map(|field| columns.iter().position(|col| col.eq_ignore_ascii_case(field)))
            .collect()
    }
}

/// What a mapping target reads from a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// The first column, coerced.
    Scalar,
    /// Named fields bound to columns.
    Record(RecordSchema),
}

/// A type that rows can be mapped into.
///
/// Scalars (`i64`, `String`, `bool`, `NaiveDateTime`, `RowValues`, `Option<_>` of those, ...)
/// are implemented by the crate. Records implement it through
/// [`impl_mappable!`](crate::impl_mappable):
/// ```rust
/// use sql_session::impl_mappable;
///
/// #[derive(Debug)]
/// struct User {
///     id: i64,
///     name: String,
///     email: Option<String>,
/// }
///
/// impl_mappable!(User { id: i64, name: String, email: Option<String> });
/// ```
pub trait Mappable: Sized {
    fn shape() -> TargetShape;

    /// # Errors
    /// Returns `SqlSessionError::MappingError` if a value cannot be coerced.
    fn map_row(row: &BoundRow<'_>) -> Result<Self, SqlSessionError>;
}

/// A row together with the column position of each target field.
pub struct BoundRow<'r> {
    values: &'r [RowValues],
    slots: &'r [Option<usize>],
    fields: &'static [&'static str],
}

impl<'r> BoundRow<'r> {
    pub(crate) fn new(
        values: &'r [RowValues],
        slots: &'r [Option<usize>],
        fields: &'static [&'static str],
    ) -> Self {
        Self {
            values,
            slots,
            fields,
        }
    }

    /// Value of the first column.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` if the result has no columns.
    pub fn scalar(&self) -> Result<&'r RowValues, SqlSessionError> {
        self.values
            .first()
            .ok_or_else(|| SqlSessionError::MappingError("result has no columns".into()))
    }

    /// Coerce the column bound to field `index` of the schema.
    ///
    /// # Errors
    /// Returns `SqlSessionError::MappingError` naming the field if coercion fails.
    pub fn field<T: FromValue>(&self, index: usize) -> Result<T, SqlSessionError> {
        let value = self
            .slots
            .get(index)
            .copied()
            .flatten()
            .and_then(|pos| self.values.get(pos))
            .unwrap_or(&NULL);
        T::from_value(value).map_err(|err| match err {
            SqlSessionError::MappingError(msg) => {
                let name = self.fields.get(index).copied().unwrap_or("?");
                SqlSessionError::MappingError(format!("field `{name}`: {msg}"))
            }
            other => other,
        })
    }
}

macro_rules! scalar_mappable {
    ($($ty:ty),+ $(,)?) => {$(
        impl Mappable for $ty {
            fn shape() -> TargetShape {
                TargetShape::Scalar
            }

            fn map_row(row: &BoundRow<'_>) -> Result<Self, SqlSessionError> {
                <$ty as FromValue>::from_value(row.scalar()?)
            }
        }
    )+};
}

scalar_mappable!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    bool,
    String,
    NaiveDateTime,
    NaiveDate,
    JsonValue,
    Vec<u8>,
    RowValues,
);

impl<T: FromValue> Mappable for Option<T> {
    fn shape() -> TargetShape {
        TargetShape::Scalar
    }

    fn map_row(row: &BoundRow<'_>) -> Result<Self, SqlSessionError> {
        <Option<T> as FromValue>::from_value(row.scalar()?)
    }
}

/// Implement [`Mappable`](crate::mapping::Mappable) for a struct with named fields.
///
/// Each listed field is read from the column of the same name (ignoring ASCII case) and
/// coerced with [`FromValue`](crate::mapping::FromValue). List every field of the struct.
#[macro_export]
macro_rules! impl_mappable {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::mapping::Mappable for $ty {
            fn shape() -> $crate::mapping::TargetShape {
                const SCHEMA: $crate::mapping::RecordSchema =
                    $crate::mapping::RecordSchema::new(&[$(stringify!($field)),+]);
                $crate::mapping::TargetShape::Record(SCHEMA)
            }

            #[allow(unused_assignments)]
            fn map_row(
                row: &$crate::mapping::BoundRow<'_>,
            ) -> ::std::result::Result<Self, $crate::SqlSessionError> {
                let mut index = 0usize;
                Ok($ty {
                    $($field: {
                        let value = row.field::<$fty>(index)?;
                        index += 1;
                        value
                    }),+
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_integer_coerces() {
        assert_eq!(i64::from_value(&RowValues::Text("42".into())).unwrap(), 42);
        assert_eq!(i32::from_value(&RowValues::Text(" 7 ".into())).unwrap(), 7);
    }

    #[test]
    fn null_into_non_nullable_integer_fails() {
        let err = i64::from_value(&RowValues::Null).unwrap_err();
        assert!(err.is_mapping_error());
        assert_eq!(Option::<i64>::from_value(&RowValues::Null).unwrap(), None);
    }

    #[test]
    fn numeric_widening_and_checked_narrowing() {
        assert_eq!(f64::from_value(&RowValues::Int(3)).unwrap(), 3.0);
        assert_eq!(i64::from_value(&RowValues::Float(3.0)).unwrap(), 3);
        assert!(i64::from_value(&RowValues::Float(3.5)).is_err());
        assert!(u8::from_value(&RowValues::Int(300)).is_err());
        assert!(u32::from_value(&RowValues::Int(-1)).is_err());
    }

    #[test]
    fn missing_rule_is_a_mapping_error() {
        let err = i64::from_value(&RowValues::Blob(vec![1, 2])).unwrap_err();
        assert!(err.is_mapping_error());
        assert!(err.to_string().contains("blob"));
    }

    #[test]
    fn timestamps_parse_from_text_and_epoch() {
        let ts = NaiveDateTime::from_value(&RowValues::Text("2024-01-01 08:00:01".into())).unwrap();
        assert_eq!(ts.to_string(), "2024-01-01 08:00:01");
        let epoch = NaiveDateTime::from_value(&RowValues::Int(0)).unwrap();
        assert_eq!(epoch.to_string(), "1970-01-01 00:00:00");
    }

    #[test]
    fn schema_binds_case_insensitively() {
        let schema = RecordSchema::new(&["id", "userName", "missing"]);
        let columns = vec!["ID".to_string(), "USERNAME".to_string()];
        assert_eq!(schema.bind(&columns), vec![Some(0), Some(1), None]);
    }

    struct Account {
        id: i64,
        owner: String,
        balance: Option<f64>,
    }

    impl_mappable!(Account { id: i64, owner: String, balance: Option<f64> });

    #[test]
    fn macro_record_maps_bound_columns() {
        let TargetShape::Record(schema) = Account::shape() else {
            panic!("record expected");
        };
        let columns = vec!["OWNER".to_string(), "Id".to_string()];
        let slots = schema.bind(&columns);
        let values = vec![RowValues::Text("ann".into()), RowValues::Text("9".into())];
        let account = Account::map_row(&BoundRow::new(&values, &slots, schema.fields())).unwrap();
        assert_eq!(account.id, 9);
        assert_eq!(account.owner, "ann");
        assert_eq!(account.balance, None);
    }

    #[test]
    fn field_errors_name_the_field() {
        let TargetShape::Record(schema) = Account::shape() else {
            panic!("record expected");
        };
        let columns = vec!["id".to_string(), "owner".to_string()];
        let slots = schema.bind(&columns);
        let values = vec![RowValues::Null, RowValues::Text("ann".into())];
        let err = Account::map_row(&BoundRow::new(&values, &slots, schema.fields()))
            .err()
            .unwrap();
        assert!(err.is_mapping_error());
        assert!(err.to_string().contains("field `id`"));
    }
}
