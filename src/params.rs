use crate::driver::{Nullability, ParamDescription, SqlDataType, TypeClass};
use crate::error::{OdbcStatementError, Result};
use crate::types::RowValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

/// Native representation of one bound value, as handed to `SQLBindParameter`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    /// `SQL_NULL_DATA` indicator; no value buffer.
    #[default]
    Null,
    Integer(i64),
    Double(f64),
    /// Character data in a buffer of `buffer_length` bytes (the declared column size).
    Text { value: String, buffer_length: usize },
    /// Binary data in a buffer of `buffer_length` bytes (the declared column size).
    Binary { value: Vec<u8>, buffer_length: usize },
    /// Character data sent as a variable-length / large object.
    LargeText(String),
    /// Binary data sent as a variable-length / large object.
    LargeBinary(Vec<u8>),
}

impl NativeValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }
}

/// One bind slot: metadata discovered at prepare time plus the current value.
///
/// Type, size and digits never change after discovery; only the value is replaced, and only by
/// the binder.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    direction: ParamDirection,
    data_type: SqlDataType,
    column_size: usize,
    decimal_digits: i16,
    nullable: Nullability,
    large_object_threshold: usize,
    value: NativeValue,
}

impl ParameterDescriptor {
    #[must_use]
    pub fn from_description(desc: ParamDescription, large_object_threshold: usize) -> Self {
        Self {
            direction: ParamDirection::Input,
            data_type: desc.data_type,
            column_size: desc.column_size,
            decimal_digits: desc.decimal_digits,
            nullable: desc.nullable,
            large_object_threshold,
            value: NativeValue::Null,
        }
    }

    #[must_use]
    pub fn direction(&self) -> ParamDirection {
        self.direction
    }

    #[must_use]
    pub fn data_type(&self) -> SqlDataType {
        self.data_type
    }

    #[must_use]
    pub fn column_size(&self) -> usize {
        self.column_size
    }

    #[must_use]
    pub fn decimal_digits(&self) -> i16 {
        self.decimal_digits
    }

    #[must_use]
    pub fn nullable(&self) -> Nullability {
        self.nullable
    }

    #[must_use]
    pub fn value(&self) -> &NativeValue {
        &self.value
    }

    /// Whether text/binary values for this slot travel as large objects instead of a fixed
    /// buffer: long types, unknown (zero) sizes and sizes above the configured threshold.
    #[must_use]
    pub fn is_large(&self) -> bool {
        matches!(
            self.data_type.class(),
            TypeClass::LongCharacter | TypeClass::LongBinary
        ) || self.column_size == 0
            || self.column_size > self.large_object_threshold
    }

    pub(crate) fn set_value(&mut self, value: NativeValue) {
        self.value = value;
    }

    /// Convert a caller value into this slot's native representation.
    ///
    /// `index` is the 0-based position, used only for error reporting.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::UnsupportedParameterType`] if the value kind cannot be bound
    /// to this slot's SQL type.
    pub fn convert(&self, index: usize, value: &RowValues) -> Result<NativeValue> {
        let class = self.data_type.class();
        let native = match value {
            RowValues::Null => Some(NativeValue::Null),
            RowValues::Bool(b) => Some(self.integral(class, i64::from(*b))),
            RowValues::Int(i) => Some(self.integral(class, *i)),
            // Narrowing a double into an integer or character slot is left to the driver.
            RowValues::Float(f) => Some(NativeValue::Double(*f)),
            RowValues::Text(s) => match class {
                TypeClass::Binary | TypeClass::LongBinary => None,
                _ => Some(self.text(s)),
            },
            RowValues::Blob(bytes) => match class {
                TypeClass::Binary | TypeClass::LongBinary | TypeClass::Unknown => {
                    Some(self.binary(bytes))
                }
                _ => None,
            },
            RowValues::Timestamp(_) | RowValues::JSON(_) => None,
        };
        native.ok_or_else(|| OdbcStatementError::UnsupportedParameterType {
            index,
            value_type: value.type_name(),
            sql_type: self.data_type,
        })
    }

    /// Integers travel as doubles only into approximate slots and decimals with a scale.
    #[allow(clippy::cast_precision_loss)]
    fn integral(&self, class: TypeClass, i: i64) -> NativeValue {
        match class {
            TypeClass::Approximate => NativeValue::Double(i as f64),
            TypeClass::Decimal if self.decimal_digits > 0 => NativeValue::Double(i as f64),
            _ => NativeValue::Integer(i),
        }
    }

    fn text(&self, s: &str) -> NativeValue {
        if self.is_large() {
            NativeValue::LargeText(s.to_owned())
        } else {
            NativeValue::Text {
                value: s.to_owned(),
                buffer_length: self.column_size,
            }
        }
    }

    fn binary(&self, bytes: &[u8]) -> NativeValue {
        if self.is_large() {
            NativeValue::LargeBinary(bytes.to_vec())
        } else {
            NativeValue::Binary {
                value: bytes.to_vec(),
                buffer_length: self.column_size,
            }
        }
    }
}

/// Convert a full bind array against the discovered descriptors.
///
/// All-or-nothing: the first unsupported value fails the whole array, so nothing reaches the
/// driver.
///
/// # Errors
/// Returns [`OdbcStatementError::ParameterCountMismatch`] if the lengths differ, or
/// [`OdbcStatementError::UnsupportedParameterType`] for the first value that cannot be bound.
pub fn convert_params(
    descriptors: &[ParameterDescriptor],
    values: &[RowValues],
) -> Result<Vec<NativeValue>> {
    if descriptors.len() != values.len() {
        return Err(OdbcStatementError::ParameterCountMismatch {
            expected: descriptors.len(),
            actual: values.len(),
        });
    }
    descriptors
        .iter()
        .zip(values)
        .enumerate()
        .map(|(index, (descriptor, value))| descriptor.convert(index, value))
        .collect()
}
