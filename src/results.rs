use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::{ColumnDescription, RawCell, SqlDataType, TypeClass};
use crate::error::{OdbcStatementError, Result};
use crate::types::{RowValues, parse_timestamp};

/// Everything fetched by one execute, before marshalling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<ColumnDescription>,
    pub rows: Vec<Vec<RawCell>>,
}

/// Successful outcome of `Statement::execute`.
#[derive(Debug, Clone)]
pub enum StatementOutput {
    /// The statement produced a result set.
    Rows(ResultSet),
    /// The statement produced no result set; rows affected as reported by the driver, or `None`
    /// when the driver cannot tell.
    RowsAffected(Option<u64>),
}

impl StatementOutput {
    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            StatementOutput::Rows(rs) => Some(rs),
            StatementOutput::RowsAffected(_) => None,
        }
    }

    /// Affected-row count; `None` for a result set or when the driver reported it as unknown.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            StatementOutput::Rows(_) => None,
            StatementOutput::RowsAffected(n) => *n,
        }
    }
}

/// Turns a fully fetched raw result into caller-visible rows.
///
/// Invoked once per successful execute that produced a result set, on the awaiting side.
pub trait ResultMaterializer: Send + Sync {
    /// # Errors
    /// Implementations return [`OdbcStatementError::ConversionError`] for cells they cannot map.
    fn materialize(&self, raw: RawResultSet) -> Result<ResultSet>;
}

/// Maps raw cells to [`RowValues`] using each column's SQL type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMaterializer;

impl ResultMaterializer for DefaultMaterializer {
    fn materialize(&self, raw: RawResultSet) -> Result<ResultSet> {
        let columns = Arc::new(raw.columns);
        let mut result_set = ResultSet::with_capacity(Arc::clone(&columns), raw.rows.len());
        for (row_index, cells) in raw.rows.into_iter().enumerate() {
            if cells.len() != columns.len() {
                return Err(OdbcStatementError::ConversionError(format!(
                    "row {row_index} has {} cells, expected {}",
                    cells.len(),
                    columns.len()
                )));
            }
            let values = cells
                .into_iter()
                .zip(columns.iter())
                .map(|(cell, column)| cell_to_value(cell, column))
                .collect::<Result<Vec<_>>>()?;
            result_set.add_row_values(values);
        }
        Ok(result_set)
    }
}

fn cell_to_value(cell: RawCell, column: &ColumnDescription) -> Result<RowValues> {
    let class = column.data_type.class();
    let value = match cell {
        RawCell::Null => RowValues::Null,
        RawCell::Integer(i) if class == TypeClass::Bit => RowValues::Bool(i != 0),
        RawCell::Integer(i) => RowValues::Int(i),
        RawCell::Double(f) => RowValues::Float(f),
        RawCell::Binary(bytes) => RowValues::Blob(bytes),
        RawCell::Text(s) => match class {
            TypeClass::Bit => RowValues::Bool(matches!(s.trim(), "1" | "true" | "TRUE")),
            TypeClass::Integer => RowValues::Int(
                s.trim()
                    .parse()
                    .map_err(|_| unparsable(&s, column))?,
            ),
            TypeClass::Approximate => RowValues::Float(
                s.trim()
                    .parse()
                    .map_err(|_| unparsable(&s, column))?,
            ),
            TypeClass::DateTime if column.data_type == SqlDataType::TIMESTAMP => {
                match parse_timestamp(&s) {
                    Some(ts) => RowValues::Timestamp(ts),
                    None => RowValues::Text(s),
                }
            }
            _ => RowValues::Text(s),
        },
    };
    Ok(value)
}

fn unparsable(text: &str, column: &ColumnDescription) -> OdbcStatementError {
    OdbcStatementError::ConversionError(format!(
        "column {}: cannot read {text:?} as {}",
        column.name, column.data_type
    ))
}

/// A row from a statement result
///
/// Column metadata and the name lookup table are shared by every row of the same result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<ColumnDescription>>,
    index: Arc<HashMap<String, usize>>,
    values: Vec<RowValues>,
}

impl Row {
    /// Get a value from the row by column name
    ///
    /// # Arguments
    ///
    /// * `column_name` - The name of the column
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.index
            .get(column_name)
            .and_then(|&idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &[RowValues] {
        &self.values
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }
}

/// Rows returned by one execute, plus their column metadata.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub results: Vec<Row>,
    columns: Arc<Vec<ColumnDescription>>,
    index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set for `columns` with room for `capacity` rows
    #[must_use]
    pub fn with_capacity(columns: Arc<Vec<ColumnDescription>>, capacity: usize) -> ResultSet {
        // First occurrence wins when a driver reports duplicate column names.
        let mut index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            index.entry(column.name.clone()).or_insert(i);
        }
        ResultSet {
            results: Vec::with_capacity(capacity),
            columns,
            index: Arc::new(index),
        }
    }

    /// Add a row to the result set
    ///
    /// # Arguments
    ///
    /// * `row_values` - The values for this row, in column order
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results.push(Row {
            columns: Arc::clone(&self.columns),
            index: Arc::clone(&self.index),
            values: row_values,
        });
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
