//! Contract this crate consumes from the call-level driver.
//!
//! Every call may block. A call either succeeds (`SQL_SUCCESS` or `SQL_SUCCESS_WITH_INFO`) or
//! returns the non-success [`SqlReturn`]. Diagnostic records only describe the most recent call on
//! a handle, so callers must ask for them before issuing anything else against that handle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::params::ParameterDescriptor;

/// Status code returned by a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlReturn(pub i16);

impl SqlReturn {
    pub const SUCCESS: SqlReturn = SqlReturn(0);
    pub const SUCCESS_WITH_INFO: SqlReturn = SqlReturn(1);
    pub const STILL_EXECUTING: SqlReturn = SqlReturn(2);
    pub const NEED_DATA: SqlReturn = SqlReturn(99);
    pub const NO_DATA: SqlReturn = SqlReturn(100);
    pub const ERROR: SqlReturn = SqlReturn(-1);
    pub const INVALID_HANDLE: SqlReturn = SqlReturn(-2);

    /// `SQL_SUCCEEDED`: plain success or success with diagnostics attached.
    #[must_use]
    pub fn succeeded(self) -> bool {
        self == Self::SUCCESS || self == Self::SUCCESS_WITH_INFO
    }
}

impl fmt::Display for SqlReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "SQL_SUCCESS",
            Self::SUCCESS_WITH_INFO => "SQL_SUCCESS_WITH_INFO",
            Self::STILL_EXECUTING => "SQL_STILL_EXECUTING",
            Self::NEED_DATA => "SQL_NEED_DATA",
            Self::NO_DATA => "SQL_NO_DATA",
            Self::ERROR => "SQL_ERROR",
            Self::INVALID_HANDLE => "SQL_INVALID_HANDLE",
            SqlReturn(other) => return write!(f, "SQLRETURN({other})"),
        };
        f.write_str(name)
    }
}

/// SQL data type code as reported by `DescribeParam` / `DescribeCol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlDataType(pub i16);

impl SqlDataType {
    pub const UNKNOWN_TYPE: SqlDataType = SqlDataType(0);
    pub const CHAR: SqlDataType = SqlDataType(1);
    pub const NUMERIC: SqlDataType = SqlDataType(2);
    pub const DECIMAL: SqlDataType = SqlDataType(3);
    pub const INTEGER: SqlDataType = SqlDataType(4);
    pub const SMALLINT: SqlDataType = SqlDataType(5);
    pub const FLOAT: SqlDataType = SqlDataType(6);
    pub const REAL: SqlDataType = SqlDataType(7);
    pub const DOUBLE: SqlDataType = SqlDataType(8);
    pub const VARCHAR: SqlDataType = SqlDataType(12);
    pub const DATE: SqlDataType = SqlDataType(91);
    pub const TIME: SqlDataType = SqlDataType(92);
    pub const TIMESTAMP: SqlDataType = SqlDataType(93);
    pub const LONGVARCHAR: SqlDataType = SqlDataType(-1);
    pub const BINARY: SqlDataType = SqlDataType(-2);
    pub const VARBINARY: SqlDataType = SqlDataType(-3);
    pub const LONGVARBINARY: SqlDataType = SqlDataType(-4);
    pub const BIGINT: SqlDataType = SqlDataType(-5);
    pub const TINYINT: SqlDataType = SqlDataType(-6);
    pub const BIT: SqlDataType = SqlDataType(-7);
    pub const WCHAR: SqlDataType = SqlDataType(-8);
    pub const WVARCHAR: SqlDataType = SqlDataType(-9);
    pub const WLONGVARCHAR: SqlDataType = SqlDataType(-10);

    #[must_use]
    pub fn class(self) -> TypeClass {
        match self {
            Self::BIT => TypeClass::Bit,
            Self::TINYINT | Self::SMALLINT | Self::INTEGER | Self::BIGINT => TypeClass::Integer,
            Self::NUMERIC | Self::DECIMAL => TypeClass::Decimal,
            Self::FLOAT | Self::REAL | Self::DOUBLE => TypeClass::Approximate,
            Self::CHAR | Self::VARCHAR | Self::WCHAR | Self::WVARCHAR => TypeClass::Character,
            Self::LONGVARCHAR | Self::WLONGVARCHAR => TypeClass::LongCharacter,
            Self::BINARY | Self::VARBINARY => TypeClass::Binary,
            Self::LONGVARBINARY => TypeClass::LongBinary,
            Self::DATE | Self::TIME | Self::TIMESTAMP => TypeClass::DateTime,
            _ => TypeClass::Unknown,
        }
    }
}

impl fmt::Display for SqlDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::UNKNOWN_TYPE => "UNKNOWN",
            Self::CHAR => "CHAR",
            Self::NUMERIC => "NUMERIC",
            Self::DECIMAL => "DECIMAL",
            Self::INTEGER => "INTEGER",
            Self::SMALLINT => "SMALLINT",
            Self::FLOAT => "FLOAT",
            Self::REAL => "REAL",
            Self::DOUBLE => "DOUBLE",
            Self::VARCHAR => "VARCHAR",
            Self::DATE => "DATE",
            Self::TIME => "TIME",
            Self::TIMESTAMP => "TIMESTAMP",
            Self::LONGVARCHAR => "LONGVARCHAR",
            Self::BINARY => "BINARY",
            Self::VARBINARY => "VARBINARY",
            Self::LONGVARBINARY => "LONGVARBINARY",
            Self::BIGINT => "BIGINT",
            Self::TINYINT => "TINYINT",
            Self::BIT => "BIT",
            Self::WCHAR => "WCHAR",
            Self::WVARCHAR => "WVARCHAR",
            Self::WLONGVARCHAR => "WLONGVARCHAR",
            SqlDataType(other) => return write!(f, "SQL type {other}"),
        };
        f.write_str(name)
    }
}

/// Coarse grouping of SQL types used by the binder and the materializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Bit,
    Integer,
    Decimal,
    Approximate,
    Character,
    LongCharacter,
    Binary,
    LongBinary,
    DateTime,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Nullability {
    NoNulls,
    Nullable,
    #[default]
    Unknown,
}

/// Output of `DescribeParam`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDescription {
    pub data_type: SqlDataType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: Nullability,
}

impl ParamDescription {
    #[must_use]
    pub fn new(data_type: SqlDataType, column_size: usize, decimal_digits: i16) -> Self {
        Self {
            data_type,
            column_size,
            decimal_digits,
            nullable: Nullability::Unknown,
        }
    }
}

/// Output of `DescribeCol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: SqlDataType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullable: Nullability,
}

/// One fetched cell, already converted by the driver into a C-level representation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbcHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    Env,
    Dbc,
    Stmt,
}

/// Any handle diagnostics can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Env(EnvHandle),
    Dbc(DbcHandle),
    Stmt(StmtHandle),
}

impl Handle {
    #[must_use]
    pub fn handle_type(self) -> HandleType {
        match self {
            Handle::Env(_) => HandleType::Env,
            Handle::Dbc(_) => HandleType::Dbc,
            Handle::Stmt(_) => HandleType::Stmt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    /// Five character SQLSTATE.
    pub state: String,
    pub native_error: i32,
    pub message: String,
}

/// Option values accepted by `FreeStmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreeStmtOption {
    Close,
    Unbind,
    ResetParams,
}

impl FreeStmtOption {
    #[must_use]
    pub fn code(self) -> i16 {
        match self {
            FreeStmtOption::Close => 0,
            FreeStmtOption::Unbind => 2,
            FreeStmtOption::ResetParams => 3,
        }
    }
}

pub type DriverResult<T> = Result<T, SqlReturn>;

/// Blocking primitives of the call-level interface.
///
/// Parameter and column numbers are 1-based, as on the wire.
pub trait OdbcDriver: Send + Sync {
    /// Allocate a statement handle on a connection.
    fn alloc_stmt(&self, dbc: DbcHandle) -> DriverResult<StmtHandle>;

    fn prepare(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()>;

    fn num_params(&self, stmt: StmtHandle) -> DriverResult<u16>;

    fn describe_param(&self, stmt: StmtHandle, number: u16) -> DriverResult<ParamDescription>;

    fn bind_parameter(
        &self,
        stmt: StmtHandle,
        number: u16,
        descriptor: &ParameterDescriptor,
    ) -> DriverResult<()>;

    fn execute(&self, stmt: StmtHandle) -> DriverResult<()>;

    /// Zero when the last execute produced no result set.
    fn num_result_cols(&self, stmt: StmtHandle) -> DriverResult<u16>;

    fn describe_col(&self, stmt: StmtHandle, number: u16) -> DriverResult<ColumnDescription>;

    /// Next row of the open cursor, `None` once the driver reports `SQL_NO_DATA`.
    fn fetch(&self, stmt: StmtHandle) -> DriverResult<Option<Vec<RawCell>>>;

    /// Rows affected by the last execute; negative when the driver cannot tell.
    fn row_count(&self, stmt: StmtHandle) -> DriverResult<i64>;

    fn free_stmt(&self, stmt: StmtHandle, option: FreeStmtOption) -> DriverResult<()>;

    fn free_handle(&self, stmt: StmtHandle) -> DriverResult<()>;

    /// First diagnostic record attached to `handle`, if any.
    fn get_diagnostics(&self, handle: Handle) -> Option<DiagnosticRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_with_info_counts_as_success() {
        assert!(SqlReturn::SUCCESS.succeeded());
        assert!(SqlReturn::SUCCESS_WITH_INFO.succeeded());
        assert!(!SqlReturn::ERROR.succeeded());
        assert!(!SqlReturn::NO_DATA.succeeded());
    }

    #[test]
    fn display_names_known_and_unknown_codes() {
        assert_eq!(SqlReturn::ERROR.to_string(), "SQL_ERROR");
        assert_eq!(SqlReturn(-7).to_string(), "SQLRETURN(-7)");
        assert_eq!(SqlDataType::WVARCHAR.to_string(), "WVARCHAR");
    }

    #[test]
    fn type_classes() {
        assert_eq!(SqlDataType::BIGINT.class(), TypeClass::Integer);
        assert_eq!(SqlDataType::WLONGVARCHAR.class(), TypeClass::LongCharacter);
        assert_eq!(SqlDataType(-154).class(), TypeClass::Unknown);
    }
}
