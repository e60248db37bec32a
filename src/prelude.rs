//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to prepare, bind and execute a statement.

pub use crate::config::{StatementConfig, StatementConfigBuilder};
pub use crate::driver::{
    DbcHandle, EnvHandle, OdbcDriver, SqlDataType, SqlReturn, StmtHandle,
};
pub use crate::error::OdbcStatementError;
pub use crate::results::{
    DefaultMaterializer, RawResultSet, ResultMaterializer, ResultSet, Row, StatementOutput,
};
pub use crate::statement::{CloseMode, Statement, StatementState};
pub use crate::types::RowValues;
