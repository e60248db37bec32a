//! Non-blocking execution of one prepared statement over a call-level (ODBC-style) driver.
//!
//! A [`Statement`] owns a native statement handle and walks it through
//! prepare → bind → execute → close. Each step runs its blocking driver calls on a dispatched
//! worker thread and resolves once the driver is done, so the awaiting task never stalls on a
//! database round-trip.
//!
//! ```rust,ignore
//! use odbc_statement::prelude::*;
//!
//! let mut stmt = Statement::allocate(driver, env, dbc, StatementConfig::default())?;
//! stmt.prepare("SELECT ? + ? AS total").await?;
//! stmt.bind(&[RowValues::Int(2), RowValues::Int(3)]).await?;
//! let output = stmt.execute().await?;
//! stmt.close(CloseMode::Destroy).await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod handle;
pub mod params;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{StatementConfig, StatementConfigBuilder};
pub use error::{OdbcStatementError, Result};
pub use results::{ResultSet, Row, StatementOutput};
pub use statement::{CloseMode, Statement, StatementState};
pub use types::RowValues;
