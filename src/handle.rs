use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::driver::{DbcHandle, FreeStmtOption, Handle, OdbcDriver, StmtHandle};
use crate::error::{OdbcStatementError, Result};

/// Serializes statement handle allocation and release across the process.
///
/// Only alloc/free paths take this lock; execute and fetch on an owned handle never do.
static HANDLE_TABLE_LOCK: Mutex<()> = Mutex::new(());

fn handle_table_guard() -> MutexGuard<'static, ()> {
    match HANDLE_TABLE_LOCK.lock() {
        Ok(guard) => guard,
        // The guarded data is `()`, so a panic elsewhere cannot leave it inconsistent.
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive owner of one native statement handle.
///
/// Not `Clone`. The handle is released at most once, either through [`OwnedStmtHandle::release`]
/// or on drop.
pub struct OwnedStmtHandle {
    driver: Arc<dyn OdbcDriver>,
    raw: StmtHandle,
    released: bool,
}

impl OwnedStmtHandle {
    /// Allocate a fresh statement handle on `dbc`.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::DriverError`] with the connection's diagnostics if the
    /// driver refuses the allocation.
    pub fn allocate(driver: Arc<dyn OdbcDriver>, dbc: DbcHandle) -> Result<Self> {
        let raw = {
            let _guard = handle_table_guard();
            driver.alloc_stmt(dbc).map_err(|code| {
                let diag = driver.get_diagnostics(Handle::Dbc(dbc));
                crate::statement::driver_error("SQLAllocHandle(SQL_HANDLE_STMT)", code, diag)
            })?
        };
        debug!(stmt = raw.0, "allocated statement handle");
        Ok(Self {
            driver,
            raw,
            released: false,
        })
    }

    /// Take ownership of a handle the connection already allocated.
    #[must_use]
    pub fn adopt(driver: Arc<dyn OdbcDriver>, raw: StmtHandle) -> Self {
        Self {
            driver,
            raw,
            released: false,
        }
    }

    /// The native handle, or `InvalidState` once released.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidState`] after the handle was released.
    pub fn raw(&self) -> Result<StmtHandle> {
        if self.released {
            return Err(OdbcStatementError::InvalidState(
                "statement handle already released".into(),
            ));
        }
        Ok(self.raw)
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn driver(&self) -> &Arc<dyn OdbcDriver> {
        &self.driver
    }

    /// Close any open cursor and free the handle. A second call is a silent no-op.
    ///
    /// The handle counts as released even when the driver reports a failure, so it is never
    /// handed to `SQLFreeHandle` twice.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::DriverError`] if `SQLFreeHandle` fails.
    pub fn release(&mut self) -> Result<()> {
        let _guard = handle_table_guard();
        if self.released {
            return Ok(());
        }
        if let Err(code) = self.driver.free_stmt(self.raw, FreeStmtOption::Close) {
            debug!(stmt = self.raw.0, %code, "SQLFreeStmt(SQL_CLOSE) failed before free");
        }
        let freed = self.driver.free_handle(self.raw).map_err(|code| {
            let diag = self.driver.get_diagnostics(Handle::Stmt(self.raw));
            crate::statement::driver_error("SQLFreeHandle(SQL_HANDLE_STMT)", code, diag)
        });
        self.released = true;
        debug!(stmt = self.raw.0, ok = freed.is_ok(), "released statement handle");
        freed
    }
}

impl Drop for OwnedStmtHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(stmt = self.raw.0, error = %err, "failed to free statement handle on drop");
        }
    }
}

impl fmt::Debug for OwnedStmtHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedStmtHandle")
            .field("raw", &self.raw)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
