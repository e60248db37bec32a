use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::StatementConfig;
use crate::dispatch::Dispatcher;
use crate::driver::{
    DbcHandle, DiagnosticRecord, DriverResult, EnvHandle, FreeStmtOption, Handle, OdbcDriver,
    SqlReturn, StmtHandle,
};
use crate::error::{OdbcStatementError, Result};
use crate::handle::OwnedStmtHandle;
use crate::params::{NativeValue, ParameterDescriptor, convert_params};
use crate::results::{
    DefaultMaterializer, RawResultSet, ResultMaterializer, StatementOutput,
};
use crate::types::RowValues;

/// Lifecycle of a [`Statement`]. A failed operation never changes the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Created,
    Prepared,
    Bound,
    Executing,
    Executed,
    Closed,
}

/// How [`Statement::close`] treats the native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Close the open cursor, keep everything else.
    Close,
    /// Release column bindings.
    Unbind,
    /// Release parameter bindings; the statement must be bound again before execute.
    ResetParams,
    /// Free the native handle. Terminal.
    Destroy,
}

impl CloseMode {
    /// Map the classic `SQLFreeStmt` option codes (`SQL_CLOSE` = 0, `SQL_DROP` = 1,
    /// `SQL_UNBIND` = 2, `SQL_RESET_PARAMS` = 3).
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidArgument`] for any other code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(CloseMode::Close),
            1 => Ok(CloseMode::Destroy),
            2 => Ok(CloseMode::Unbind),
            3 => Ok(CloseMode::ResetParams),
            other => Err(OdbcStatementError::InvalidArgument(format!(
                "unknown close option {other}"
            ))),
        }
    }

    fn free_option(self) -> Option<FreeStmtOption> {
        match self {
            CloseMode::Close => Some(FreeStmtOption::Close),
            CloseMode::Unbind => Some(FreeStmtOption::Unbind),
            CloseMode::ResetParams => Some(FreeStmtOption::ResetParams),
            CloseMode::Destroy => None,
        }
    }
}

pub(crate) fn driver_error(
    context: &'static str,
    code: SqlReturn,
    diag: Option<DiagnosticRecord>,
) -> OdbcStatementError {
    let (state, message) = match diag {
        Some(record) => (record.state, record.message),
        None => ("HY000".to_string(), "no diagnostic record available".to_string()),
    };
    OdbcStatementError::DriverError {
        context,
        code,
        state,
        message,
    }
}

/// One prepared statement over a call-level driver.
///
/// Every operation runs its driver calls on a dispatched worker thread; the awaiting task never
/// blocks. Operations take `&mut self`, so a statement serves one operation at a time. If a
/// returned future is dropped before completion the work still finishes, but the statement is no
/// longer usable and further operations fail with [`OdbcStatementError::InvalidState`].
pub struct Statement {
    env: EnvHandle,
    dbc: DbcHandle,
    stmt: StmtHandle,
    state: StatementState,
    // `None` while a dispatched task owns it.
    core: Option<StatementCore>,
    dispatcher: Dispatcher,
    materializer: Arc<dyn ResultMaterializer>,
    config: StatementConfig,
}

impl Statement {
    /// Wrap handles allocated by the owning connection. The statement handle becomes owned by
    /// the returned value and is freed exactly once.
    #[must_use]
    pub fn new(
        driver: Arc<dyn OdbcDriver>,
        env: EnvHandle,
        dbc: DbcHandle,
        stmt: StmtHandle,
        config: StatementConfig,
    ) -> Self {
        let handle = OwnedStmtHandle::adopt(driver, stmt);
        Self::from_owned(env, dbc, handle, config)
    }

    /// Allocate a new statement handle on `dbc` and wrap it.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::DriverError`] if the driver refuses the allocation.
    pub fn allocate(
        driver: Arc<dyn OdbcDriver>,
        env: EnvHandle,
        dbc: DbcHandle,
        config: StatementConfig,
    ) -> Result<Self> {
        let handle = OwnedStmtHandle::allocate(driver, dbc)?;
        Ok(Self::from_owned(env, dbc, handle, config))
    }

    fn from_owned(
        env: EnvHandle,
        dbc: DbcHandle,
        handle: OwnedStmtHandle,
        config: StatementConfig,
    ) -> Self {
        let stmt = handle.raw().unwrap_or(StmtHandle(0));
        Self {
            env,
            dbc,
            stmt,
            state: StatementState::Created,
            core: Some(StatementCore::new(handle)),
            dispatcher: Dispatcher::new(&config.worker_thread_prefix),
            materializer: Arc::new(DefaultMaterializer),
            config,
        }
    }

    /// Replace the default result materializer.
    #[must_use]
    pub fn with_materializer(mut self, materializer: Arc<dyn ResultMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    /// Prepare `sql` and discover its parameters.
    ///
    /// Re-preparing a live statement is allowed and always rebuilds the parameter descriptors.
    /// If the driver accepts the new SQL but parameter discovery then fails, the previous
    /// statement is gone too and the statement falls back to [`StatementState::Created`].
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidArgument`] for empty SQL,
    /// [`OdbcStatementError::InvalidState`] if the statement is closed or busy, and
    /// [`OdbcStatementError::DriverError`] if prepare or parameter discovery fails.
    pub async fn prepare(&mut self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Err(OdbcStatementError::InvalidArgument(
                "prepare requires non-empty SQL text".into(),
            ));
        }
        self.ensure_open("prepare")?;
        debug!(stmt = self.stmt.0, sql, "prepare");

        let sql = sql.to_owned();
        let threshold = self.config.large_object_threshold;
        let prepared = self
            .run("prepare", move |core| core.prepare(sql, threshold))
            .await;
        if let Err(err) = prepared {
            // The driver replaced the old statement before discovery failed.
            if self.core.as_ref().is_some_and(|core| !core.is_prepared()) {
                self.state = StatementState::Created;
            }
            return Err(err);
        }
        self.state = StatementState::Prepared;
        Ok(())
    }

    /// Bind one value per discovered parameter, in order.
    ///
    /// The length check and every value conversion happen before anything is dispatched, so a
    /// rejected bind never reaches the driver.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::ParameterCountMismatch`],
    /// [`OdbcStatementError::UnsupportedParameterType`], [`OdbcStatementError::InvalidState`]
    /// (closed, busy or not prepared) or [`OdbcStatementError::DriverError`].
    pub async fn bind(&mut self, values: &[RowValues]) -> Result<()> {
        self.ensure_open("bind")?;
        if self.state == StatementState::Created {
            return Err(OdbcStatementError::InvalidState(
                "statement must be prepared before bind".into(),
            ));
        }
        let core = self.core.as_ref().ok_or_else(busy)?;
        let natives = convert_params(&core.parameters, values)?;
        debug!(stmt = self.stmt.0, count = natives.len(), "bind");

        self.run("bind", move |core| core.bind(natives)).await?;
        self.state = StatementState::Bound;
        Ok(())
    }

    /// Execute the statement and fetch its complete result.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidState`] if the statement is closed or not ready
    /// (parameters declared but never bound), [`OdbcStatementError::DriverError`] if execute or
    /// fetch fails (the statement stays bound and may be executed again), or whatever the
    /// materializer reports.
    pub async fn execute(&mut self) -> Result<StatementOutput> {
        self.ensure_open("execute")?;
        let ready = match self.state {
            StatementState::Bound | StatementState::Executed => true,
            StatementState::Prepared => self.parameter_count() == 0,
            _ => false,
        };
        if !ready {
            return Err(OdbcStatementError::InvalidState(format!(
                "cannot execute a statement in state {:?}",
                self.state
            )));
        }
        debug!(stmt = self.stmt.0, "execute");

        let prior = self.state;
        let max_rows = self.config.max_rows;
        self.state = StatementState::Executing;
        let fetched = match self.run("execute", move |core| core.execute(max_rows)).await {
            Ok(fetched) => fetched,
            Err(err) => {
                if self.state == StatementState::Executing {
                    self.state = prior;
                }
                return Err(err);
            }
        };
        self.state = StatementState::Executed;

        match fetched {
            Fetched::Rows(raw) => {
                trace!(stmt = self.stmt.0, rows = raw.rows.len(), "materializing");
                Ok(StatementOutput::Rows(self.materializer.materialize(raw)?))
            }
            Fetched::RowsAffected(count) => Ok(StatementOutput::RowsAffected(count)),
        }
    }

    /// Soft-reset or destroy the statement.
    ///
    /// `Destroy` on an already closed statement succeeds without touching the driver.
    ///
    /// # Errors
    /// Returns [`OdbcStatementError::InvalidState`] for a soft close on a closed or busy
    /// statement, and [`OdbcStatementError::DriverError`] if the driver call fails.
    pub async fn close(&mut self, mode: CloseMode) -> Result<()> {
        debug!(stmt = self.stmt.0, ?mode, "close");
        let Some(option) = mode.free_option() else {
            if self.state == StatementState::Closed {
                return Ok(());
            }
            let released = if self.core.is_some() {
                self.run("close", |core| core.handle.release()).await
            } else {
                // An abandoned dispatch still owns the core and frees the handle when it ends.
                Ok(())
            };
            // The handle counts as released even if the driver complained.
            self.core = None;
            self.state = StatementState::Closed;
            return released;
        };

        self.ensure_open("close")?;
        self.run("close", move |core| core.soft_close(option)).await?;
        self.state = match (mode, self.state) {
            (CloseMode::Close, StatementState::Executed) => StatementState::Bound,
            (CloseMode::ResetParams, StatementState::Bound | StatementState::Executed) => {
                StatementState::Prepared
            }
            (_, state) => state,
        };
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> StatementState {
        self.state
    }

    /// True while a dispatched operation owns the statement internals.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.core.is_none() && self.state != StatementState::Closed
    }

    /// SQL text of the last prepare, if any.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        self.core
            .as_ref()
            .map(|core| core.sql.as_str())
            .filter(|sql| !sql.is_empty())
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parameters().len()
    }

    /// Parameter descriptors discovered by the last successful prepare.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        self.core
            .as_ref()
            .map_or(&[][..], |core| core.parameters.as_slice())
    }

    #[must_use]
    pub fn last_return_code(&self) -> Option<SqlReturn> {
        self.core.as_ref().and_then(|core| core.last_return)
    }

    #[must_use]
    pub fn last_diagnostic(&self) -> Option<&str> {
        self.core
            .as_ref()
            .and_then(|core| core.last_diagnostic.as_deref())
    }

    #[must_use]
    pub fn env_handle(&self) -> EnvHandle {
        self.env
    }

    #[must_use]
    pub fn dbc_handle(&self) -> DbcHandle {
        self.dbc
    }

    #[must_use]
    pub fn stmt_handle(&self) -> StmtHandle {
        self.stmt
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state == StatementState::Closed {
            return Err(OdbcStatementError::InvalidState(format!(
                "cannot {operation}: statement is closed"
            )));
        }
        Ok(())
    }

    /// Move the core onto a worker, run `work`, and take the core back.
    async fn run<T, F>(&mut self, operation: &'static str, work: F) -> Result<T>
    where
        F: FnOnce(&mut StatementCore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut core = self.core.take().ok_or_else(busy)?;
        let dispatched = self
            .dispatcher
            .run(operation, move || {
                let outcome = work(&mut core);
                (core, outcome)
            })
            .await;
        match dispatched {
            Ok((core, outcome)) => {
                self.core = Some(core);
                outcome
            }
            Err(err) => {
                // The core, and with it the handle, was dropped with the worker.
                self.state = StatementState::Closed;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("stmt", &self.stmt)
            .field("state", &self.state)
            .field("parameters", &self.parameter_count())
            .finish_non_exhaustive()
    }
}

fn busy() -> OdbcStatementError {
    OdbcStatementError::InvalidState(
        "another operation is in flight on this statement (or was abandoned)".into(),
    )
}

enum Fetched {
    Rows(RawResultSet),
    RowsAffected(Option<u64>),
}

/// Statement internals that travel to the worker thread with each dispatched operation.
struct StatementCore {
    handle: OwnedStmtHandle,
    sql: String,
    parameters: Vec<ParameterDescriptor>,
    last_return: Option<SqlReturn>,
    last_diagnostic: Option<String>,
}

impl StatementCore {
    fn new(handle: OwnedStmtHandle) -> Self {
        Self {
            handle,
            sql: String::new(),
            parameters: Vec::new(),
            last_return: None,
            last_diagnostic: None,
        }
    }

    fn driver(&self) -> Arc<dyn OdbcDriver> {
        Arc::clone(self.handle.driver())
    }

    /// Start a new operation: resolve the handle and forget the previous call status.
    fn begin(&mut self) -> Result<StmtHandle> {
        let stmt = self.handle.raw()?;
        self.last_return = None;
        self.last_diagnostic = None;
        Ok(stmt)
    }

    fn is_prepared(&self) -> bool {
        !self.sql.is_empty()
    }

    /// Record a call's status; on failure read the diagnostics before anything else touches
    /// the handle.
    fn check<T>(
        &mut self,
        context: &'static str,
        stmt: StmtHandle,
        result: DriverResult<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                // Keep an earlier SUCCESS_WITH_INFO from the same operation.
                if self.last_return.is_none() {
                    self.last_return = Some(SqlReturn::SUCCESS);
                }
                Ok(value)
            }
            Err(code) => {
                let diag = self.handle.driver().get_diagnostics(Handle::Stmt(stmt));
                self.last_return = Some(code);
                self.last_diagnostic = diag.as_ref().map(|d| d.message.clone());
                Err(driver_error(context, code, diag))
            }
        }
    }

    /// Like [`StatementCore::check`], but also picks up informational diagnostics left by a
    /// successful call.
    fn check_with_info<T>(
        &mut self,
        context: &'static str,
        stmt: StmtHandle,
        result: DriverResult<T>,
    ) -> Result<T> {
        let value = self.check(context, stmt, result)?;
        if let Some(info) = self.handle.driver().get_diagnostics(Handle::Stmt(stmt)) {
            warn!(stmt = stmt.0, context, state = %info.state, message = %info.message, "driver returned info");
            self.last_return = Some(SqlReturn::SUCCESS_WITH_INFO);
            self.last_diagnostic = Some(info.message);
        }
        Ok(value)
    }

    fn prepare(&mut self, sql: String, large_object_threshold: usize) -> Result<()> {
        let stmt = self.begin()?;
        let driver = self.driver();

        let prepared = driver.prepare(stmt, &sql);
        self.check_with_info("SQLPrepare", stmt, prepared)?;

        match self.discover(&driver, stmt, large_object_threshold) {
            Ok(parameters) => {
                self.sql = sql;
                self.parameters = parameters;
                Ok(())
            }
            Err(err) => {
                debug!(stmt = stmt.0, "parameter discovery failed, dropping prepared state");
                self.sql.clear();
                self.parameters.clear();
                Err(err)
            }
        }
    }

    fn discover(
        &mut self,
        driver: &Arc<dyn OdbcDriver>,
        stmt: StmtHandle,
        large_object_threshold: usize,
    ) -> Result<Vec<ParameterDescriptor>> {
        let counted = driver.num_params(stmt);
        let count = self.check("SQLNumParams", stmt, counted)?;
        trace!(stmt = stmt.0, count, "discovered parameters");

        let mut parameters = Vec::with_capacity(usize::from(count));
        for number in 1..=count {
            let described = driver.describe_param(stmt, number);
            let description = self.check("SQLDescribeParam", stmt, described)?;
            parameters.push(ParameterDescriptor::from_description(
                description,
                large_object_threshold,
            ));
        }
        Ok(parameters)
    }

    fn bind(&mut self, values: Vec<NativeValue>) -> Result<()> {
        let stmt = self.begin()?;
        let driver = self.driver();
        for (descriptor, value) in self.parameters.iter_mut().zip(values) {
            descriptor.set_value(value);
        }
        for index in 0..self.parameters.len() {
            let number = u16::try_from(index + 1).map_err(|_| {
                OdbcStatementError::InvalidArgument(format!("parameter {index} out of range"))
            })?;
            let bound = driver.bind_parameter(stmt, number, &self.parameters[index]);
            self.check("SQLBindParameter", stmt, bound)?;
        }
        Ok(())
    }

    fn execute(&mut self, max_rows: Option<usize>) -> Result<Fetched> {
        let stmt = self.begin()?;
        let driver = self.driver();

        let executed = driver.execute(stmt);
        self.check_with_info("SQLExecute", stmt, executed)?;

        // Once execute succeeded the cursor is closed on every path, so a failed fetch can be
        // retried without a soft close.
        let fetched = self.collect(&driver, stmt, max_rows);
        let closed = driver.free_stmt(stmt, FreeStmtOption::Close);
        match fetched {
            Ok(fetched) => {
                self.check("SQLFreeStmt(SQL_CLOSE)", stmt, closed)?;
                Ok(fetched)
            }
            Err(err) => {
                if let Err(code) = closed {
                    warn!(stmt = stmt.0, %code, "SQLFreeStmt(SQL_CLOSE) failed after a fetch error");
                }
                Err(err)
            }
        }
    }

    fn collect(
        &mut self,
        driver: &Arc<dyn OdbcDriver>,
        stmt: StmtHandle,
        max_rows: Option<usize>,
    ) -> Result<Fetched> {
        let counted = driver.num_result_cols(stmt);
        let column_count = self.check("SQLNumResultCols", stmt, counted)?;
        if column_count == 0 {
            let counted = driver.row_count(stmt);
            let affected = self.check("SQLRowCount", stmt, counted)?;
            let affected = u64::try_from(affected).ok();
            if affected.is_none() {
                debug!(stmt = stmt.0, "driver could not report the affected row count");
            }
            return Ok(Fetched::RowsAffected(affected));
        }

        let mut columns = Vec::with_capacity(usize::from(column_count));
        for number in 1..=column_count {
            let described = driver.describe_col(stmt, number);
            columns.push(self.check("SQLDescribeCol", stmt, described)?);
        }

        let mut rows = Vec::new();
        while max_rows.is_none_or(|limit| rows.len() < limit) {
            let fetched = driver.fetch(stmt);
            match self.check("SQLFetch", stmt, fetched)? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        trace!(stmt = stmt.0, rows = rows.len(), "fetched result set");
        Ok(Fetched::Rows(RawResultSet { columns, rows }))
    }

    fn soft_close(&mut self, option: FreeStmtOption) -> Result<()> {
        let stmt = self.begin()?;
        let freed = self.handle.driver().free_stmt(stmt, option);
        self.check("SQLFreeStmt", stmt, freed)
    }
}
