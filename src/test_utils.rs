//! In-memory driver for exercising statements without a database.
//!
//! Statements are scripted per SQL text: declared parameters, result columns, and a responder
//! that turns the bound values into rows or an affected-row count. Faults can be injected for
//! any driver call, and every call is counted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::driver::{
    ColumnDescription, DbcHandle, DiagnosticRecord, DriverResult, FreeStmtOption, Handle,
    Nullability, OdbcDriver, ParamDescription, RawCell, SqlDataType, SqlReturn, StmtHandle,
};
use crate::params::{NativeValue, ParameterDescriptor};

/// Driver entry points, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCall {
    AllocStmt,
    Prepare,
    NumParams,
    DescribeParam,
    BindParameter,
    Execute,
    NumResultCols,
    DescribeCol,
    Fetch,
    RowCount,
    FreeStmt,
    FreeHandle,
}

/// What a scripted statement produces when executed.
#[derive(Debug, Clone, PartialEq)]
pub enum StubOutcome {
    Rows(Vec<Vec<RawCell>>),
    Affected(i64),
}

type Responder = Arc<dyn Fn(&[NativeValue]) -> StubOutcome + Send + Sync>;

/// Script for one SQL text.
#[derive(Clone)]
pub struct StubStatement {
    params: Vec<ParamDescription>,
    columns: Vec<ColumnDescription>,
    responder: Responder,
    execute_delay: Option<Duration>,
}

impl StubStatement {
    /// A statement with no parameters, no result set and zero affected rows.
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            columns: Vec::new(),
            responder: Arc::new(|_| StubOutcome::Affected(0)),
            execute_delay: None,
        }
    }

    #[must_use]
    pub fn param(mut self, data_type: SqlDataType, column_size: usize, decimal_digits: i16) -> Self {
        self.params
            .push(ParamDescription::new(data_type, column_size, decimal_digits));
        self
    }

    #[must_use]
    pub fn integer_params(mut self, count: usize) -> Self {
        for _ in 0..count {
            self = self.param(SqlDataType::INTEGER, 10, 0);
        }
        self
    }

    #[must_use]
    pub fn column(mut self, name: &str, data_type: SqlDataType) -> Self {
        self.columns.push(ColumnDescription {
            name: name.to_string(),
            data_type,
            column_size: 0,
            decimal_digits: 0,
            nullable: Nullability::Nullable,
        });
        self
    }

    #[must_use]
    pub fn responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[NativeValue]) -> StubOutcome + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Return fixed rows regardless of the bound values.
    #[must_use]
    pub fn rows(self, rows: Vec<Vec<RawCell>>) -> Self {
        self.responder(move |_| StubOutcome::Rows(rows.clone()))
    }

    /// Report a fixed affected-row count.
    #[must_use]
    pub fn affected(self, count: i64) -> Self {
        self.responder(move |_| StubOutcome::Affected(count))
    }

    /// Return the bound values as a single row.
    #[must_use]
    pub fn echo(self) -> Self {
        self.responder(|values| StubOutcome::Rows(vec![values.iter().map(native_to_cell).collect()]))
    }

    /// Make `SQLExecute` block for `delay` before returning.
    #[must_use]
    pub fn execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }
}

impl Default for StubStatement {
    fn default() -> Self {
        Self::new()
    }
}

/// The cell a driver would hand back for a bound value.
#[must_use]
pub fn native_to_cell(value: &NativeValue) -> RawCell {
    match value {
        NativeValue::Null => RawCell::Null,
        NativeValue::Integer(i) => RawCell::Integer(*i),
        NativeValue::Double(f) => RawCell::Double(*f),
        NativeValue::Text { value, .. } | NativeValue::LargeText(value) => {
            RawCell::Text(value.clone())
        }
        NativeValue::Binary { value, .. } | NativeValue::LargeBinary(value) => {
            RawCell::Binary(value.clone())
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    call: DriverCall,
    code: SqlReturn,
    record: DiagnosticRecord,
    remaining: usize,
}

#[derive(Default)]
struct StubHandle {
    script: Option<StubStatement>,
    bound: BTreeMap<u16, ParameterDescriptor>,
    cursor: Option<VecDeque<Vec<RawCell>>>,
    result_columns: Vec<ColumnDescription>,
    row_count: i64,
    diag: Option<DiagnosticRecord>,
}

#[derive(Default)]
struct StubState {
    scripts: HashMap<String, StubStatement>,
    handles: HashMap<StmtHandle, StubHandle>,
    next_handle: u64,
    faults: Vec<Fault>,
    calls: HashMap<DriverCall, usize>,
    frees: HashMap<StmtHandle, usize>,
    dbc_diag: Option<DiagnosticRecord>,
}

impl StubState {
    /// Count the call, reset the handle's diagnostics, and apply any injected fault.
    fn enter(&mut self, call: DriverCall, stmt: Option<StmtHandle>) -> DriverResult<()> {
        *self.calls.entry(call).or_default() += 1;
        if let Some(stmt) = stmt {
            match self.handles.get_mut(&stmt) {
                Some(handle) => handle.diag = None,
                None => return Err(SqlReturn::INVALID_HANDLE),
            }
        }
        let Some(pos) = self.faults.iter().position(|f| f.call == call) else {
            return Ok(());
        };
        let fault = self.faults[pos].clone();
        if fault.remaining <= 1 {
            self.faults.remove(pos);
        } else {
            self.faults[pos].remaining -= 1;
        }
        match stmt {
            Some(stmt) => self.set_diag(stmt, fault.record),
            None => self.dbc_diag = Some(fault.record),
        }
        if fault.code.succeeded() {
            Ok(())
        } else {
            Err(fault.code)
        }
    }

    fn handle(&mut self, stmt: StmtHandle) -> &mut StubHandle {
        self.handles.entry(stmt).or_default()
    }

    fn set_diag(&mut self, stmt: StmtHandle, record: DiagnosticRecord) {
        self.handle(stmt).diag = Some(record);
    }

    fn fail(&mut self, stmt: StmtHandle, state: &str, message: &str) -> SqlReturn {
        self.set_diag(
            stmt,
            DiagnosticRecord {
                state: state.to_string(),
                native_error: 0,
                message: message.to_string(),
            },
        );
        SqlReturn::ERROR
    }
}

/// Scriptable in-memory [`OdbcDriver`].
#[derive(Default)]
pub struct StubDriver {
    state: Mutex<StubState>,
}

impl StubDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script used when `sql` is prepared.
    #[must_use]
    pub fn with_statement(self, sql: &str, script: StubStatement) -> Self {
        self.lock().scripts.insert(sql.to_string(), script);
        self
    }

    /// Fail the next `times` calls of `call` with `code` and the given diagnostic.
    pub fn inject_fault(
        &self,
        call: DriverCall,
        code: SqlReturn,
        state: &str,
        message: &str,
        times: usize,
    ) {
        self.lock().faults.push(Fault {
            call,
            code,
            record: DiagnosticRecord {
                state: state.to_string(),
                native_error: 0,
                message: message.to_string(),
            },
            remaining: times.max(1),
        });
    }

    /// Fail the next call of `call` with `SQL_ERROR`.
    pub fn fail_next(&self, call: DriverCall, message: &str) {
        self.inject_fault(call, SqlReturn::ERROR, "HY000", message, 1);
    }

    /// Let the next call of `call` succeed with an informational diagnostic attached.
    pub fn info_next(&self, call: DriverCall, message: &str) {
        self.inject_fault(call, SqlReturn::SUCCESS_WITH_INFO, "01000", message, 1);
    }

    #[must_use]
    pub fn calls(&self, call: DriverCall) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// How many times `SQLFreeHandle` succeeded or was attempted for `stmt`.
    #[must_use]
    pub fn free_count(&self, stmt: StmtHandle) -> usize {
        self.lock().frees.get(&stmt).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Parameters currently bound on `stmt`, keyed by 1-based number.
    #[must_use]
    pub fn bound_values(&self, stmt: StmtHandle) -> Vec<NativeValue> {
        self.lock()
            .handles
            .get(&stmt)
            .map(|h| h.bound.values().map(|d| d.value().clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl OdbcDriver for StubDriver {
    fn alloc_stmt(&self, _dbc: DbcHandle) -> DriverResult<StmtHandle> {
        let mut st = self.lock();
        st.enter(DriverCall::AllocStmt, None)?;
        st.next_handle += 1;
        let stmt = StmtHandle(st.next_handle);
        st.handles.insert(stmt, StubHandle::default());
        Ok(stmt)
    }

    fn prepare(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()> {
        let mut st = self.lock();
        st.enter(DriverCall::Prepare, Some(stmt))?;
        let Some(script) = st.scripts.get(sql).cloned() else {
            return Err(st.fail(stmt, "42000", &format!("syntax error or access violation: {sql}")));
        };
        let handle = st.handle(stmt);
        handle.script = Some(script);
        handle.bound.clear();
        handle.cursor = None;
        Ok(())
    }

    fn num_params(&self, stmt: StmtHandle) -> DriverResult<u16> {
        let mut st = self.lock();
        st.enter(DriverCall::NumParams, Some(stmt))?;
        let count = st
            .handle(stmt)
            .script
            .as_ref()
            .map_or(0, |script| script.params.len());
        u16::try_from(count).map_err(|_| st.fail(stmt, "HY000", "too many parameters"))
    }

    fn describe_param(&self, stmt: StmtHandle, number: u16) -> DriverResult<ParamDescription> {
        let mut st = self.lock();
        st.enter(DriverCall::DescribeParam, Some(stmt))?;
        let described = st.handle(stmt).script.as_ref().and_then(|script| {
            script
                .params
                .get(usize::from(number).wrapping_sub(1))
                .copied()
        });
        described.ok_or_else(|| st.fail(stmt, "07009", "invalid descriptor index"))
    }

    fn bind_parameter(
        &self,
        stmt: StmtHandle,
        number: u16,
        descriptor: &ParameterDescriptor,
    ) -> DriverResult<()> {
        let mut st = self.lock();
        st.enter(DriverCall::BindParameter, Some(stmt))?;
        st.handle(stmt).bound.insert(number, descriptor.clone());
        Ok(())
    }

    fn execute(&self, stmt: StmtHandle) -> DriverResult<()> {
        let delay = {
            let mut st = self.lock();
            st.enter(DriverCall::Execute, Some(stmt))?;
            let handle = st.handle(stmt);
            let Some(script) = handle.script.clone() else {
                return Err(st.fail(stmt, "HY010", "function sequence error"));
            };
            if handle.cursor.is_some() {
                return Err(st.fail(stmt, "24000", "invalid cursor state"));
            }
            if handle.bound.len() < script.params.len() {
                return Err(st.fail(stmt, "07002", "COUNT field incorrect"));
            }
            let values: Vec<NativeValue> =
                handle.bound.values().map(|d| d.value().clone()).collect();
            match (script.responder)(&values) {
                StubOutcome::Rows(rows) => {
                    handle.result_columns = script.columns.clone();
                    handle.cursor = Some(rows.into());
                    handle.row_count = -1;
                }
                StubOutcome::Affected(count) => {
                    handle.result_columns.clear();
                    handle.cursor = None;
                    handle.row_count = count;
                }
            }
            script.execute_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn num_result_cols(&self, stmt: StmtHandle) -> DriverResult<u16> {
        let mut st = self.lock();
        st.enter(DriverCall::NumResultCols, Some(stmt))?;
        let count = st.handle(stmt).result_columns.len();
        u16::try_from(count).map_err(|_| st.fail(stmt, "HY000", "too many columns"))
    }

    fn describe_col(&self, stmt: StmtHandle, number: u16) -> DriverResult<ColumnDescription> {
        let mut st = self.lock();
        st.enter(DriverCall::DescribeCol, Some(stmt))?;
        let described = st
            .handle(stmt)
            .result_columns
            .get(usize::from(number).wrapping_sub(1))
            .cloned();
        described.ok_or_else(|| st.fail(stmt, "07009", "invalid descriptor index"))
    }

    fn fetch(&self, stmt: StmtHandle) -> DriverResult<Option<Vec<RawCell>>> {
        let mut st = self.lock();
        st.enter(DriverCall::Fetch, Some(stmt))?;
        match st.handle(stmt).cursor.as_mut() {
            Some(cursor) => Ok(cursor.pop_front()),
            None => Err(st.fail(stmt, "24000", "invalid cursor state")),
        }
    }

    fn row_count(&self, stmt: StmtHandle) -> DriverResult<i64> {
        let mut st = self.lock();
        st.enter(DriverCall::RowCount, Some(stmt))?;
        Ok(st.handle(stmt).row_count)
    }

    fn free_stmt(&self, stmt: StmtHandle, option: FreeStmtOption) -> DriverResult<()> {
        let mut st = self.lock();
        st.enter(DriverCall::FreeStmt, Some(stmt))?;
        let handle = st.handle(stmt);
        match option {
            FreeStmtOption::Close => handle.cursor = None,
            FreeStmtOption::ResetParams => handle.bound.clear(),
            FreeStmtOption::Unbind => {}
        }
        Ok(())
    }

    fn free_handle(&self, stmt: StmtHandle) -> DriverResult<()> {
        let mut st = self.lock();
        *st.frees.entry(stmt).or_default() += 1;
        st.enter(DriverCall::FreeHandle, Some(stmt))?;
        st.handles.remove(&stmt);
        Ok(())
    }

    fn get_diagnostics(&self, handle: Handle) -> Option<DiagnosticRecord> {
        let st = self.lock();
        match handle {
            Handle::Stmt(stmt) => st.handles.get(&stmt).and_then(|h| h.diag.clone()),
            Handle::Dbc(_) | Handle::Env(_) => st.dbc_diag.clone(),
        }
    }
}
