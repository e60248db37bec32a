#![cfg(feature = "test-utils")]

use std::sync::Arc;

use odbc_statement::driver::{OdbcDriver, RawCell};
use odbc_statement::params::NativeValue;
use odbc_statement::prelude::*;
use odbc_statement::test_utils::{DriverCall, StubDriver, StubOutcome, StubStatement};

const SUM_SQL: &str = "SELECT ? + ? AS total";
const INSERT_SQL: &str = "INSERT INTO t VALUES (?)";
const ONE_SQL: &str = "SELECT 1 AS one";
const FIVE_ROWS_SQL: &str = "SELECT n FROM five";
const TOUCH_SQL: &str = "UPDATE t SET touched = 1";

fn stub() -> Arc<StubDriver> {
    let sum = StubStatement::new()
        .integer_params(2)
        .column("total", SqlDataType::INTEGER)
        .responder(|values| {
            let total = values
                .iter()
                .map(|v| match v {
                    NativeValue::Integer(i) => *i,
                    _ => 0,
                })
                .sum();
            StubOutcome::Rows(vec![vec![RawCell::Integer(total)]])
        });
    let five = StubStatement::new()
        .column("n", SqlDataType::INTEGER)
        .rows((1..=5).map(|n| vec![RawCell::Integer(n)]).collect());
    Arc::new(
        StubDriver::new()
            .with_statement(SUM_SQL, sum)
            .with_statement(INSERT_SQL, StubStatement::new().integer_params(1).affected(1))
            .with_statement(
                ONE_SQL,
                StubStatement::new()
                    .column("one", SqlDataType::INTEGER)
                    .rows(vec![vec![RawCell::Integer(1)]]),
            )
            .with_statement(FIVE_ROWS_SQL, five)
            .with_statement(TOUCH_SQL, StubStatement::new().affected(-1)),
    )
}

fn open_with(
    driver: &Arc<StubDriver>,
    config: StatementConfig,
) -> Result<Statement, OdbcStatementError> {
    let driver: Arc<dyn OdbcDriver> = driver.clone();
    Statement::allocate(driver, EnvHandle(1), DbcHandle(1), config)
}

fn open(driver: &Arc<StubDriver>) -> Result<Statement, OdbcStatementError> {
    open_with(driver, StatementConfig::default())
}

#[tokio::test]
async fn prepare_bind_execute_sums_parameters() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    assert_eq!(stmt.state(), StatementState::Created);

    stmt.prepare(SUM_SQL).await?;
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert_eq!(stmt.parameter_count(), 2);
    assert_eq!(stmt.sql(), Some(SUM_SQL));

    stmt.bind(&[RowValues::Int(2), RowValues::Int(3)]).await?;
    assert_eq!(stmt.state(), StatementState::Bound);

    let output = stmt.execute().await?;
    assert_eq!(stmt.state(), StatementState::Executed);
    let rows = output.rows().expect("result set");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.column_names(), vec!["total"]);
    assert_eq!(rows.results[0].get("total"), Some(&RowValues::Int(5)));
    Ok(())
}

#[tokio::test]
async fn failed_execute_stays_bound_and_can_be_retried() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(SUM_SQL).await?;
    stmt.bind(&[RowValues::Int(2), RowValues::Int(3)]).await?;

    driver.fail_next(DriverCall::Execute, "transaction was deadlocked");
    let err = stmt.execute().await.unwrap_err();
    assert!(matches!(err, OdbcStatementError::DriverError { .. }));
    assert_eq!(err.diagnostic(), Some("transaction was deadlocked"));
    assert_eq!(err.driver_code(), Some(SqlReturn::ERROR));
    assert_eq!(stmt.state(), StatementState::Bound);
    assert_eq!(stmt.last_return_code(), Some(SqlReturn::ERROR));
    assert_eq!(stmt.last_diagnostic(), Some("transaction was deadlocked"));

    let binds_before_retry = driver.calls(DriverCall::BindParameter);
    let output = stmt.execute().await?;
    assert_eq!(
        output.rows().map(|rs| rs.results[0].get("total").cloned()),
        Some(Some(RowValues::Int(5)))
    );
    assert_eq!(driver.calls(DriverCall::BindParameter), binds_before_retry);
    Ok(())
}

#[tokio::test]
async fn statement_without_result_set_reports_affected_rows() -> Result<(), Box<dyn std::error::Error>>
{
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(INSERT_SQL).await?;
    stmt.bind(&[RowValues::Int(1)]).await?;
    let output = stmt.execute().await?;
    assert_eq!(output.rows_affected(), Some(1));
    assert!(output.rows().is_none());
    Ok(())
}

#[tokio::test]
async fn failed_prepare_keeps_prior_state() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;

    let err = stmt.prepare("SELEC broken").await.unwrap_err();
    match &err {
        OdbcStatementError::DriverError { state, context, .. } => {
            assert_eq!(state, "42000");
            assert_eq!(*context, "SQLPrepare");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(stmt.state(), StatementState::Created);

    driver.fail_next(DriverCall::DescribeParam, "optional feature not implemented");
    let err = stmt.prepare(SUM_SQL).await.unwrap_err();
    assert_eq!(err.diagnostic(), Some("optional feature not implemented"));
    assert_eq!(stmt.state(), StatementState::Created);
    assert_eq!(stmt.parameter_count(), 0);
    // Discovery stopped at the first failing describe.
    assert_eq!(driver.calls(DriverCall::DescribeParam), 1);
    Ok(())
}

#[tokio::test]
async fn empty_sql_is_rejected_before_dispatch() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    let err = stmt.prepare("   ").await.unwrap_err();
    assert!(matches!(err, OdbcStatementError::InvalidArgument(_)));
    assert_eq!(driver.calls(DriverCall::Prepare), 0);
    Ok(())
}

#[tokio::test]
async fn execute_requires_binding_only_when_parameters_exist() -> Result<(), Box<dyn std::error::Error>>
{
    let driver = stub();
    let mut stmt = open(&driver)?;
    assert!(matches!(
        stmt.execute().await,
        Err(OdbcStatementError::InvalidState(_))
    ));

    stmt.prepare(SUM_SQL).await?;
    assert!(matches!(
        stmt.execute().await,
        Err(OdbcStatementError::InvalidState(_))
    ));
    assert_eq!(driver.calls(DriverCall::Execute), 0);

    stmt.prepare(ONE_SQL).await?;
    assert_eq!(stmt.parameter_count(), 0);
    let output = stmt.execute().await?;
    assert_eq!(
        output.rows().and_then(|rs| rs.results[0].get("one").cloned()),
        Some(RowValues::Int(1))
    );
    Ok(())
}

#[tokio::test]
async fn destroy_twice_frees_handle_once() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    let handle = stmt.stmt_handle();
    stmt.prepare(SUM_SQL).await?;

    stmt.close(CloseMode::Destroy).await?;
    assert_eq!(stmt.state(), StatementState::Closed);
    assert_eq!(driver.free_count(handle), 1);

    stmt.close(CloseMode::Destroy).await?;
    assert_eq!(driver.free_count(handle), 1);
    assert_eq!(driver.live_handles(), 0);

    drop(stmt);
    assert_eq!(driver.free_count(handle), 1);
    Ok(())
}

#[tokio::test]
async fn every_operation_fails_after_destroy() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    // Destroy after 0..=3 lifecycle steps, then try everything.
    for steps in 0..=3 {
        let mut stmt = open(&driver)?;
        if steps >= 1 {
            stmt.prepare(SUM_SQL).await?;
        }
        if steps >= 2 {
            stmt.bind(&[RowValues::Int(1), RowValues::Int(1)]).await?;
        }
        if steps >= 3 {
            stmt.execute().await?;
        }
        stmt.close(CloseMode::Destroy).await?;

        assert!(matches!(
            stmt.prepare(SUM_SQL).await,
            Err(OdbcStatementError::InvalidState(_))
        ));
        assert!(matches!(
            stmt.bind(&[RowValues::Int(1), RowValues::Int(1)]).await,
            Err(OdbcStatementError::InvalidState(_))
        ));
        assert!(matches!(
            stmt.execute().await,
            Err(OdbcStatementError::InvalidState(_))
        ));
        assert!(matches!(
            stmt.close(CloseMode::Close).await,
            Err(OdbcStatementError::InvalidState(_))
        ));
        assert_eq!(stmt.state(), StatementState::Closed);
    }
    assert_eq!(driver.live_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn soft_close_keeps_handle_and_adjusts_state() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    let handle = stmt.stmt_handle();
    stmt.prepare(SUM_SQL).await?;
    stmt.bind(&[RowValues::Int(4), RowValues::Int(4)]).await?;
    stmt.execute().await?;

    stmt.close(CloseMode::Close).await?;
    assert_eq!(stmt.state(), StatementState::Bound);
    stmt.execute().await?;

    stmt.close(CloseMode::Unbind).await?;
    assert_eq!(stmt.state(), StatementState::Executed);

    stmt.close(CloseMode::ResetParams).await?;
    assert_eq!(stmt.state(), StatementState::Prepared);
    // Metadata survives a soft close.
    assert_eq!(stmt.parameter_count(), 2);
    assert!(matches!(
        stmt.execute().await,
        Err(OdbcStatementError::InvalidState(_))
    ));

    stmt.bind(&[RowValues::Int(1), RowValues::Int(2)]).await?;
    let output = stmt.execute().await?;
    assert_eq!(
        output.rows().and_then(|rs| rs.results[0].get("total").cloned()),
        Some(RowValues::Int(3))
    );
    assert_eq!(driver.free_count(handle), 0);
    Ok(())
}

#[tokio::test]
async fn close_mode_codes_from_callers() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    let handle = stmt.stmt_handle();
    stmt.close(CloseMode::from_code(0)?).await?;
    assert_eq!(driver.free_count(handle), 0);
    stmt.close(CloseMode::from_code(1)?).await?;
    assert_eq!(driver.free_count(handle), 1);
    assert!(matches!(
        CloseMode::from_code(42),
        Err(OdbcStatementError::InvalidArgument(_))
    ));
    Ok(())
}

#[tokio::test]
async fn success_with_info_is_kept_as_diagnostic() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(ONE_SQL).await?;
    assert_eq!(stmt.last_return_code(), Some(SqlReturn::SUCCESS));

    driver.info_next(DriverCall::Execute, "string data, right truncated");
    stmt.execute().await?;
    assert_eq!(stmt.state(), StatementState::Executed);
    assert_eq!(stmt.last_return_code(), Some(SqlReturn::SUCCESS_WITH_INFO));
    assert_eq!(stmt.last_diagnostic(), Some("string data, right truncated"));

    // The next operation starts with a clean status.
    stmt.execute().await?;
    assert_eq!(stmt.last_return_code(), Some(SqlReturn::SUCCESS));
    assert_eq!(stmt.last_diagnostic(), None);
    Ok(())
}

#[tokio::test]
async fn reprepare_rebuilds_parameter_descriptors() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(SUM_SQL).await?;
    stmt.bind(&[RowValues::Int(1), RowValues::Int(2)]).await?;
    assert_eq!(stmt.parameter_count(), 2);

    stmt.prepare(INSERT_SQL).await?;
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert_eq!(stmt.parameter_count(), 1);
    stmt.bind(&[RowValues::Int(9)]).await?;
    assert_eq!(stmt.execute().await?.rows_affected(), Some(1));
    Ok(())
}

#[tokio::test]
async fn max_rows_caps_fetch_and_closes_cursor() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open_with(&driver, StatementConfig::builder().max_rows(2).finish())?;
    stmt.prepare(FIVE_ROWS_SQL).await?;

    let first = stmt.execute().await?;
    assert_eq!(first.rows().map(ResultSet::len), Some(2));
    // The cursor was closed, so the statement executes again without a soft close.
    let second = stmt.execute().await?;
    assert_eq!(second.rows().map(ResultSet::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn adopted_handle_is_freed_on_drop() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let handle = driver
        .alloc_stmt(DbcHandle(7))
        .map_err(|code| format!("alloc failed: {code}"))?;
    let dyn_driver: Arc<dyn OdbcDriver> = driver.clone();
    let mut stmt = Statement::new(
        dyn_driver,
        EnvHandle(1),
        DbcHandle(7),
        handle,
        StatementConfig::default(),
    );
    assert_eq!(stmt.stmt_handle(), handle);
    assert_eq!(stmt.dbc_handle(), DbcHandle(7));
    stmt.prepare(ONE_SQL).await?;

    drop(stmt);
    assert_eq!(driver.free_count(handle), 1);
    assert_eq!(driver.live_handles(), 0);
    Ok(())
}

#[tokio::test]
async fn allocation_failure_carries_connection_diagnostics() {
    let driver = stub();
    driver.fail_next(DriverCall::AllocStmt, "connection is busy with results for another hstmt");
    let err = open(&driver).unwrap_err();
    assert_eq!(
        err.diagnostic(),
        Some("connection is busy with results for another hstmt")
    );
}

#[tokio::test]
async fn failed_fetch_phase_closes_cursor_for_retry() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(FIVE_ROWS_SQL).await?;

    for call in [
        DriverCall::NumResultCols,
        DriverCall::DescribeCol,
        DriverCall::Fetch,
    ] {
        let before = stmt.state();
        driver.fail_next(call, "communication link failure");
        let err = stmt.execute().await.unwrap_err();
        assert_eq!(err.diagnostic(), Some("communication link failure"), "{call:?}");
        assert_eq!(stmt.state(), before);

        let output = stmt.execute().await?;
        assert_eq!(output.rows().map(ResultSet::len), Some(5), "{call:?}");
    }

    stmt.prepare(INSERT_SQL).await?;
    stmt.bind(&[RowValues::Int(1)]).await?;
    driver.fail_next(DriverCall::RowCount, "communication link failure");
    assert!(stmt.execute().await.is_err());
    assert_eq!(stmt.state(), StatementState::Bound);
    assert_eq!(stmt.execute().await?.rows_affected(), Some(1));
    Ok(())
}

#[tokio::test]
async fn failed_discovery_on_reprepare_drops_old_statement() -> Result<(), Box<dyn std::error::Error>>
{
    let driver = stub();
    for call in [DriverCall::NumParams, DriverCall::DescribeParam] {
        let mut stmt = open(&driver)?;
        stmt.prepare(SUM_SQL).await?;
        stmt.bind(&[RowValues::Int(1), RowValues::Int(2)]).await?;
        stmt.execute().await?;

        driver.fail_next(call, "optional feature not implemented");
        assert!(stmt.prepare(INSERT_SQL).await.is_err(), "{call:?}");
        assert_eq!(stmt.state(), StatementState::Created);
        assert_eq!(stmt.sql(), None);
        assert_eq!(stmt.parameter_count(), 0);
        assert!(matches!(
            stmt.execute().await,
            Err(OdbcStatementError::InvalidState(_))
        ));
        assert!(matches!(
            stmt.bind(&[RowValues::Int(1)]).await,
            Err(OdbcStatementError::InvalidState(_))
        ));

        stmt.prepare(INSERT_SQL).await?;
        stmt.bind(&[RowValues::Int(3)]).await?;
        assert_eq!(stmt.execute().await?.rows_affected(), Some(1));
    }
    Ok(())
}

#[tokio::test]
async fn rejected_reprepare_keeps_previous_statement() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(SUM_SQL).await?;
    stmt.bind(&[RowValues::Int(2), RowValues::Int(2)]).await?;
    stmt.execute().await?;

    assert!(stmt.prepare("SELEC broken").await.is_err());
    assert_eq!(stmt.state(), StatementState::Executed);
    assert_eq!(stmt.sql(), Some(SUM_SQL));
    let output = stmt.execute().await?;
    assert_eq!(
        output.rows().and_then(|rs| rs.results[0].get("total").cloned()),
        Some(RowValues::Int(4))
    );
    Ok(())
}

#[tokio::test]
async fn unknown_row_count_is_not_reported_as_zero() -> Result<(), Box<dyn std::error::Error>> {
    let driver = stub();
    let mut stmt = open(&driver)?;
    stmt.prepare(TOUCH_SQL).await?;
    let output = stmt.execute().await?;
    assert!(matches!(output, StatementOutput::RowsAffected(None)));
    assert_eq!(output.rows_affected(), None);
    Ok(())
}
