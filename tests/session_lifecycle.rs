#![cfg(feature = "test-utils")]

use sql_session::prelude::*;
use sql_session::test_utils::{FakeCounters, FakeFailure, FakeSource};

const USERS: &str = "select id, name from users";

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
}

impl_mappable!(User { id: i64, name: String });

fn seeded() -> FakeSource {
    let fake = FakeSource::new();
    fake.script_rows(
        USERS,
        &["id", "name"],
        vec![
            vec![RowValues::Int(1), RowValues::Text("alice".into())],
            vec![RowValues::Int(2), RowValues::Text("bob".into())],
        ],
    );
    fake
}

#[test]
fn autocommit_calls_release_everything_before_returning() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    fake.script_affected("update users set name = ? where id = ?", 1);
    let mut session = SqlSession::new(fake.clone());

    let users: Vec<User> = session.list(USERS, &[])?;
    assert_eq!(users.len(), 2);
    assert!(fake.counters().balanced());

    let first = session.row(USERS, &[])?;
    assert_eq!(first["name"], RowValues::Text("alice".into()));
    assert!(fake.counters().balanced());

    assert_eq!(session.scalar(USERS, &[])?, Some(RowValues::Int(1)));
    assert_eq!(
        session.update("update users set name = ? where id = ?", &params!["carol", 2])?,
        1
    );

    let counters = fake.counters();
    assert!(counters.balanced());
    assert_eq!(counters.acquired, 4);
    assert_eq!(counters.released, 4);
    assert_eq!(counters.cursors_opened, 3);
    Ok(())
}

#[test]
fn autocommit_releases_after_mapping_and_execution_failures() {
    let fake = seeded();
    fake.script_failure("select * from missing", "no such table: missing");
    let mut session = SqlSession::new(fake.clone());

    // names cannot become integers
    fake.script_rows(
        "select name from users",
        &["name"],
        vec![vec![RowValues::Text("alice".into())]],
    );
    let err = session
        .list::<i64>("select name from users", &[])
        .unwrap_err();
    assert!(err.is_mapping_error());
    assert!(fake.counters().balanced());

    let err = session.rows("select * from missing", &[]).unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(err.sql(), Some("select * from missing"));
    assert!(fake.counters().balanced());
}

#[test]
fn transaction_pins_one_connection_until_commit() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    fake.script_affected("insert into t (a) values (?)", 1);
    fake.script_affected("update t set a = ?", 3);
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    assert_eq!(session.state(), TransactionState::InTransaction);
    session.update("insert into t (a) values (?)", &params![1])?;
    session.update("update t set a = ?", &params![2])?;

    let mid = fake.counters();
    assert_eq!(mid.acquired, 1);
    assert_eq!(mid.released, 0);
    assert_eq!(mid.begins, 1);
    // only the last statement's handle is still open
    assert_eq!(mid.open_statements(), 1);

    session.commit()?;
    let done = fake.counters();
    assert_eq!(done.acquired, 1);
    assert_eq!(done.released, 1);
    assert_eq!(done.commits, 1);
    assert!(done.balanced());
    assert_eq!(session.state(), TransactionState::Autocommit);
    Ok(())
}

#[test]
fn reads_inside_a_transaction_share_the_pinned_connection() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    let mut session = SqlSession::new(fake.clone());

    let users: Vec<User> = session.begin_transaction()?.list(USERS, &[])?;
    assert_eq!(users[1], User { id: 2, name: "bob".into() });
    let keyed = session.rows_keyed_by(Some("name"), USERS, &[])?;
    assert!(keyed.contains_key(&RowKey::from("bob")));
    session.rollback()?;

    let counters = fake.counters();
    assert_eq!(counters.acquired, 1);
    assert_eq!(counters.rollbacks, 1);
    assert_eq!(counters.commits, 0);
    assert!(counters.balanced());
    Ok(())
}

#[test]
fn failed_update_is_never_committed() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    fake.script_failure("update t set a = ?", "constraint failed");
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    let err = session
        .update_and_commit("update t set a = ?", &params![1])
        .unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(fake.counters().commits, 0);
    assert!(session.in_transaction());

    session.rollback()?;
    assert_eq!(fake.counters().rollbacks, 1);
    assert!(fake.counters().balanced());
    Ok(())
}

#[test]
fn update_and_commit_commits_the_open_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    fake.script_affected("delete from t", 5);
    let mut session = SqlSession::new(fake.clone());

    let affected = session
        .begin_transaction()?
        .update_and_commit("delete from t", &[])?;
    assert_eq!(affected, 5);
    assert_eq!(fake.counters().commits, 1);
    assert!(!session.in_transaction());
    assert!(fake.counters().balanced());
    Ok(())
}

#[test]
fn nested_begin_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    let err = session.begin_transaction().unwrap_err();
    assert!(err.is_illegal_state());
    assert_eq!(fake.counters().acquired, 1);
    assert!(session.in_transaction());
    session.commit()?;
    Ok(())
}

#[test]
fn commit_and_rollback_outside_a_transaction_do_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    let mut session = SqlSession::new(fake.clone());
    session.commit()?;
    session.rollback()?;
    assert_eq!(fake.counters(), FakeCounters::default());
    Ok(())
}

#[test]
fn failed_begin_returns_the_connection() {
    let fake = FakeSource::new();
    fake.fail(FakeFailure::Begin, "database is locked");
    let mut session = SqlSession::new(fake.clone());

    let err = session.begin_transaction().unwrap_err();
    assert!(err.is_execution_error());
    assert!(!session.in_transaction());
    assert!(fake.counters().balanced());
}

#[test]
fn failed_commit_still_releases_and_resets_state() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    let mut session = SqlSession::new(fake.clone());
    session.begin_transaction()?.update("delete from t", &[])?;

    fake.fail(FakeFailure::Commit, "disk I/O error");
    let err = session.commit().unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(err.sql(), Some("COMMIT"));
    assert_eq!(session.state(), TransactionState::Autocommit);
    assert!(fake.counters().balanced());
    Ok(())
}

#[test]
fn dropping_a_session_rolls_back_its_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    {
        let mut session = SqlSession::new(fake.clone());
        session.begin_transaction()?.update("delete from t", &[])?;
    }
    let counters = fake.counters();
    assert_eq!(counters.rollbacks, 1);
    assert_eq!(counters.commits, 0);
    assert!(counters.balanced());
    Ok(())
}

#[test]
fn cleanup_failure_does_not_hide_the_primary_error() {
    let fake = FakeSource::new();
    fake.script_rows(
        "select name from users",
        &["name"],
        vec![vec![RowValues::Text("alice".into())]],
    );
    fake.fail(FakeFailure::StatementClose, "statement finalize failed");
    let mut session = SqlSession::new(fake.clone());

    let err = session
        .record::<i64>("select name from users", &[])
        .unwrap_err();
    assert_eq!(err.error_code(), "CLEANUP_FAILED");
    assert!(err.is_mapping_error());
    let cleanup = err.cleanup_error().expect("cleanup failure surfaced");
    assert_eq!(cleanup.error_code(), "RESOURCE_RELEASE_ERROR");
    // the connection is still given back after the statement failed to close
    assert_eq!(fake.counters().open_connections(), 0);
}

#[test]
fn cleanup_failure_alone_is_reported() {
    let fake = seeded();
    fake.fail(FakeFailure::ConnectionClose, "socket closed");
    let mut session = SqlSession::new(fake.clone());

    let err = session.rows(USERS, &[]).unwrap_err();
    assert!(err.is_release_error());
    assert!(err.cleanup_error().is_none());
}

#[test]
fn argument_count_is_checked_before_binding() {
    let fake = FakeSource::new();
    let mut session = SqlSession::new(fake.clone());

    let err = session
        .update("update t set a = ? where id = ?", &params![1])
        .unwrap_err();
    assert!(err.is_execution_error());
    assert!(matches!(
        &err,
        SqlSessionError::ExecutionError { source, .. }
            if matches!(**source, SqlSessionError::ParameterError(_))
    ));
    assert!(fake.executed().is_empty());
    assert!(fake.counters().balanced());
}

#[test]
fn raw_handles_are_read_once_and_closed_once() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    let mut session = SqlSession::new(fake.clone());

    let mut handle = session.execute(USERS, &[])?;
    assert!(handle.owns_connection());
    assert_eq!(fake.counters().open_connections(), 1);

    let mut seen = 0;
    {
        let mut cursor = handle.cursor()?;
        assert_eq!(*cursor.column_names(), vec!["id".to_string(), "name".to_string()]);
        while cursor.next_row()?.is_some() {
            seen += 1;
        }
    }
    assert_eq!(seen, 2);
    assert!(handle.cursor().err().is_some_and(|e| e.is_illegal_state()));

    handle.close()?;
    handle.close()?;
    assert!(handle.is_closed());
    let counters = fake.counters();
    assert!(counters.balanced());
    assert_eq!(counters.statements_closed, 1);
    Ok(())
}

#[test]
fn dropped_raw_handle_is_closed() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    let mut session = SqlSession::new(fake.clone());
    drop(session.execute(USERS, &[])?);
    assert!(fake.counters().balanced());
    Ok(())
}

#[test]
fn raw_handle_in_a_transaction_is_closed_by_the_next_statement() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    let mut handle = session.execute(USERS, &[])?;
    assert!(!handle.owns_connection());
    assert_eq!(fake.counters().open_statements(), 1);

    session.update("delete from users where id = ?", &params![2])?;
    assert_eq!(fake.counters().open_statements(), 1);
    assert!(handle.is_closed());
    assert!(handle.cursor().err().is_some_and(|e| e.is_illegal_state()));

    session.commit()?;
    handle.close()?;
    let counters = fake.counters();
    assert!(counters.balanced());
    assert_eq!(counters.acquired, 1);
    assert_eq!(counters.commits, 1);
    Ok(())
}

#[test]
fn commit_closes_a_raw_handle_still_held_by_the_caller() -> Result<(), Box<dyn std::error::Error>> {
    let fake = seeded();
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    let mut handle = session.execute(USERS, &[])?;
    let mut cursor = handle.cursor()?;
    assert!(cursor.next_row()?.is_some());

    session.commit()?;
    assert!(fake.counters().balanced());
    assert!(cursor.next_row().err().is_some_and(|e| e.is_illegal_state()));
    drop(cursor);

    assert!(handle.is_closed());
    handle.close()?;
    assert_eq!(fake.counters().statements_closed, 1);
    assert_eq!(fake.counters().cursors_closed, 1);
    Ok(())
}

#[test]
fn release_failure_of_the_previous_statement_names_the_next_one() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    let first = "insert into t (a) values (?)";
    let second = "update t set a = ?";
    let mut session = SqlSession::new(fake.clone());

    session.begin_transaction()?;
    session.update(first, &params![1])?;
    fake.fail(FakeFailure::StatementClose, "statement close refused");

    let err = session.update(second, &params![2]).unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(err.sql(), Some(second));
    assert!(!fake.executed().iter().any(|sql| sql == second));
    assert!(session.in_transaction());

    fake.heal(FakeFailure::StatementClose);
    session.rollback()?;
    let counters = fake.counters();
    assert!(counters.balanced());
    assert_eq!(counters.rollbacks, 1);
    Ok(())
}

#[test]
fn paging_counts_then_windows_the_statement() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    fake.script_rows(
        "select count(*) from (select id from t where a = ?) as T",
        &["count(*)"],
        vec![vec![RowValues::Int(25)]],
    );
    fake.script_rows(
        "select id from t where a = ? limit ? offset ?",
        &["id"],
        (11..=20).map(|i| vec![RowValues::Int(i)]).collect(),
    );
    let mut session = SqlSession::new(fake.clone());

    let mut page = Page::new(1, 10);
    let ids: Vec<i64> = session.list_page(&mut page, "select id from t where a = ?", &params![7])?;
    assert_eq!(ids.first(), Some(&11));
    assert_eq!(ids.len(), 10);
    assert_eq!(page.total, Some(25));
    assert_eq!(page.page_count(), Some(3));

    let executed = fake.executed_with_params();
    assert_eq!(executed.len(), 2);
    assert_eq!(
        executed[1].1,
        vec![RowValues::Int(7), RowValues::Int(10), RowValues::Int(10)]
    );
    assert!(fake.counters().balanced());
    Ok(())
}

#[test]
fn paging_without_totals_skips_the_count() -> Result<(), Box<dyn std::error::Error>> {
    let fake = FakeSource::new();
    let options = SessionOptions {
        count_page_totals: false,
        ..SessionOptions::default()
    };
    let mut session = SqlSession::with_options(fake.clone(), options);

    let mut page = Page::new(0, 5);
    let ctx = ExecutionContext::new("select * from t");
    let rows = session.rows_page_ctx(&mut page, &ctx)?;
    assert!(rows.is_empty());
    assert_eq!(page.total, None);
    assert_eq!(fake.executed(), vec!["select * from t limit ? offset ?"]);
    Ok(())
}

#[test]
fn acquire_failure_surfaces_as_execution_error() {
    let fake = FakeSource::new();
    fake.fail(FakeFailure::Acquire, "pool exhausted");
    let mut session = SqlSession::new(fake.clone());
    let err = session.scalar("select 1", &[]).unwrap_err();
    assert!(err.is_execution_error());
    assert_eq!(fake.counters().acquired, 0);
}
