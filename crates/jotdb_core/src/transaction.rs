//! Transaction controller.
//!
//! A small state machine over the connection: `Idle` or `InTransaction`
//! with a stack of named savepoints. The controller owns no connection;
//! the database handle passes its connection in while holding the
//! connection lock, so state and SQL always change together.
//!
//! Savepoint names are allocated `sp_<n>` from a monotonic counter unless
//! the caller supplies one. `ROLLBACK TO` keeps the savepoint on the stack
//! (it can be rolled back to again); `RELEASE` pops it and everything
//! above it, mirroring the engine's own semantics.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::dialect;
use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
enum TxnState {
    Idle,
    InTransaction { savepoints: Vec<String> },
}

/// Tracks transaction state and the savepoint stack for one database handle.
#[derive(Debug)]
pub(crate) struct TransactionController {
    state: Mutex<TxnState>,
    savepoint_seq: AtomicU64,
}

impl TransactionController {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TxnState::Idle),
            savepoint_seq: AtomicU64::new(0),
        }
    }

    /// Whether an explicit transaction is open.
    pub(crate) fn in_transaction(&self) -> bool {
        matches!(&*self.state.lock(), TxnState::InTransaction { .. })
    }

    /// Issues `BEGIN` and enters `InTransaction`.
    pub(crate) fn begin(&self, conn: &Connection) -> CoreResult<()> {
        let mut state = self.state.lock();
        if matches!(&*state, TxnState::InTransaction { .. }) {
            return Err(CoreError::invalid_transaction_state(
                "already in a transaction",
            ));
        }
        conn.execute_batch("BEGIN")?;
        *state = TxnState::InTransaction {
            savepoints: Vec::new(),
        };
        Ok(())
    }

    /// Issues `COMMIT` and returns to `Idle`.
    pub(crate) fn commit(&self, conn: &Connection) -> CoreResult<()> {
        let mut state = self.state.lock();
        if matches!(&*state, TxnState::Idle) {
            return Err(CoreError::invalid_transaction_state(
                "not in a transaction",
            ));
        }
        conn.execute_batch("COMMIT")?;
        *state = TxnState::Idle;
        Ok(())
    }

    /// Issues `ROLLBACK` and returns to `Idle`.
    pub(crate) fn rollback(&self, conn: &Connection) -> CoreResult<()> {
        let mut state = self.state.lock();
        if matches!(&*state, TxnState::Idle) {
            return Err(CoreError::invalid_transaction_state(
                "not in a transaction",
            ));
        }
        conn.execute_batch("ROLLBACK")?;
        *state = TxnState::Idle;
        Ok(())
    }

    /// Pushes a named savepoint, allocating `sp_<n>` when no name is given.
    ///
    /// Requires `InTransaction`; returns the savepoint name.
    pub(crate) fn savepoint(
        &self,
        conn: &Connection,
        name: Option<&str>,
    ) -> CoreResult<String> {
        let mut state = self.state.lock();
        let TxnState::InTransaction { savepoints } = &mut *state else {
            return Err(CoreError::invalid_transaction_state(
                "savepoint requires an open transaction",
            ));
        };

        let name = match name {
            Some(n) => {
                dialect::validate_ident(n, "savepoint name")?;
                n.to_string()
            }
            None => {
                let n = self.savepoint_seq.fetch_add(1, Ordering::SeqCst);
                format!("sp_{n}")
            }
        };

        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        savepoints.push(name.clone());
        Ok(name)
    }

    /// Rolls back to a savepoint, popping everything stacked above it.
    ///
    /// The savepoint itself stays on the stack and can be rolled back to
    /// again or released later.
    pub(crate) fn rollback_to(&self, conn: &Connection, name: &str) -> CoreResult<()> {
        let mut state = self.state.lock();
        let TxnState::InTransaction { savepoints } = &mut *state else {
            return Err(CoreError::invalid_transaction_state(
                "not in a transaction",
            ));
        };
        let Some(pos) = savepoints.iter().position(|s| s == name) else {
            return Err(CoreError::invalid_transaction_state(format!(
                "unknown savepoint '{name}'"
            )));
        };
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
        savepoints.truncate(pos + 1);
        Ok(())
    }

    /// Releases (commits) a savepoint, popping it and everything above it.
    pub(crate) fn release(&self, conn: &Connection, name: &str) -> CoreResult<()> {
        let mut state = self.state.lock();
        let TxnState::InTransaction { savepoints } = &mut *state else {
            return Err(CoreError::invalid_transaction_state(
                "not in a transaction",
            ));
        };
        let Some(pos) = savepoints.iter().position(|s| s == name) else {
            return Err(CoreError::invalid_transaction_state(format!(
                "unknown savepoint '{name}'"
            )));
        };
        conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        savepoints.truncate(pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n INTEGER)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn begin_commit_cycle() {
        let conn = conn();
        let txn = TransactionController::new();
        assert!(!txn.in_transaction());

        txn.begin(&conn).unwrap();
        assert!(txn.in_transaction());
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        txn.commit(&conn).unwrap();

        assert!(!txn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        txn.rollback(&conn).unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn cannot_begin_twice() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        let err = txn.begin(&conn).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransactionState { .. }));
    }

    #[test]
    fn cannot_commit_idle() {
        let conn = conn();
        let txn = TransactionController::new();
        assert!(matches!(
            txn.commit(&conn),
            Err(CoreError::InvalidTransactionState { .. })
        ));
        assert!(matches!(
            txn.rollback(&conn),
            Err(CoreError::InvalidTransactionState { .. })
        ));
    }

    #[test]
    fn savepoint_requires_transaction() {
        let conn = conn();
        let txn = TransactionController::new();
        assert!(matches!(
            txn.savepoint(&conn, None),
            Err(CoreError::InvalidTransactionState { .. })
        ));
    }

    #[test]
    fn savepoint_names_are_monotonic() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        let a = txn.savepoint(&conn, None).unwrap();
        let b = txn.savepoint(&conn, None).unwrap();
        assert_eq!(a, "sp_0");
        assert_eq!(b, "sp_1");
        txn.rollback(&conn).unwrap();
    }

    #[test]
    fn rollback_to_keeps_earlier_writes() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();

        let sp = txn.savepoint(&conn, None).unwrap();
        conn.execute("INSERT INTO t VALUES (2)", []).unwrap();

        txn.rollback_to(&conn, &sp).unwrap();
        txn.commit(&conn).unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn release_commits_savepoint_writes() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();

        let sp = txn.savepoint(&conn, None).unwrap();
        conn.execute("INSERT INTO t VALUES (2)", []).unwrap();
        txn.release(&conn, &sp).unwrap();

        // Released savepoints are gone from the stack.
        assert!(matches!(
            txn.rollback_to(&conn, &sp),
            Err(CoreError::InvalidTransactionState { .. })
        ));

        txn.commit(&conn).unwrap();
        assert_eq!(count(&conn), 2);
    }

    #[test]
    fn rollback_to_pops_nested_savepoints() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        let outer = txn.savepoint(&conn, Some("outer")).unwrap();
        let inner = txn.savepoint(&conn, Some("inner")).unwrap();

        txn.rollback_to(&conn, &outer).unwrap();
        // `outer` survives its own rollback; `inner` does not.
        assert!(txn.rollback_to(&conn, &inner).is_err());
        assert!(txn.rollback_to(&conn, &outer).is_ok());
        txn.rollback(&conn).unwrap();
    }

    #[test]
    fn explicit_savepoint_name_is_validated() {
        let conn = conn();
        let txn = TransactionController::new();
        txn.begin(&conn).unwrap();
        assert!(matches!(
            txn.savepoint(&conn, Some("bad name")),
            Err(CoreError::InvalidField { .. })
        ));
        txn.rollback(&conn).unwrap();
    }
}
