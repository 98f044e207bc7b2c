//! SQLite database migrations

use crate::error::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    tx.commit()?;

    run_migration(conn, "001_cse_prices", CREATE_CSE_PRICES_TABLE)?;
    run_migration(conn, "002_exchange_rates", CREATE_EXCHANGE_RATES_TABLE)?;
    run_migration(conn, "003_ingest_state", CREATE_INGEST_STATE_TABLE)?;

    tracing::debug!("Schema is current");
    Ok(())
}

/// Apply one migration and record it atomically
///
/// The write lock is taken before the applied check, so a second process
/// opening the same fresh file waits and then skips it.
fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let applied: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !applied {
        tracing::info!("Applying migration {}", name);
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    tx.commit()?;
    Ok(())
}

// Decimal columns hold the canonical decimal string. NUMERIC affinity would
// coerce them to REAL and drop digits past the fifteenth.
const CREATE_CSE_PRICES_TABLE: &str = r#"
CREATE TABLE cse_prices (
    ticker TEXT NOT NULL,
    trade_date DATE NOT NULL,
    open TEXT,
    high TEXT,
    low TEXT,
    close TEXT,
    adj_close TEXT,
    volume BIGINT,
    PRIMARY KEY (ticker, trade_date)
);

CREATE INDEX idx_cse_prices_trade_date ON cse_prices(trade_date);
"#;

const CREATE_EXCHANGE_RATES_TABLE: &str = r#"
CREATE TABLE exchange_rates (
    rate_date DATE NOT NULL,
    base_currency TEXT NOT NULL,
    quote_currency TEXT NOT NULL,
    rate TEXT,
    PRIMARY KEY (rate_date, base_currency, quote_currency)
);

CREATE INDEX idx_exchange_rates_rate_date ON exchange_rates(rate_date);
"#;

const CREATE_INGEST_STATE_TABLE: &str = r#"
CREATE TABLE ingest_state (
    source_name TEXT NOT NULL PRIMARY KEY,
    last_date DATE
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'index') ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_create_schema() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let names = table_names(&conn);
        for expected in [
            "cse_prices",
            "exchange_rates",
            "ingest_state",
            "idx_cse_prices_trade_date",
            "idx_exchange_rates_rate_date",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 3);
    }

    #[test]
    fn test_failed_migration_leaves_no_trace() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = run_migration(&conn, "004_broken", "CREATE TABLE extra (x); CREATE TABLE extra (x);");
        assert!(result.is_err());

        let names = table_names(&conn);
        assert!(!names.iter().any(|n| n == "extra"));
        let recorded: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM migrations WHERE name = '004_broken')", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(!recorded);
    }

    #[test]
    fn test_parallel_openers_on_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.db");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = Connection::open(&path).unwrap();
                    conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
                    run_migrations(&conn)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 3);
    }
}
