// =============================================================================
// SQLite schema migrations v1–v5
// =============================================================================
//
// Applied strictly in ascending version, tracked in `schema_version`. SQLite
// lacks `ALTER PRIMARY KEY`, so v5's primary-key change is a
// recreate-and-copy, exactly as spec.md §6 describes.
// =============================================================================

use rusqlite::Connection;

use crate::error::{FlowtraceError, FlowtraceResult};

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "create message_queue",
        "CREATE TABLE message_queue (
            message_id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );
        CREATE INDEX idx_message_queue_processed_timestamp ON message_queue(processed, timestamp);
        CREATE INDEX idx_message_queue_processed_processed_at ON message_queue(processed, processed_at);",
    ),
    (
        2,
        "create candle_state",
        "CREATE TABLE candle_state (
            symbol TEXT PRIMARY KEY,
            state_json BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    ),
    (
        3,
        "create gap_records",
        "CREATE TABLE gap_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            from_trade_id INTEGER NOT NULL,
            to_trade_id INTEGER NOT NULL,
            gap_size INTEGER NOT NULL,
            detected_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            synced_at INTEGER,
            UNIQUE(symbol, from_trade_id, to_trade_id)
        );",
    ),
    (
        4,
        "add exchange to gap_records",
        "ALTER TABLE gap_records ADD COLUMN exchange TEXT NOT NULL DEFAULT 'binance';
        DROP INDEX IF EXISTS sqlite_autoindex_gap_records_1;
        CREATE TABLE gap_records_v4 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange TEXT NOT NULL DEFAULT 'binance',
            symbol TEXT NOT NULL,
            from_trade_id INTEGER NOT NULL,
            to_trade_id INTEGER NOT NULL,
            gap_size INTEGER NOT NULL,
            detected_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            synced_at INTEGER,
            UNIQUE(exchange, symbol, from_trade_id, to_trade_id)
        );
        INSERT INTO gap_records_v4 (id, exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at, synced, synced_at)
            SELECT id, exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at, synced, synced_at FROM gap_records;
        DROP TABLE gap_records;
        ALTER TABLE gap_records_v4 RENAME TO gap_records;",
    ),
    (
        5,
        "add exchange to candle_state, repoint primary key",
        "CREATE TABLE candle_state_v5 (
            exchange TEXT NOT NULL DEFAULT 'binance',
            symbol TEXT NOT NULL,
            state_json BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (exchange, symbol)
        );
        INSERT INTO candle_state_v5 (exchange, symbol, state_json, updated_at)
            SELECT 'binance', symbol, state_json, updated_at FROM candle_state;
        DROP TABLE candle_state;
        ALTER TABLE candle_state_v5 RENAME TO candle_state;",
    ),
];

pub fn apply_migrations(conn: &Connection) -> FlowtraceResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
            description TEXT NOT NULL
        );",
    )
    .map_err(|e| FlowtraceError::Fatal(format!("failed to create schema_version: {e}")))?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .map_err(|e| FlowtraceError::Fatal(format!("failed to read schema_version: {e}")))?;

    for (version, description, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .map_err(|e| FlowtraceError::Fatal(format!("migration v{version} ({description}) failed: {e}")))?;
        conn.execute(
            "INSERT INTO schema_version (version, description) VALUES (?1, ?2)",
            rusqlite::params![version, description],
        )
        .map_err(|e| FlowtraceError::Fatal(format!("failed to record schema_version v{version}: {e}")))?;
    }
    Ok(())
}

pub fn configure_pragmas(conn: &Connection) -> FlowtraceResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=30000;
         PRAGMA wal_autocheckpoint=1000;",
    )
    .map_err(|e| FlowtraceError::Fatal(format!("failed to configure pragmas: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_pragmas(&conn).unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 5);
    }

    #[test]
    fn candle_state_primary_key_is_exchange_symbol() {
        let conn = Connection::open_in_memory().unwrap();
        configure_pragmas(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO candle_state (exchange, symbol, state_json, updated_at) VALUES ('binance','BTCUSDT','{}',1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO candle_state (exchange, symbol, state_json, updated_at) VALUES ('bybit','BTCUSDT','{}',1)",
            [],
        )
        .unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM candle_state", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn gap_records_unique_by_exchange_symbol_from_to() {
        let conn = Connection::open_in_memory().unwrap();
        configure_pragmas(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO gap_records (exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at) VALUES ('binance','BTCUSDT',4,6,3,1)",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO gap_records (exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at) VALUES ('binance','BTCUSDT',4,6,3,2)",
            [],
        );
        assert!(err.is_err());
    }
}
