// =============================================================================
// Runtime database access — the action surface behind §4.5's table
// =============================================================================
//
// All functions here are synchronous and operate on a `rusqlite::Connection`
// owned exclusively by the Persistence Service's dedicated writer thread
// (see `service.rs`); nothing outside that thread ever touches the
// connection directly, matching §4.5/§5's "single writer task per table".
// =============================================================================

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{GapRecord, QueueMessage};
use crate::error::{FlowtraceError, FlowtraceResult};
use crate::ipc::protocol::StateEntry;

fn to_unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// state
// ---------------------------------------------------------------------------

pub fn state_save(conn: &Connection, exchange: &str, symbol: &str, state_json: &str, now: DateTime<Utc>) -> FlowtraceResult<()> {
    conn.execute(
        "INSERT INTO candle_state (exchange, symbol, state_json, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(exchange, symbol) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
        params![exchange, symbol, state_json, to_unix(now)],
    )
    .map_err(|e| FlowtraceError::Fatal(format!("state_save failed: {e}")))?;
    Ok(())
}

pub fn state_save_batch(conn: &mut Connection, states: &[StateEntry], now: DateTime<Utc>) -> FlowtraceResult<()> {
    let tx = conn
        .transaction()
        .map_err(|e| FlowtraceError::Fatal(format!("state_save_batch transaction failed: {e}")))?;
    for entry in states {
        tx.execute(
            "INSERT INTO candle_state (exchange, symbol, state_json, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(exchange, symbol) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
            params![entry.exchange, entry.symbol, entry.state_json, to_unix(now)],
        )
        .map_err(|e| FlowtraceError::Fatal(format!("state_save_batch failed: {e}")))?;
    }
    tx.commit()
        .map_err(|e| FlowtraceError::Fatal(format!("state_save_batch commit failed: {e}")))?;
    Ok(())
}

pub fn state_load(conn: &Connection, exchange: &str, symbol: &str) -> FlowtraceResult<Option<String>> {
    conn.query_row(
        "SELECT state_json FROM candle_state WHERE exchange = ?1 AND symbol = ?2",
        params![exchange, symbol],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| FlowtraceError::Fatal(format!("state_load failed: {e}")))
}

pub fn state_load_batch(conn: &Connection, exchange: &str, symbols: &[String]) -> FlowtraceResult<Vec<StateEntry>> {
    let mut out = Vec::new();
    for symbol in symbols {
        if let Some(state_json) = state_load(conn, exchange, symbol)? {
            out.push(StateEntry { exchange: exchange.to_string(), symbol: symbol.clone(), state_json });
        }
    }
    Ok(out)
}

pub fn state_load_all(conn: &Connection) -> FlowtraceResult<Vec<StateEntry>> {
    let mut stmt = conn
        .prepare("SELECT exchange, symbol, state_json FROM candle_state")
        .map_err(|e| FlowtraceError::Fatal(format!("state_load_all prepare failed: {e}")))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StateEntry { exchange: r.get(0)?, symbol: r.get(1)?, state_json: r.get(2)? })
        })
        .map_err(|e| FlowtraceError::Fatal(format!("state_load_all query failed: {e}")))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| FlowtraceError::Fatal(format!("state_load_all row decode failed: {e}")))
}

// ---------------------------------------------------------------------------
// gap
// ---------------------------------------------------------------------------

pub fn gap_save(conn: &Connection, record: &GapRecord) -> FlowtraceResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO gap_records (exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at, synced, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.exchange,
            record.symbol,
            record.from_trade_id,
            record.to_trade_id,
            record.gap_size,
            to_unix(record.detected_at),
            record.synced as i64,
            record.synced_at.map(to_unix),
        ],
    )
    .map_err(|e| FlowtraceError::Fatal(format!("gap_save failed: {e}")))?;
    Ok(())
}

pub fn gap_load(
    conn: &Connection,
    exchange: Option<&str>,
    symbol: Option<&str>,
    synced: Option<bool>,
) -> FlowtraceResult<Vec<GapRecord>> {
    let mut sql = "SELECT id, exchange, symbol, from_trade_id, to_trade_id, gap_size, detected_at, synced, synced_at FROM gap_records WHERE 1=1".to_string();
    let mut conditions: Vec<String> = Vec::new();
    if exchange.is_some() {
        conditions.push("AND exchange = ?".to_string());
    }
    if symbol.is_some() {
        conditions.push("AND symbol = ?".to_string());
    }
    if synced.is_some() {
        conditions.push("AND synced = ?".to_string());
    }
    sql.push(' ');
    sql.push_str(&conditions.join(" "));
    sql.push_str(" ORDER BY detected_at DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| FlowtraceError::Fatal(format!("gap_load prepare failed: {e}")))?;

    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(e) = exchange {
        bound.push(Box::new(e.to_string()));
    }
    if let Some(s) = symbol {
        bound.push(Box::new(s.to_string()));
    }
    if let Some(s) = synced {
        bound.push(Box::new(s as i64));
    }
    let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

    let rows = stmt
        .query_map(params_ref.as_slice(), |r| {
            Ok(GapRecord {
                id: Some(r.get(0)?),
                exchange: r.get(1)?,
                symbol: r.get(2)?,
                from_trade_id: r.get(3)?,
                to_trade_id: r.get(4)?,
                gap_size: r.get(5)?,
                detected_at: from_unix(r.get(6)?),
                synced: r.get::<_, i64>(7)? != 0,
                synced_at: r.get::<_, Option<i64>>(8)?.map(from_unix),
            })
        })
        .map_err(|e| FlowtraceError::Fatal(format!("gap_load query failed: {e}")))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| FlowtraceError::Fatal(format!("gap_load row decode failed: {e}")))
}

pub fn gap_mark_synced(conn: &Connection, ids: &[i64], now: DateTime<Utc>) -> FlowtraceResult<()> {
    for id in ids {
        conn.execute(
            "UPDATE gap_records SET synced = 1, synced_at = ?1 WHERE id = ?2",
            params![to_unix(now), id],
        )
        .map_err(|e| FlowtraceError::Fatal(format!("gap_mark_synced failed: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// queue
// ---------------------------------------------------------------------------

pub fn queue_enqueue(conn: &Connection, message_type: &str, payload: &serde_json::Value, now: DateTime<Utc>) -> FlowtraceResult<Uuid> {
    let message_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO message_queue (message_id, type, payload, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![message_id.to_string(), message_type, payload.to_string(), to_unix(now)],
    )
    .map_err(|e| FlowtraceError::Fatal(format!("queue_enqueue failed: {e}")))?;
    Ok(message_id)
}

pub fn queue_dequeue(conn: &Connection, n: u32) -> FlowtraceResult<Vec<QueueMessage>> {
    let mut stmt = conn
        .prepare("SELECT message_id, type, payload, timestamp FROM message_queue WHERE processed = 0 ORDER BY timestamp ASC LIMIT ?1")
        .map_err(|e| FlowtraceError::Fatal(format!("queue_dequeue prepare failed: {e}")))?;
    let rows = stmt
        .query_map(params![n], |r| {
            let message_id: String = r.get(0)?;
            let payload: String = r.get(2)?;
            let ts: i64 = r.get(3)?;
            Ok((message_id, r.get::<_, String>(1)?, payload, ts))
        })
        .map_err(|e| FlowtraceError::Fatal(format!("queue_dequeue query failed: {e}")))?;

    let mut out = Vec::new();
    for row in rows {
        let (message_id, message_type, payload, ts) = row.map_err(|e| FlowtraceError::Fatal(format!("queue_dequeue row decode failed: {e}")))?;
        let payload_value: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| FlowtraceError::Fatal(format!("queue_dequeue payload decode failed: {e}")))?;
        out.push(QueueMessage {
            message_id: Uuid::parse_str(&message_id).map_err(|e| FlowtraceError::Fatal(format!("bad message_id: {e}")))?,
            message_type,
            payload: payload_value,
            enqueued_at: from_unix(ts),
            processed: false,
            processed_at: None,
        });
    }
    Ok(out)
}

pub fn queue_mark_processed(conn: &Connection, message_id: Uuid, now: DateTime<Utc>) -> FlowtraceResult<()> {
    conn.execute(
        "UPDATE message_queue SET processed = 1, processed_at = ?1 WHERE message_id = ?2",
        params![to_unix(now), message_id.to_string()],
    )
    .map_err(|e| FlowtraceError::Fatal(format!("queue_mark_processed failed: {e}")))?;
    Ok(())
}

pub fn queue_cleanup(conn: &Connection, retention_hours: i64, now: DateTime<Utc>) -> FlowtraceResult<u64> {
    let cutoff = to_unix(now) - retention_hours * 3600;
    let affected = conn
        .execute(
            "DELETE FROM message_queue WHERE processed = 1 AND processed_at < ?1",
            params![cutoff],
        )
        .map_err(|e| FlowtraceError::Fatal(format!("queue_cleanup failed: {e}")))?;
    Ok(affected as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::schema::{apply_migrations, configure_pragmas};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_pragmas(&conn).unwrap();
        apply_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn state_save_is_idempotent_upsert() {
        let conn = test_conn();
        let now = Utc::now();
        state_save(&conn, "binance", "BTCUSDT", "{\"a\":1}", now).unwrap();
        state_save(&conn, "binance", "BTCUSDT", "{\"a\":2}", now).unwrap();
        let loaded = state_load(&conn, "binance", "BTCUSDT").unwrap();
        assert_eq!(loaded, Some("{\"a\":2}".to_string()));
    }

    #[test]
    fn gap_save_same_row_twice_is_one_row() {
        let conn = test_conn();
        let rec = GapRecord::new("binance", "BTCUSDT", 4, 6, Utc::now());
        gap_save(&conn, &rec).unwrap();
        gap_save(&conn, &rec).unwrap();
        let rows = gap_load(&conn, Some("binance"), Some("BTCUSDT"), None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn queue_dequeue_then_mark_processed_then_cleanup() {
        let conn = test_conn();
        let now = Utc::now();
        let id = queue_enqueue(&conn, "candle_complete", &serde_json::json!({"x": 1}), now).unwrap();
        let pending = queue_dequeue(&conn, 50).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, id);

        queue_mark_processed(&conn, id, now).unwrap();
        let pending_after = queue_dequeue(&conn, 50).unwrap();
        assert!(pending_after.is_empty());

        let purged = queue_cleanup(&conn, 24, now + chrono::Duration::hours(25)).unwrap();
        assert_eq!(purged, 1);
    }
}
