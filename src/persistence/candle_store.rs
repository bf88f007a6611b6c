// =============================================================================
// Append-only footprint candle store
// =============================================================================
//
// Contract (spec.md §6): append-only by (exchange, symbol, timeframe,
// open_time); range scans by that key prefix plus a time range; bins are
// serialised as a length-prefixed sequence of
// [tick_price:f64][buy_vol:f64][sell_vol:f64][trade_count:u32].
//
// This is the hierarchical-file deployment option spec.md calls
// contract-equivalent to an embedded tabular store: one append-only file
// per (exchange, symbol, timeframe) under a data root. An in-memory index
// of open_time -> byte offset (rebuilt by a single linear scan when a file
// is first opened) makes `append` idempotent by identity and `find_latest`
// O(1), while `find_by_symbol` still does a prefix+range scan.
// =============================================================================

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rust_decimal::Decimal;

use crate::domain::{FootprintCandle, PriceBin, Timeframe};
use crate::error::{FlowtraceError, FlowtraceResult};

fn dec_to_f64(d: Decimal) -> f64 {
    d.to_string().parse::<f64>().unwrap_or(0.0)
}

fn f64_to_dec(v: f64) -> Decimal {
    Decimal::try_from(v).unwrap_or(Decimal::ZERO)
}

struct OpenFile {
    file: File,
    /// open_time -> byte offset of the start of the record.
    index: HashMap<i64, u64>,
}

pub struct CandleStore {
    root: PathBuf,
    files: Mutex<HashMap<(String, String, String), OpenFile>>,
}

impl CandleStore {
    pub fn new(root: impl Into<PathBuf>) -> FlowtraceResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| FlowtraceError::Fatal(format!("failed to create candle store root: {e}")))?;
        Ok(CandleStore { root, files: Mutex::new(HashMap::new()) })
    }

    fn path_for(&self, exchange: &str, symbol: &str, timeframe: &str) -> PathBuf {
        self.root.join(exchange).join(symbol).join(format!("{timeframe}.candles"))
    }

    fn ensure_open(&self, exchange: &str, symbol: &str, timeframe: &str) -> FlowtraceResult<()> {
        let key = (exchange.to_string(), symbol.to_string(), timeframe.to_string());
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&key) {
            return Ok(());
        }
        let path = self.path_for(exchange, symbol, timeframe);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FlowtraceError::Fatal(format!("failed to create candle store dir: {e}")))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| FlowtraceError::Fatal(format!("failed to open candle store file {path:?}: {e}")))?;

        let index = build_index(&mut file)?;
        files.insert(key, OpenFile { file, index });
        Ok(())
    }

    /// Idempotent by (exchange, symbol, timeframe, open_time): re-appending
    /// an already-stored candle is a no-op.
    pub fn append(&self, candle: &FootprintCandle) -> FlowtraceResult<()> {
        self.ensure_open(&candle.exchange, &candle.symbol, candle.timeframe.label())?;
        let key = (candle.exchange.clone(), candle.symbol.clone(), candle.timeframe.label().to_string());
        let mut files = self.files.lock().unwrap();
        let open_file = files.get_mut(&key).expect("ensure_open just inserted it");

        if open_file.index.contains_key(&candle.open_time) {
            return Ok(());
        }

        let offset = open_file
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| FlowtraceError::Fatal(format!("candle store seek failed: {e}")))?;
        let bytes = encode_candle(candle);
        open_file
            .file
            .write_all(&bytes)
            .map_err(|e| FlowtraceError::Fatal(format!("candle store write failed: {e}")))?;
        open_file
            .file
            .flush()
            .map_err(|e| FlowtraceError::Fatal(format!("candle store flush failed: {e}")))?;
        open_file.index.insert(candle.open_time, offset);
        Ok(())
    }

    pub fn find_by_symbol(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        range: Option<(i64, i64)>,
        limit: Option<u32>,
    ) -> FlowtraceResult<Vec<FootprintCandle>> {
        self.ensure_open(exchange, symbol, timeframe)?;
        let key = (exchange.to_string(), symbol.to_string(), timeframe.to_string());
        let mut files = self.files.lock().unwrap();
        let open_file = files.get_mut(&key).expect("ensure_open just inserted it");

        let mut offsets: Vec<(i64, u64)> = open_file.index.iter().map(|(k, v)| (*k, *v)).collect();
        offsets.sort_by_key(|(open_time, _)| *open_time);

        let mut out = Vec::new();
        for (open_time, offset) in offsets {
            if let Some((start, end)) = range {
                if open_time < start || open_time > end {
                    continue;
                }
            }
            let candle = read_candle_at(&mut open_file.file, offset)?;
            out.push(candle);
            if let Some(limit) = limit {
                if out.len() as u32 >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn count(&self, exchange: &str, symbol: &str, timeframe: &str) -> FlowtraceResult<u64> {
        self.ensure_open(exchange, symbol, timeframe)?;
        let key = (exchange.to_string(), symbol.to_string(), timeframe.to_string());
        let files = self.files.lock().unwrap();
        Ok(files.get(&key).map(|f| f.index.len() as u64).unwrap_or(0))
    }

    pub fn find_latest(&self, exchange: &str, symbol: &str, timeframe: &str) -> FlowtraceResult<Option<FootprintCandle>> {
        self.ensure_open(exchange, symbol, timeframe)?;
        let key = (exchange.to_string(), symbol.to_string(), timeframe.to_string());
        let mut files = self.files.lock().unwrap();
        let open_file = files.get_mut(&key).expect("ensure_open just inserted it");
        let Some((&_open_time, &offset)) = open_file.index.iter().max_by_key(|(k, _)| **k) else {
            return Ok(None);
        };
        Ok(Some(read_candle_at(&mut open_file.file, offset)?))
    }
}

fn build_index(file: &mut File) -> FlowtraceResult<HashMap<i64, u64>> {
    let mut index = HashMap::new();
    let mut offset = 0u64;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| FlowtraceError::Fatal(format!("candle store index scan seek failed: {e}")))?;
    loop {
        let start = offset;
        match read_candle_header_open_time(file) {
            Ok(Some((open_time, record_len))) => {
                index.insert(open_time, start);
                offset += record_len;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| FlowtraceError::Fatal(format!("candle store index scan seek failed: {e}")))?;
            }
            Ok(None) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(index)
}

/// Each record is prefixed with its own length so the index scan (and
/// `read_candle_at`) can skip over it without re-parsing every field.
const RECORD_LEN_PREFIX_BYTES: u64 = 4;

fn encode_candle(c: &FootprintCandle) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&c.open_time.to_be_bytes());
    body.extend_from_slice(&c.close_time.to_be_bytes());
    for v in [c.open, c.high, c.low, c.close, c.volume, c.buy_volume, c.sell_volume, c.quote_volume, c.buy_quote_volume, c.sell_quote_volume, c.delta, c.delta_max, c.delta_min] {
        body.extend_from_slice(&dec_to_f64(v).to_be_bytes());
    }
    body.extend_from_slice(&c.trade_count.to_be_bytes());
    body.extend_from_slice(&c.first_trade_id.to_be_bytes());
    body.extend_from_slice(&c.last_trade_id.to_be_bytes());
    body.extend_from_slice(&dec_to_f64(c.tick_value).to_be_bytes());
    body.extend_from_slice(&c.bin_multiplier.to_be_bytes());
    body.extend_from_slice(&(c.bins.len() as u32).to_be_bytes());
    for bin in &c.bins {
        body.extend_from_slice(&dec_to_f64(bin.tick_price).to_be_bytes());
        body.extend_from_slice(&dec_to_f64(bin.buy_volume).to_be_bytes());
        body.extend_from_slice(&dec_to_f64(bin.sell_volume).to_be_bytes());
        body.extend_from_slice(&(bin.trade_count as u32).to_be_bytes());
    }

    let mut record = Vec::with_capacity(body.len() + RECORD_LEN_PREFIX_BYTES as usize);
    record.extend_from_slice(&(body.len() as u32).to_be_bytes());
    record.extend_from_slice(&body);
    record
}

fn read_candle_header_open_time(file: &mut File) -> FlowtraceResult<Option<(i64, u64)>> {
    let mut len_buf = [0u8; 4];
    match file.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(FlowtraceError::Fatal(format!("candle store read failed: {e}"))),
    }
    let body_len = u32::from_be_bytes(len_buf) as u64;
    let mut open_time_buf = [0u8; 8];
    file.read_exact(&mut open_time_buf)
        .map_err(|e| FlowtraceError::Fatal(format!("candle store read failed: {e}")))?;
    let open_time = i64::from_be_bytes(open_time_buf);
    // Skip the rest of the body (already consumed 8 of body_len bytes).
    file.seek(SeekFrom::Current((body_len - 8) as i64))
        .map_err(|e| FlowtraceError::Fatal(format!("candle store seek failed: {e}")))?;
    Ok(Some((open_time, RECORD_LEN_PREFIX_BYTES + body_len)))
}

fn read_candle_at(file: &mut File, offset: u64) -> FlowtraceResult<FootprintCandle> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| FlowtraceError::Fatal(format!("candle store seek failed: {e}")))?;
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)
        .map_err(|e| FlowtraceError::Fatal(format!("candle store read failed: {e}")))?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; body_len];
    file.read_exact(&mut body)
        .map_err(|e| FlowtraceError::Fatal(format!("candle store read failed: {e}")))?;
    decode_candle(&body)
}

fn decode_candle(body: &[u8]) -> FlowtraceResult<FootprintCandle> {
    let mut cursor = 0usize;
    macro_rules! take_i64 {
        () => {{
            let v = i64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            v
        }};
    }
    macro_rules! take_u64 {
        () => {{
            let v = u64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            v
        }};
    }
    macro_rules! take_f64 {
        () => {{
            let v = f64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            v
        }};
    }
    macro_rules! take_u32 {
        () => {{
            let v = u32::from_be_bytes(body[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            v
        }};
    }

    let open_time = take_i64!();
    let close_time = take_i64!();
    let open = f64_to_dec(take_f64!());
    let high = f64_to_dec(take_f64!());
    let low = f64_to_dec(take_f64!());
    let close = f64_to_dec(take_f64!());
    let volume = f64_to_dec(take_f64!());
    let buy_volume = f64_to_dec(take_f64!());
    let sell_volume = f64_to_dec(take_f64!());
    let quote_volume = f64_to_dec(take_f64!());
    let buy_quote_volume = f64_to_dec(take_f64!());
    let sell_quote_volume = f64_to_dec(take_f64!());
    let delta = f64_to_dec(take_f64!());
    let delta_max = f64_to_dec(take_f64!());
    let delta_min = f64_to_dec(take_f64!());
    let trade_count = take_u64!();
    let first_trade_id = take_i64!();
    let last_trade_id = take_i64!();
    let tick_value = f64_to_dec(take_f64!());
    let bin_multiplier = take_u32!();
    let bin_count = take_u32!();

    let mut bins = Vec::with_capacity(bin_count as usize);
    for _ in 0..bin_count {
        let tick_price = f64_to_dec(take_f64!());
        let buy_volume = f64_to_dec(take_f64!());
        let sell_volume = f64_to_dec(take_f64!());
        let trade_count = take_u32!() as u64;
        bins.push(PriceBin {
            tick_price,
            buy_volume,
            sell_volume,
            total_volume: buy_volume + sell_volume,
            trade_count,
        });
    }

    Ok(FootprintCandle {
        exchange: String::new(),
        symbol: String::new(),
        timeframe: Timeframe::S1,
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        buy_volume,
        sell_volume,
        quote_volume,
        buy_quote_volume,
        sell_quote_volume,
        delta,
        delta_max,
        delta_min,
        trade_count,
        first_trade_id,
        last_trade_id,
        tick_value,
        bin_multiplier,
        bins,
        closed: true,
    })
}

/// File-format round trip does not carry exchange/symbol/timeframe (those
/// are the file's own identity); callers must restamp them after reading.
pub fn restamp(mut candle: FootprintCandle, exchange: &str, symbol: &str, timeframe: Timeframe) -> FootprintCandle {
    candle.exchange = exchange.to_string();
    candle.symbol = symbol.to_string();
    candle.timeframe = timeframe;
    candle
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_candle(open_time: i64) -> FootprintCandle {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 1);
        c.open_time = open_time;
        c.close_time = open_time + 999;
        c.open = dec!(100.0);
        c.high = dec!(100.5);
        c.low = dec!(99.5);
        c.close = dec!(100.2);
        c.volume = dec!(3);
        c.buy_volume = dec!(2);
        c.sell_volume = dec!(1);
        c.bins.push(PriceBin { tick_price: dec!(100.0), buy_volume: dec!(2), sell_volume: dec!(1), total_volume: dec!(3), trade_count: 2 });
        c.closed = true;
        c
    }

    #[test]
    fn append_then_find_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path()).unwrap();
        let candle = sample_candle(1_700_000_000_000);
        store.append(&candle).unwrap();

        let latest = store.find_latest("binance", "BTCUSDT", "1s").unwrap().unwrap();
        let latest = restamp(latest, "binance", "BTCUSDT", Timeframe::S1);
        assert_eq!(latest.open_time, candle.open_time);
        assert_eq!(latest.volume, candle.volume);
        assert_eq!(latest.bins.len(), 1);
    }

    #[test]
    fn append_same_identity_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path()).unwrap();
        let candle = sample_candle(1_700_000_000_000);
        store.append(&candle).unwrap();
        store.append(&candle).unwrap();
        assert_eq!(store.count("binance", "BTCUSDT", "1s").unwrap(), 1);
    }

    #[test]
    fn find_by_symbol_respects_range_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = CandleStore::new(dir.path()).unwrap();
        for i in 0..5 {
            store.append(&sample_candle(1_700_000_000_000 + i * 1000)).unwrap();
        }
        let found = store
            .find_by_symbol("binance", "BTCUSDT", "1s", Some((1_700_000_001_000, 1_700_000_003_000)), None)
            .unwrap();
        let open_times: Vec<i64> = found.iter().map(|c| c.open_time).collect();
        assert_eq!(open_times, vec![1_700_000_001_000, 1_700_000_002_000, 1_700_000_003_000]);
    }

    #[test]
    fn index_rebuilds_from_existing_file_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CandleStore::new(dir.path()).unwrap();
            store.append(&sample_candle(1_700_000_000_000)).unwrap();
        }
        let store = CandleStore::new(dir.path()).unwrap();
        assert_eq!(store.count("binance", "BTCUSDT", "1s").unwrap(), 1);
    }
}
