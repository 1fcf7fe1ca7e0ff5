//! Kernel trace records with pluggable backends.
//!
//! The kernel describes what it is doing as small binary *records*: a sequence
//! number, a record type chosen by the emitter, an optional timestamp and a short
//! payload. Records are framed HDLC-style (flag `0x7E`, escape `0x7D`, inverted
//! additive checksum) so a host tool can resynchronise on a lossy serial line.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Maximum payload length for a single record (excluding header/checksum).
const DEFAULT_MAX_RECORD_LEN: usize = 32;

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub seq: u8,
    pub record_type: u8,
    pub timestamp: Option<Duration>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting or decoding trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("checksum mismatch")]
    Checksum,
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Simple backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that keeps every frame in memory; cloning shares the same buffer.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every frame written so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Decodes every captured frame, skipping malformed ones.
    pub fn records(&self, with_timestamp: bool) -> Vec<Record> {
        self.frames()
            .iter()
            .filter_map(|frame| decode_frame(frame, with_timestamp).ok())
            .collect()
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.to_vec());
        Ok(())
    }
}

/// Trace frame encoder.
#[derive(Debug)]
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: TraceConfig,
    seq: u8,
    epoch: Instant,
}

#[derive(Clone)]
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: TraceConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<Record, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed())
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        let record = Record {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        let frame = encode_frame(&record);
        self.backend.write_frame(&frame)?;
        Ok(record)
    }
}

/// Frames a record: escaped body, inverted checksum, trailing flag.
pub fn encode_frame(record: &Record) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.payload.len() + 8);
    let mut checksum: u8 = 0;

    let push_literal = |dest: &mut Vec<u8>, byte: u8| {
        if byte == FLAG || byte == ESC {
            dest.push(ESC);
            dest.push(byte ^ ESC_XOR);
        } else {
            dest.push(byte);
        }
    };

    let mut push_escaped = |dest: &mut Vec<u8>, byte: u8| {
        checksum = checksum.wrapping_add(byte);
        push_literal(dest, byte);
    };

    push_escaped(&mut bytes, record.seq);
    push_escaped(&mut bytes, record.record_type);

    if let Some(ts) = record.timestamp {
        for byte in (ts.as_micros() as u32).to_le_bytes() {
            push_escaped(&mut bytes, byte);
        }
    }

    for &byte in &record.payload {
        push_escaped(&mut bytes, byte);
    }

    let checksum_byte = !checksum;
    push_literal(&mut bytes, checksum_byte);

    bytes.push(FLAG);
    bytes
}

/// Decodes one frame produced by [`encode_frame`].
///
/// `with_timestamp` must match the tracer configuration since the frame does
/// not self-describe the timestamp field.
pub fn decode_frame(frame: &[u8], with_timestamp: bool) -> Result<Record, TraceError> {
    let body = match frame.split_last() {
        Some((&FLAG, body)) => body,
        _ => return Err(TraceError::Malformed("missing trailing flag")),
    };

    let mut raw = Vec::with_capacity(body.len());
    let mut iter = body.iter();
    while let Some(&byte) = iter.next() {
        if byte == ESC {
            let next = iter
                .next()
                .ok_or(TraceError::Malformed("dangling escape"))?;
            raw.push(next ^ ESC_XOR);
        } else {
            raw.push(byte);
        }
    }

    let (&checksum_byte, content) = raw
        .split_last()
        .ok_or(TraceError::Malformed("empty frame"))?;
    let sum = content.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if !sum != checksum_byte {
        return Err(TraceError::Checksum);
    }

    let header_len = if with_timestamp { 6 } else { 2 };
    if content.len() < header_len {
        return Err(TraceError::Malformed("short frame"));
    }

    let timestamp = if with_timestamp {
        let mut micros = [0u8; 4];
        micros.copy_from_slice(&content[2..6]);
        Some(Duration::from_micros(u32::from_le_bytes(micros) as u64))
    } else {
        None
    };

    Ok(Record {
        seq: content[0],
        record_type: content[1],
        timestamp,
        payload: content[header_len..].to_vec(),
    })
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<Record, TraceError> {
        self.emit_internal(record_type, payload, false)
    }

    pub fn emit_with_timestamp(&self, record_type: u8, payload: &[u8]) -> Result<Record, TraceError> {
        self.emit_internal(record_type, payload, true)
    }

    fn emit_internal(
        &self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<Record, TraceError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.record(record_type, payload, with_timestamp)
    }

    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

/// Convenience backend that writes frames to stdout; handy for early bring-up.
pub fn stdout_backend() -> WriterBackend<io::Stdout> {
    WriterBackend::new(io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHED_NEXT: u8 = 50;
    const SCHED_IDLE: u8 = 53;
    const THREAD_CREATE: u8 = 1;
    const THREAD_EXIT: u8 = 2;
    const SYSDOWN: u8 = 127;

    #[test]
    fn frame_escapes_flag_and_escape_bytes() {
        let record = Record {
            seq: 1,
            record_type: FLAG,
            timestamp: None,
            payload: vec![ESC, 0x01],
        };
        let frame = encode_frame(&record);

        assert_eq!(&frame[..4], &[0x01, ESC, FLAG ^ ESC_XOR, ESC]);
        assert_eq!(*frame.last().unwrap(), FLAG);
        assert_eq!(frame.iter().filter(|b| **b == FLAG).count(), 1);
        assert_eq!(decode_frame(&frame, false).unwrap(), record);
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let record = Record {
            seq: 9,
            record_type: SCHED_NEXT,
            timestamp: None,
            payload: vec![2, 5],
        };
        let mut frame = encode_frame(&record);
        frame[2] ^= 0x01;

        assert!(matches!(decode_frame(&frame, false), Err(TraceError::Checksum)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut tracer = Tracer::new(TraceConfig::default(), MemoryBackend::new());
        let payload = [0u8; DEFAULT_MAX_RECORD_LEN + 1];

        assert!(matches!(
            tracer.record(SYSDOWN, &payload, false),
            Err(TraceError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn hook_feeds_memory_backend_in_sequence() {
        let backend = MemoryBackend::new();
        let cfg = TraceConfig {
            include_timestamp: false,
            ..TraceConfig::default()
        };
        let handle = Tracer::new(cfg, backend.clone()).into_handle();
        let hook = handle.hook();

        hook(THREAD_CREATE, &[0, 3], true).unwrap();
        hook(THREAD_EXIT, &[0], true).unwrap();

        let decoded = backend.records(false);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].seq, 1);
        assert_eq!(decoded[0].record_type, THREAD_CREATE);
        assert_eq!(decoded[0].payload, vec![0, 3]);
        assert_eq!(decoded[1].seq, 2);
        assert_eq!(decoded[1].record_type, THREAD_EXIT);
    }

    #[test]
    fn timestamped_frames_round_trip_header_length() {
        let backend = MemoryBackend::new();
        let handle = Tracer::new(TraceConfig::default(), backend.clone()).into_handle();
        handle.emit_with_timestamp(SCHED_IDLE, &[7]).unwrap();

        let decoded = backend.records(true);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].timestamp.is_some());
        assert_eq!(decoded[0].payload, vec![7]);
    }
}
