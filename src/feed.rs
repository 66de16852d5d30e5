// ===============================
// src/feed.rs
// ===============================
//
// Historical tick input. One CSV file, exchange-time sorted, two row shapes:
//
//   QUOTE,<ts_ns>,<symbol>,<px unused>,<sz unused>,<bid_px>,<bid_sz>,<ask_px>,<ask_sz>
//   TRADE,<ts_ns>,<symbol>,<price>,<size>
//
// The header row is skipped. A malformed row is logged and skipped, never
// fatal; failing to open the file is fatal and surfaces to main.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Event, QuoteEvent, TradeEvent};
use crate::time::{parse_timestamp, ParseError};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to open tick file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
enum RowError {
    #[error("unknown record type {0:?}")]
    UnknownType(String),
    #[error("expected at least {expected} fields, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("bad field {field}: {value:?}")]
    BadField { field: &'static str, value: String },
    #[error(transparent)]
    Time(#[from] ParseError),
}

#[derive(Debug)]
pub struct TickReader<R> {
    reader: R,
    pending: Option<String>,
    line_number: u64,
}

impl TickReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FeedError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> TickReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let mut tick_reader = Self {
            reader,
            pending: None,
            line_number: 0,
        };
        // header row
        if let Some(header) = tick_reader.next_line() {
            info!(header = %header, "tick feed: skipped header");
        } else {
            warn!("tick feed: file is empty");
        }
        tick_reader.pending = tick_reader.next_line();
        tick_reader
    }

    pub fn has_more(&self) -> bool {
        self.pending.is_some()
    }

    /// Next well-formed tick, skipping malformed rows with a warning.
    /// Arrival timestamps start equal to the exchange timestamp; the
    /// dispatcher applies feed latency when enqueueing.
    pub fn read_next(&mut self) -> Option<Event> {
        while let Some(line) = self.pending.take() {
            let line_number = self.line_number;
            self.pending = self.next_line();

            if line.trim().is_empty() {
                continue;
            }
            match parse_row(&line) {
                Ok(event) => return Some(event),
                Err(e) => {
                    warn!(line = line_number, error = %e, row = %line, "tick feed: skipping malformed row");
                }
            }
        }
        None
    }

    fn next_line(&mut self) -> Option<String> {
        let mut buf = String::new();
        match self.reader.read_line(&mut buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_number += 1;
                Some(buf.trim_end_matches(&['\r', '\n'][..]).to_string())
            }
            Err(e) => {
                warn!(error = %e, "tick feed: read error, treating as end of feed");
                None
            }
        }
    }
}

fn parse_row(line: &str) -> Result<Event, RowError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let record_type = fields.first().copied().unwrap_or_default();

    match record_type {
        "QUOTE" => {
            if fields.len() < 9 {
                return Err(RowError::Arity {
                    expected: 9,
                    got: fields.len(),
                });
            }
            let ts = parse_timestamp(fields[1])?;
            Ok(Event::Quote(QuoteEvent {
                exchange_ts: ts,
                arrival_ts: ts,
                symbol: fields[2].to_string(),
                bid_price: parse_f64("bid_price", fields[5])?,
                bid_size: parse_u64("bid_size", fields[6])?,
                ask_price: parse_f64("ask_price", fields[7])?,
                ask_size: parse_u64("ask_size", fields[8])?,
            }))
        }
        "TRADE" => {
            if fields.len() < 5 {
                return Err(RowError::Arity {
                    expected: 5,
                    got: fields.len(),
                });
            }
            let ts = parse_timestamp(fields[1])?;
            Ok(Event::Trade(TradeEvent {
                exchange_ts: ts,
                arrival_ts: ts,
                symbol: fields[2].to_string(),
                price: parse_f64("price", fields[3])?,
                size: parse_u64("size", fields[4])?,
            }))
        }
        other => Err(RowError::UnknownType(other.to_string())),
    }
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, RowError> {
    value.parse().map_err(|_| RowError::BadField {
        field,
        value: value.to_string(),
    })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, RowError> {
    value.parse().map_err(|_| RowError::BadField {
        field,
        value: value.to_string(),
    })
}
