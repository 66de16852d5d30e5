// ===============================
// src/recorder.rs
// ===============================
//
// Optional JSONL replay record:
// - every event the dispatcher pops and every order request it accepts,
//   one JSON object per line, appended to RECORD_FILE.
// - buffered via BufWriter; flushed every 1s and every 1000 records.
// - a failed write reopens the file once and retries; still failing drops
//   the record.
// - fed through a lossy bounded channel (try_send) so recording can never
//   backpressure the simulation.
//
// ENV: set `RECORD_FILE=/path/to/replay.jsonl` to enable (see main.rs).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::{Event, OrderRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplayRecord {
    Event(Event),
    Order(OrderRequest),
}

pub const RECORD_CHANNEL_CAPACITY: usize = 8192;

async fn open_writer(path: &str) -> Option<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(error = %e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            error!(error = %e, %path, "recorder: open failed");
            None
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<ReplayRecord>, path: String) {
    info!(%path, "recorder: started");
    let Some(mut writer) = open_writer(&path).await else {
        // keep draining so senders never see a full channel as an error
        while rx.recv().await.is_some() {}
        return;
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut since_last_flush: u32 = 0;
    const FLUSH_EVERY_N_RECORDS: u32 = 1000;

    loop {
        tokio::select! {
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        let line = match serde_json::to_string(&record) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(error = %e, "recorder: serialize error, skip record");
                                continue;
                            }
                        };

                        if let Err(e) = write_line(&mut writer, &line).await {
                            error!(error = %e, "recorder: write failed, attempting reopen");
                            match open_writer(&path).await {
                                Some(w) => writer = w,
                                None => continue,
                            }
                            if let Err(e2) = write_line(&mut writer, &line).await {
                                error!(error = %e2, "recorder: write failed again after reopen, drop record");
                                continue;
                            }
                        }

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_RECORDS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

async fn write_line(
    writer: &mut BufWriter<tokio::fs::File>,
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ControlEvent, ControlKind};
    use crate::time::SimTime;

    #[tokio::test]
    async fn writes_one_json_object_per_line_and_flushes_on_close() {
        let path = std::env::temp_dir()
            .join(format!("mr_record_{}.jsonl", std::process::id()))
            .display()
            .to_string();
        let _ = std::fs::remove_file(&path);

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let task = tokio::spawn(run(rx, path.clone()));

        for ns in [1i64, 2, 3] {
            tx.try_send(ReplayRecord::Event(Event::Control(ControlEvent::new(
                SimTime(ns),
                ControlKind::ProcessOrderRequests,
            ))))
            .unwrap();
        }
        drop(tx);
        task.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let record: ReplayRecord = serde_json::from_str(line).unwrap();
            assert!(matches!(record, ReplayRecord::Event(Event::Control(_))));
        }
        let _ = std::fs::remove_file(&path);
    }
}
