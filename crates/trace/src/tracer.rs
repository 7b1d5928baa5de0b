use crate::{
    event::LifecycleEvent,
    utils::{current_timestamp_ms, format_csv_line},
};

use alloy_primitives::B256;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
    time::Instant,
};

/// Capacity of the channel between callers and the writer thread.
/// When full, new lines are dropped so the caller never blocks.
const CHANNEL_CAPACITY: usize = 16_384;

/// Number of lines written before forcing a flush
const FLUSH_INTERVAL_WRITES: u64 = 100;

/// Time interval between flushes (in seconds)
const FLUSH_INTERVAL_SECONDS: u64 = 1;

enum WriterMessage {
    Line(String),
    Flush(mpsc::Sender<Result<(), std::io::Error>>),
    SyncAll(mpsc::Sender<Result<(), std::io::Error>>),
}

/// Lifecycle trace writer. Cheap to clone; all clones feed the same file.
#[derive(Debug, Clone)]
pub struct LifecycleTracer {
    inner: Arc<LifecycleTracerInner>,
}

#[derive(Debug)]
struct LifecycleTracerInner {
    enabled: bool,
    tx: Sender<WriterMessage>,
}

impl LifecycleTracer {
    /// Create a tracer appending to `output_path`.
    ///
    /// A path ending in a separator, or without extension that does not exist
    /// yet, is treated as a directory and `lifecycle.log` is created inside it.
    pub fn new(enabled: bool, output_path: PathBuf) -> Self {
        let path_str = output_path.to_string_lossy();
        let file_path = if path_str.ends_with('/')
            || path_str.ends_with('\\')
            || (output_path.extension().is_none() && !output_path.exists())
        {
            output_path.join("lifecycle.log")
        } else {
            output_path
        };

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        if enabled {
            write_handle(rx, file_path);
        }

        Self {
            inner: Arc::new(LifecycleTracerInner { enabled, tx }),
        }
    }

    /// A tracer that records nothing
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            inner: Arc::new(LifecycleTracerInner { enabled: false, tx }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    fn send_line(&self, csv_line: String) {
        if self.inner.tx.try_send(WriterMessage::Line(csv_line)).is_err() {
            tracing::debug!(target: "lifecycle_trace", "Trace channel full, line dropped");
        }
    }

    /// Record a transaction event
    pub fn log_transaction(&self, tx_hash: B256, event: LifecycleEvent, sequence: u64) {
        if !self.inner.enabled {
            return;
        }
        let line = format_csv_line(&tx_hash, event, current_timestamp_ms(), None, Some(sequence));
        self.send_line(line);
    }

    /// Record a block event
    pub fn log_block(&self, block_hash: B256, height: u64, event: LifecycleEvent) {
        if !self.inner.enabled {
            return;
        }
        let line = format_csv_line(
            &block_hash,
            event,
            current_timestamp_ms(),
            Some((height, block_hash)),
            None,
        );
        self.send_line(line);
    }

    /// Flush buffered lines to the OS. Use [`Self::sync_all`] for disk persistence.
    pub fn flush(&self) -> Result<(), std::io::Error> {
        if !self.inner.enabled {
            return Ok(());
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        self.inner
            .tx
            .send(WriterMessage::Flush(ack_tx))
            .map_err(|_| std::io::Error::other("Writer thread disconnected for lifecycle trace"))?;
        ack_rx
            .recv()
            .map_err(|_| std::io::Error::other("Writer thread did not acknowledge flush request"))?
    }

    /// Sync to disk. Call before shutdown.
    pub fn sync_all(&self) -> Result<(), std::io::Error> {
        if !self.inner.enabled {
            return Ok(());
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        self.inner
            .tx
            .send(WriterMessage::SyncAll(ack_tx))
            .map_err(|_| std::io::Error::other("Writer thread disconnected for lifecycle trace"))?;
        ack_rx
            .recv()
            .map_err(|_| std::io::Error::other("Writer thread did not acknowledge sync request"))?
    }
}

fn write_handle(rx: Receiver<WriterMessage>, file_path: PathBuf) {
    thread::spawn(move || {
        if let Some(parent) = file_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(
                    target: "lifecycle_trace",
                    ?parent,
                    error = %e,
                    "Failed to create lifecycle trace output directory"
                );
            }
        }

        let mut writer_opt: Option<BufWriter<File>> =
            match OpenOptions::new().create(true).append(true).open(&file_path) {
                Ok(file) => {
                    tracing::info!(
                        target: "lifecycle_trace",
                        ?file_path,
                        "Lifecycle trace file opened for appending"
                    );
                    Some(BufWriter::new(file))
                }
                Err(e) => {
                    tracing::warn!(
                        target: "lifecycle_trace",
                        ?file_path,
                        error = %e,
                        "Failed to open lifecycle trace file"
                    );
                    None
                }
            };

        let mut write_count: u64 = 0;
        let mut last_flush_time = Instant::now();

        while let Ok(msg) = rx.recv() {
            match msg {
                WriterMessage::Line(csv_line) => {
                    let Some(writer) = writer_opt.as_mut() else {
                        continue;
                    };
                    if writeln!(writer, "{csv_line}").is_err() {
                        tracing::warn!(target: "lifecycle_trace", "Failed to write lifecycle trace line");
                        continue;
                    }
                    write_count += 1;
                    let now = Instant::now();
                    if write_count % FLUSH_INTERVAL_WRITES == 0
                        || now.duration_since(last_flush_time).as_secs() >= FLUSH_INTERVAL_SECONDS
                    {
                        if writer.flush().is_err() {
                            tracing::warn!(target: "lifecycle_trace", "Failed to flush lifecycle trace file");
                        }
                        last_flush_time = now;
                    }
                }
                WriterMessage::Flush(ack_tx) => {
                    let result = writer_opt.as_mut().map_or(Ok(()), |w| w.flush());
                    let _ = ack_tx.send(result);
                }
                WriterMessage::SyncAll(ack_tx) => {
                    let result = writer_opt
                        .as_mut()
                        .map_or(Ok(()), |w| w.flush().and_then(|()| w.get_ref().sync_all()));
                    let _ = ack_tx.send(result);
                }
            }
        }
    });
}
