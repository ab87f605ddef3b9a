//! The in-process pump between a PTY master and the set of channels
//! (primary, viewers, recorder, local stdout).
//!
//! The PTY read itself runs on a dedicated OS thread (blocking I/O, per
//! `SPEC_FULL.md` §5); the resulting bytes are handed to an async task
//! that does the actual history-buffering, pause handling, and fan-out —
//! this is the "one read loop" the spec describes, split across the
//! blocking/async boundary the way the heritage reader threads already
//! split PTY reads from VT100 processing (`agent/spawn.rs`).

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::channel::{ChannelError, EncryptedChannel};
use crate::recording::Recording;

use super::PtySession;

/// Default cap on the rolling history buffer.
pub const DEFAULT_BUFFER_MAX: usize = 64 * 1024;
/// Size of each PTY read.
const READ_CHUNK: usize = 4096;

/// Anything the bridge can fan output out to.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError>;
}

#[async_trait]
impl Sink for EncryptedChannel {
    async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.send_data(bytes).await
    }
}

struct BridgeState {
    pty: PtySession,
    primary: Option<Arc<dyn Sink>>,
    viewers: Vec<Arc<dyn Sink>>,
    recorder: Option<Arc<Recording>>,
    local_output: Option<Box<dyn Write + Send>>,
    history: VecDeque<u8>,
    buffer_max: usize,
    paused: bool,
    pause_buffer: Vec<u8>,
}

/// The PTY↔channel pump for one session.
pub struct Bridge {
    state: Mutex<BridgeState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    reader_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    pump_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Bridge {
    /// Spawns the read loop over `pty`/`reader`. `primary` may be `None`
    /// initially (e.g. while waiting for the controller's data channel to
    /// open).
    pub fn spawn(
        pty: PtySession,
        reader: Box<dyn Read + Send>,
        primary: Option<Arc<dyn Sink>>,
        buffer_max: usize,
    ) -> Arc<Self> {
        let (done_tx, done_rx) = watch::channel(false);
        let state = Mutex::new(BridgeState {
            pty,
            primary,
            viewers: Vec::new(),
            recorder: None,
            local_output: None,
            history: VecDeque::with_capacity(buffer_max),
            buffer_max,
            paused: false,
            pause_buffer: Vec::new(),
        });

        let bridge = Arc::new(Self {
            state,
            done_tx,
            done_rx,
            reader_thread: Mutex::new(None),
            pump_task: Mutex::new(None),
        });

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let reader_thread = spawn_reader_thread(reader, chunk_tx);
        let pump_task = spawn_pump_task(Arc::clone(&bridge), chunk_rx);

        // Populated once, immediately after construction; no contention.
        if let Ok(mut guard) = bridge.reader_thread.try_lock() {
            *guard = Some(reader_thread);
        }
        if let Ok(mut guard) = bridge.pump_task.try_lock() {
            *guard = Some(pump_task);
        }

        bridge
    }

    /// Installs the session's recorder.
    pub async fn set_recorder(&self, recorder: Arc<Recording>) {
        self.state.lock().await.recorder = Some(recorder);
    }

    /// Installs local stdout mirroring (foreground mode).
    pub async fn set_local_output(&self, output: Box<dyn Write + Send>) {
        self.state.lock().await.local_output = Some(output);
    }

    /// Forwards controller keystrokes into the shell.
    pub async fn write_input(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(recorder) = state.recorder.clone() {
            let _ = recorder.write_input(bytes);
        }
        state.pty.write_input(bytes)
    }

    /// Resizes the PTY and records the event.
    pub async fn resize(&self, rows: u16, cols: u16) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.pty.resize(rows, cols)?;
        if let Some(recorder) = state.recorder.clone() {
            let _ = recorder.write_resize(rows, cols);
        }
        Ok(())
    }

    /// Installs (or replaces) the primary sink, e.g. once the controller's
    /// data channel finishes negotiating.
    pub async fn set_primary(&self, sink: Arc<dyn Sink>) {
        self.state.lock().await.primary = Some(sink);
    }

    /// Adds a read-only viewer; it immediately receives a snapshot of the
    /// current history buffer as a single best-effort frame, so it sees
    /// recent output before any further live bytes arrive.
    pub async fn add_viewer(&self, sink: Arc<dyn Sink>) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.viewers.push(Arc::clone(&sink));
            state.history.iter().copied().collect::<Vec<u8>>()
        };
        if !snapshot.is_empty() {
            let _ = sink.send(&snapshot).await;
        }
    }

    /// Enters pause (buffering) mode: the primary stops receiving live
    /// output and the viewer list is cleared.
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        state.paused = true;
        state.viewers.clear();
    }

    /// Leaves pause mode, installing `new_primary` and flushing whatever
    /// accumulated in the pause buffer to it.
    pub async fn resume(&self, new_primary: Arc<dyn Sink>) {
        let pending = {
            let mut state = self.state.lock().await;
            state.paused = false;
            state.primary = Some(Arc::clone(&new_primary));
            std::mem::take(&mut state.pause_buffer)
        };
        if !pending.is_empty() {
            let _ = new_primary.send(&pending).await;
        }
    }

    /// Terminates the shell (SIGHUP to its process group) and stops the
    /// read loop.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            let _ = state.pty.terminate();
        }
        self.close_without_pty().await;
    }

    /// Stops the read loop without touching the shell, leaving it alive
    /// for a future reattach.
    pub async fn close_without_pty(&self) {
        let _ = self.done_tx.send(true);
        if let Some(handle) = self.pump_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reader_thread.lock().await.take() {
            // The OS thread is blocked in a `read()` on a (possibly now
            // closed) fd; it exits on its own once that read returns.
            let _ = handle.join();
        }
    }

    /// Awaits the read loop's termination, bounded by `timeout`.
    pub async fn wait_for_exit(&self, timeout: std::time::Duration) {
        let mut rx = self.done_rx.clone();
        let _ = tokio::time::timeout(timeout, async {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    }
}

fn spawn_reader_thread(
    mut reader: Box<dyn Read + Send>,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if chunk_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn spawn_pump_task(
    bridge: Arc<Bridge>,
    mut chunk_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                chunk = chunk_rx.recv() => {
                    match chunk {
                        Some(bytes) => pump_chunk(&bridge, &bytes).await,
                        None => break,
                    }
                }
                _ = wait_for_done(&bridge) => break,
            }
        }
        let _ = bridge.done_tx.send(true);
    })
}

async fn wait_for_done(bridge: &Arc<Bridge>) {
    let mut rx = bridge.done_rx.clone();
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn pump_chunk(bridge: &Arc<Bridge>, bytes: &[u8]) {
    // The mutex is released across each network send below so one slow
    // viewer cannot starve the others or the primary.
    let (primary, viewers, recorder, paused) = {
        let mut state = bridge.state.lock().await;

        for b in bytes {
            if state.history.len() == state.buffer_max {
                state.history.pop_front();
            }
            state.history.push_back(*b);
        }

        if state.paused {
            state.pause_buffer.extend_from_slice(bytes);
            if state.pause_buffer.len() > state.buffer_max {
                let excess = state.pause_buffer.len() - state.buffer_max;
                state.pause_buffer.drain(0..excess);
            }
            (None, Vec::new(), None, true)
        } else {
            if let Some(out) = &mut state.local_output {
                let _ = out.write_all(bytes);
                let _ = out.flush();
            }
            (
                state.primary.clone(),
                state.viewers.clone(),
                state.recorder.clone(),
                false,
            )
        }
    };

    if paused {
        return;
    }

    if let Some(recorder) = recorder {
        let _ = recorder.write_output(bytes);
    }
    if let Some(primary) = primary {
        let _ = primary.send(bytes).await;
    }
    for viewer in viewers {
        let _ = viewer.send(bytes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: Arc<AtomicUsize>,
        last: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().await = bytes.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_history_ring_buffer_caps_length() {
        // Exercise the buffer-trim logic in isolation (no real PTY needed).
        let mut history: VecDeque<u8> = VecDeque::new();
        let cap = 8;
        for byte in 0u8..20 {
            if history.len() == cap {
                history.pop_front();
            }
            history.push_back(byte);
        }
        assert_eq!(history.len(), cap);
        assert_eq!(history.front().copied(), Some(12));
        assert_eq!(history.back().copied(), Some(19));
    }
}
