//! asciicast v2 session recording.
//!
//! No heritage module records terminal sessions to disk, so this is built
//! fresh from the public asciicast v2 format (one JSON header line followed
//! by one JSON array per event), in the error-handling and permission style
//! the rest of this crate uses for on-disk state (`config.rs`'s 0600/0700
//! file modes).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Serialize)]
struct Header {
    version: u8,
    width: u16,
    height: u16,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

/// Writes an asciicast v2 stream for one session to a single file.
///
/// Output, input, and resize events are all serialized under a single
/// mutex: asciicast lines must appear in the order they actually happened,
/// and the bridge's read loop and controller-input path run concurrently.
pub struct Recording {
    writer: Mutex<BufWriter<File>>,
    started_at: Instant,
}

impl Recording {
    /// Opens `path` for writing (truncating any existing file), sets mode
    /// 0600, and writes the asciicast header line.
    pub fn create(path: &std::path::Path, rows: u16, cols: u16, shell: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create recording file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .context("failed to set recording file permissions")?;
        }

        let mut writer = BufWriter::new(file);
        let header = Header {
            version: 2,
            width: cols,
            height: rows,
            timestamp: chrono::Utc::now().timestamp(),
            command: Some(shell.to_string()),
        };
        serde_json::to_writer(&mut writer, &header).context("failed to write recording header")?;
        writer.write_all(b"\n").context("failed to write recording header")?;
        writer.flush().context("failed to flush recording header")?;

        Ok(Self {
            writer: Mutex::new(writer),
            started_at: Instant::now(),
        })
    }

    fn elapsed(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    fn write_event(&self, code: &str, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data);
        let line = (self.elapsed(), code, text);
        let mut writer = self.writer.lock().unwrap();
        serde_json::to_writer(&mut *writer, &line).context("failed to write recording event")?;
        writer.write_all(b"\n").context("failed to write recording event")?;
        writer.flush().context("failed to flush recording event")?;
        Ok(())
    }

    /// Records an `"o"` (output) event.
    pub fn write_output(&self, data: &[u8]) -> Result<()> {
        self.write_event("o", data)
    }

    /// Records an `"i"` (input) event.
    pub fn write_input(&self, data: &[u8]) -> Result<()> {
        self.write_event("i", data)
    }

    /// Records a `"r"` (resize) event. asciicast encodes resizes as
    /// `"COLSxROWS"` text rather than raw bytes.
    pub fn write_resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.write_event("r", format!("{cols}x{rows}").as_bytes())
    }

    /// Flushes and fsyncs the underlying file so the recording survives a
    /// crash immediately after closing.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush().context("failed to flush recording on close")?;
        writer
            .get_ref()
            .sync_all()
            .context("failed to fsync recording on close")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn test_header_and_events_are_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.cast");
        let recording = Recording::create(&path, 24, 80, "/bin/bash").unwrap();
        recording.write_output(b"hello").unwrap();
        recording.write_input(b"h").unwrap();
        recording.write_resize(30, 100).unwrap();
        recording.close().unwrap();

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 4);

        let header: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(header["version"], 2);
        assert_eq!(header["width"], 80);
        assert_eq!(header["height"], 24);

        let output_event: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(output_event[1], "o");
        assert_eq!(output_event[2], "hello");

        let resize_event: serde_json::Value = serde_json::from_str(&lines[3]).unwrap();
        assert_eq!(resize_event[1], "r");
        assert_eq!(resize_event[2], "100x30");
    }

    #[test]
    #[cfg(unix)]
    fn test_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.cast");
        let recording = Recording::create(&path, 24, 80, "/bin/bash").unwrap();
        recording.close().unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
