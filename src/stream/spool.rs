//! Spillover sink: a write buffer that moves to a temporary file past a threshold.
//!
//! Bytes accumulate in memory until the total exceeds the threshold, at which
//! point the buffer is flushed to a fresh temp file and writing continues
//! there. Once writing is finished, any number of [`SpoolInput`] views can
//! read the content back.
//!
//! The temp file is deleted when all of the following hold:
//!
//! - the sink has been closed (explicitly or by dropping it)
//! - every [`SpoolHold`] pin has been released
//! - no [`SpoolInput`] over the file is still alive

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{MimeError, Result};

/// Default in-memory threshold (100 KB).
pub const DEFAULT_THRESHOLD: u64 = 100 * 1024;

/// Prefix of spill file names.
const TEMP_PREFIX: &str = "mimespool-";

/// Threshold, size cap and directory for one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolSettings {
    /// Bytes kept in memory before spilling to disk.
    pub threshold: u64,
    /// Hard cap on the total size, `None` for unlimited.
    pub max_size: Option<u64>,
    /// Directory for spill files, `None` for the system temp dir.
    pub output_dir: Option<PathBuf>,
}

impl Default for SpoolSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_size: None,
            output_dir: None,
        }
    }
}

/// Deletion bookkeeping shared by the sink, its pins and its inputs.
#[derive(Default)]
struct PinState {
    holds: usize,
    readers: usize,
    closed: bool,
    file: Option<TempPath>,
}

#[derive(Default)]
struct Pins {
    state: Mutex<PinState>,
}

impl Pins {
    fn lock(&self) -> MutexGuard<'_, PinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete the spill file if nothing can reach it any more.
    fn maybe_delete(state: &mut PinState) {
        if !state.closed || state.holds > 0 || state.readers > 0 {
            return;
        }
        if let Some(temp) = state.file.take() {
            let path = temp.to_path_buf();
            match temp.close() {
                Ok(()) => debug!(path = %path.display(), "Deleted spool file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete spool file"),
            }
        }
    }
}

enum Backing {
    /// Still accepting writes in memory.
    Memory(Vec<u8>),
    /// In-memory content after writing finished.
    Frozen(Arc<[u8]>),
    /// Spilled; the writer is dropped once writing finished.
    File {
        path: PathBuf,
        writer: Option<BufWriter<File>>,
    },
}

/// Hooks run by a [`SpoolSink`] on flush and on close.
///
/// `on_close` runs after the content is locked, before the spill file can be
/// deleted, so the callback may still open an input.
pub trait SpoolCallback: Send {
    fn on_flush(&mut self, _sink: &SpoolSink) {}

    fn on_close(&mut self, _sink: &SpoolSink) {}
}

/// Write sink with transparent memory-to-disk promotion.
pub struct SpoolSink {
    settings: SpoolSettings,
    total: u64,
    backing: Backing,
    locked: bool,
    closed: bool,
    pins: Arc<Pins>,
    callbacks: Vec<Box<dyn SpoolCallback>>,
}

impl SpoolSink {
    /// Create a sink with the default settings.
    pub fn new() -> Self {
        Self::with_settings(SpoolSettings::default())
    }

    /// Create a sink with explicit settings.
    pub fn with_settings(settings: SpoolSettings) -> Self {
        Self {
            settings,
            total: 0,
            backing: Backing::Memory(Vec::with_capacity(2048)),
            locked: false,
            closed: false,
            pins: Arc::new(Pins::default()),
            callbacks: Vec::new(),
        }
    }

    /// Add a hook run on every flush and once on close.
    pub fn register_callback(&mut self, callback: Box<dyn SpoolCallback>) {
        self.callbacks.push(callback);
    }

    fn run_callbacks(&mut self, hook: fn(&mut Box<dyn SpoolCallback>, &SpoolSink)) {
        let mut callbacks = std::mem::take(&mut self.callbacks);
        for callback in &mut callbacks {
            hook(callback, self);
        }
        self.callbacks = callbacks;
    }

    pub fn threshold(&self) -> u64 {
        self.settings.threshold
    }

    /// Change the threshold. Has no effect once the sink has spilled.
    pub fn set_threshold(&mut self, threshold: u64) {
        self.settings.threshold = threshold;
    }

    /// Change the spill directory. Has no effect once the sink has spilled.
    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.settings.output_dir = Some(dir.into());
    }

    pub fn set_max_size(&mut self, max_size: Option<u64>) {
        self.settings.max_size = max_size;
    }

    /// Total number of bytes written so far.
    pub fn size(&self) -> u64 {
        self.total
    }

    /// `true` until the content has been moved to a temp file.
    pub fn is_in_memory(&self) -> bool {
        !matches!(self.backing, Backing::File { .. })
    }

    /// Path of the spill file while it still exists.
    pub fn temp_path(&self) -> Option<PathBuf> {
        self.pins.lock().file.as_ref().map(|t| t.to_path_buf())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.locked {
            return Err(MimeError::SpoolLocked);
        }
        let new_total = self.total + data.len() as u64;
        if let Some(limit) = self.settings.max_size {
            if new_total > limit {
                return Err(MimeError::CacheSizeExceeded { limit });
            }
        }
        if matches!(self.backing, Backing::Memory(_)) && new_total > self.settings.threshold {
            self.spill()?;
        }
        match &mut self.backing {
            Backing::Memory(buf) => buf.extend_from_slice(data),
            Backing::File {
                path,
                writer: Some(writer),
            } => writer
                .write_all(data)
                .map_err(|e| MimeError::spool(path.as_path(), e))?,
            _ => return Err(MimeError::SpoolLocked),
        }
        self.total = new_total;
        Ok(())
    }

    /// Move the in-memory buffer to a fresh temp file.
    fn spill(&mut self) -> Result<()> {
        let dir = self
            .settings
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let named = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| MimeError::spool(&dir, e))?;
        let (file, temp) = named.into_parts();
        let path = temp.to_path_buf();
        // Registered before writing so a failure below still cleans up.
        self.pins.lock().file = Some(temp);

        let mut writer = BufWriter::new(file);
        if let Backing::Memory(buf) = &self.backing {
            writer
                .write_all(buf)
                .map_err(|e| MimeError::spool(&path, e))?;
        }
        debug!(
            path = %path.display(),
            threshold = self.settings.threshold,
            "Spilled spool to temp file"
        );
        self.backing = Backing::File {
            path,
            writer: Some(writer),
        };
        Ok(())
    }

    /// Finish writing. Later writes fail; the content becomes readable.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Ok(());
        }
        match &mut self.backing {
            Backing::Memory(buf) => {
                let bytes: Arc<[u8]> = Arc::from(std::mem::take(buf));
                self.backing = Backing::Frozen(bytes);
            }
            Backing::File { path, writer } => {
                if let Some(mut w) = writer.take() {
                    w.flush().map_err(|e| MimeError::spool(path.as_path(), e))?;
                }
            }
            Backing::Frozen(_) => {}
        }
        self.locked = true;
        Ok(())
    }

    /// Open a fresh reader over everything written. Locks the sink.
    pub fn input(&mut self) -> Result<SpoolInput> {
        self.lock()?;
        match &self.backing {
            Backing::Frozen(bytes) => Ok(SpoolInput::memory(Arc::clone(bytes))),
            Backing::Memory(buf) => Ok(SpoolInput::memory(Arc::from(buf.as_slice()))),
            Backing::File { path, .. } => {
                let mut state = self.pins.lock();
                if state.file.is_none() {
                    return Err(MimeError::SpoolDeleted(path.clone()));
                }
                let file = File::open(path).map_err(|e| MimeError::spool(path.as_path(), e))?;
                state.readers += 1;
                Ok(SpoolInput {
                    inner: InputInner::File {
                        reader: BufReader::new(file),
                        path: path.clone(),
                        consumed: 0,
                        pins: Arc::clone(&self.pins),
                    },
                })
            }
        }
    }

    /// Pin the spill file against deletion until the returned guard is released.
    pub fn hold(&self) -> SpoolHold {
        self.pins.lock().holds += 1;
        SpoolHold {
            pins: Arc::clone(&self.pins),
            released: false,
        }
    }

    /// Finish writing and allow the spill file to be deleted.
    ///
    /// Deletion happens now if nothing pins or reads the file, otherwise when
    /// the last pin or input goes away.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.lock();
        self.closed = true;
        self.run_callbacks(|cb, sink| cb.on_close(sink));
        let mut state = self.pins.lock();
        state.closed = true;
        Pins::maybe_delete(&mut state);
        flushed
    }

    /// Copy of the full content.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.total as usize);
        self.write_cache_to(&mut out)?;
        Ok(out)
    }

    /// Stream the full content into `out`, returning the byte count.
    pub fn write_cache_to<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        let mut input = self.input()?;
        Ok(io::copy(&mut input, out)?)
    }
}

impl Default for SpoolSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for SpoolSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Backing::File {
            writer: Some(writer),
            ..
        } = &mut self.backing
        {
            writer.flush()?;
        }
        self.run_callbacks(|cb, sink| cb.on_flush(sink));
        Ok(())
    }
}

impl Drop for SpoolSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close spool");
        }
    }
}

/// Pin that keeps a spill file alive; see [`SpoolSink::hold`].
///
/// Dropping an unreleased pin releases it.
pub struct SpoolHold {
    pins: Arc<Pins>,
    released: bool,
}

impl SpoolHold {
    /// Release the pin, deleting the file if this was the last thing keeping it.
    pub fn release(mut self) {
        self.release_pin();
    }

    fn release_pin(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.pins.lock();
        state.holds = state.holds.saturating_sub(1);
        Pins::maybe_delete(&mut state);
    }
}

impl Drop for SpoolHold {
    fn drop(&mut self) {
        self.release_pin();
    }
}

enum InputInner {
    Memory(Cursor<Arc<[u8]>>),
    File {
        reader: BufReader<File>,
        path: PathBuf,
        consumed: u64,
        pins: Arc<Pins>,
    },
}

/// Independent reader over a finished [`SpoolSink`].
pub struct SpoolInput {
    inner: InputInner,
}

impl SpoolInput {
    fn memory(bytes: Arc<[u8]>) -> Self {
        Self {
            inner: InputInner::Memory(Cursor::new(bytes)),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.inner, InputInner::Memory(_))
    }

    /// Backing file, if the content lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner {
            InputInner::Memory(_) => None,
            InputInner::File { path, .. } => Some(path),
        }
    }

    /// Move the unread content to `dest`.
    ///
    /// An untouched input that is the only user of a closed spool renames the
    /// temp file; anything else is copied.
    pub fn transfer_to(mut self, dest: &Path) -> Result<()> {
        if let InputInner::File {
            consumed: 0, pins, ..
        } = &self.inner
        {
            let mut state = pins.lock();
            if state.closed && state.holds == 0 && state.readers == 1 {
                if let Some(temp) = state.file.take() {
                    match temp.persist(dest) {
                        Ok(()) => {
                            debug!(dest = %dest.display(), "Moved spool file");
                            return Ok(());
                        }
                        Err(e) => {
                            debug!(error = %e.error, "Rename failed, copying instead");
                            state.file = Some(e.path);
                        }
                    }
                }
            }
        }
        let mut out = File::create(dest).map_err(|e| MimeError::spool(dest, e))?;
        io::copy(&mut self, &mut out).map_err(|e| MimeError::spool(dest, e))?;
        Ok(())
    }
}

impl Read for SpoolInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            InputInner::Memory(cursor) => cursor.read(buf),
            InputInner::File {
                reader, consumed, ..
            } => {
                let n = reader.read(buf)?;
                *consumed += n as u64;
                Ok(n)
            }
        }
    }
}

impl Drop for SpoolInput {
    fn drop(&mut self) {
        if let InputInner::File { pins, .. } = &self.inner {
            let mut state = pins.lock();
            state.readers = state.readers.saturating_sub(1);
            Pins::maybe_delete(&mut state);
        }
    }
}
