use {
    crate::crypto::BLOCK_SIZE,
    blobcrypt_format::ArchiveError,
    std::{
        io::{self, Read},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    },
};

/// Receives progress of long-running commands.
///
/// `unit` is the index of the item in the current batch; `fraction` is in `0.0..=1.0`.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, unit: usize, fraction: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn on_progress(&mut self, _unit: usize, _fraction: f64) {}
}

/// Cooperative cancellation flag shared between a command and its initiator.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn check(&self) -> Result<(), ArchiveError> {
        if self.is_raised() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Reports how much of the input has been read, roughly once per block.
///
/// Reading fails with [`ArchiveError::Cancelled`] once the flag is raised.
pub struct ProgressReader<'a, R> {
    inner: R,
    unit: usize,
    total: u64,
    done: u64,
    reported_blocks: u64,
    sink: &'a mut dyn ProgressSink,
    cancel: &'a CancelFlag,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    #[inline]
    pub fn new(
        inner: R,
        unit: usize,
        total: u64,
        sink: &'a mut dyn ProgressSink,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            inner,
            unit,
            total,
            done: 0,
            reported_blocks: 0,
            sink,
            cancel,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancel.check().map_err(ArchiveError::into_io)?;
        let len = self.inner.read(buf)?;
        self.done = self.done.saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
        let block_size = u64::try_from(BLOCK_SIZE).unwrap_or(u64::MAX);
        let blocks = self.done / block_size;
        if blocks > self.reported_blocks && self.total > 0 {
            self.reported_blocks = blocks;
            #[expect(clippy::as_conversions, reason = "progress ratio")]
            let fraction = (self.done as f64 / self.total as f64).min(1.0);
            self.sink.on_progress(self.unit, fraction);
        }
        Ok(len)
    }
}
