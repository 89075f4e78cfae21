//! Sequential execution of multi-file commands.

use {
    crate::{
        conflict::{ConflictChoice, ConflictPolicy, ConflictResolver, Resolution},
        progress::{CancelFlag, ProgressSink},
    },
    anyhow::Result,
    blobcrypt_format::ErrorKind,
    derive_more::Display,
    std::fmt,
    tracing::{info, warn},
};

/// Decisions delegated to the user.
pub trait BatchPrompt: Send {
    /// `item` collides with an existing entry or file.
    fn resolve_conflict(&mut self, item: &str) -> ConflictChoice;

    /// Processing `item` failed and more items remain. Returns `true` to continue.
    fn continue_after_error(&mut self, item: &str, error: &anyhow::Error) -> bool;

    /// Processing the last item of the batch failed.
    fn report_error(&mut self, item: &str, error: &anyhow::Error);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OperationKind {
    #[display("add")]
    Add,
    #[display("extract")]
    Extract,
    #[display("validate")]
    Validate,
    #[display("delete")]
    Delete,
}

/// Result of processing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Done,
    Skipped,
    /// The item was checked and rejected; the batch goes on without asking.
    Invalid,
    /// Stop the batch.
    Cancelled,
}

/// Collaborators of a batch command.
pub struct BatchOptions<'a> {
    pub prompt: &'a mut dyn BatchPrompt,
    pub progress: &'a mut dyn ProgressSink,
    pub cancel: CancelFlag,
    pub conflict_policy: ConflictPolicy,
}

/// Per-item view of the batch state passed to the operation.
pub struct ItemContext<'a> {
    pub unit: usize,
    pub progress: &'a mut dyn ProgressSink,
    pub cancel: &'a CancelFlag,
    resolver: &'a mut ConflictResolver,
    prompt: &'a mut dyn BatchPrompt,
}

impl ItemContext<'_> {
    /// Applies the batch's conflict state, prompting if it isn't sticky yet.
    #[inline]
    pub fn resolve_conflict(&mut self, item: &str) -> Resolution {
        let prompt = &mut *self.prompt;
        self.resolver.resolve(|| prompt.resolve_conflict(item))
    }
}

#[derive(Debug, Clone)]
pub struct FailedItem {
    pub index: usize,
    pub item: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub kind: OperationKind,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    /// Indices of items with [`ItemOutcome::Invalid`].
    pub invalid: Vec<usize>,
    pub failed: Vec<FailedItem>,
    /// Stopped by cancellation (flag, interrupt or a conflict prompt).
    pub cancelled: bool,
    /// Stopped because the user declined to continue after an error.
    pub aborted: bool,
}

impl BatchSummary {
    fn new(kind: OperationKind, total: usize) -> Self {
        Self {
            kind,
            total,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            invalid: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
            aborted: false,
        }
    }

    #[must_use]
    #[inline]
    pub fn failed_count(&self) -> usize {
        self.invalid.len().saturating_add(self.failed.len())
    }
}

impl fmt::Display for BatchSummary {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: processed {}, {} failed",
            self.kind,
            self.processed,
            self.failed_count()
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        } else if self.aborted {
            write!(f, " (aborted)")?;
        }
        Ok(())
    }
}

/// Runs `operation` for each item in order.
///
/// Cancellation stops the batch silently. Other errors are recorded; the user is
/// asked whether to continue unless the failed item is the last one.
#[inline]
pub fn run_batch<T>(
    kind: OperationKind,
    items: &[T],
    options: BatchOptions<'_>,
    label: impl Fn(&T) -> String,
    mut operation: impl FnMut(&T, &mut ItemContext<'_>) -> Result<ItemOutcome>,
) -> BatchSummary {
    let BatchOptions {
        prompt,
        progress,
        cancel,
        conflict_policy,
    } = options;
    let mut resolver = ConflictResolver::new(conflict_policy);
    let mut summary = BatchSummary::new(kind, items.len());

    for (index, item) in items.iter().enumerate() {
        if cancel.is_raised() {
            summary.cancelled = true;
            break;
        }
        progress.on_progress(index, 0.0);
        let mut context = ItemContext {
            unit: index,
            progress: &mut *progress,
            cancel: &cancel,
            resolver: &mut resolver,
            prompt: &mut *prompt,
        };
        let result = operation(item, &mut context);
        match result {
            Ok(ItemOutcome::Done) => {
                summary.processed = summary.processed.saturating_add(1);
                summary.succeeded = summary.succeeded.saturating_add(1);
                progress.on_progress(index, 1.0);
            }
            Ok(ItemOutcome::Skipped) => {
                summary.processed = summary.processed.saturating_add(1);
                summary.skipped = summary.skipped.saturating_add(1);
            }
            Ok(ItemOutcome::Invalid) => {
                summary.processed = summary.processed.saturating_add(1);
                summary.invalid.push(index);
            }
            Ok(ItemOutcome::Cancelled) => {
                summary.cancelled = true;
                break;
            }
            Err(err) if ErrorKind::of(&err) == ErrorKind::Cancelled => {
                summary.cancelled = true;
                break;
            }
            Err(err) => {
                summary.processed = summary.processed.saturating_add(1);
                let item_label = label(item);
                warn!("{kind} failed for {item_label}: {err:?}");
                summary.failed.push(FailedItem {
                    index,
                    item: item_label.clone(),
                    kind: ErrorKind::of(&err),
                    message: format!("{err:#}"),
                });
                if index.saturating_add(1) == items.len() {
                    prompt.report_error(&item_label, &err);
                } else if !prompt.continue_after_error(&item_label, &err) {
                    summary.aborted = true;
                    break;
                }
            }
        }
    }
    info!("{summary}");
    summary
}
