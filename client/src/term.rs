use {
    blobcrypt_sdk::{
        batch::{BatchPrompt, OperationKind},
        conflict::ConflictChoice,
        progress::ProgressSink,
    },
    crossterm::{
        QueueableCommand, cursor,
        style::{Color, ResetColor, SetForegroundColor},
        terminal,
    },
    once_cell::sync::Lazy,
    parking_lot::{Mutex, RawMutex, lock_api::ArcMutexGuard},
    std::{
        fmt::{self, Display},
        io::{self, Stdout, Write},
        sync::Arc,
    },
    tracing::{Level, Subscriber, error, field::Visit},
    tracing_subscriber::Layer,
};

struct Term {
    stdout: Stdout,
    current_status: Option<String>,
}

fn term() -> ArcMutexGuard<RawMutex, Term> {
    static TERM: Lazy<Arc<Mutex<Term>>> = Lazy::new(|| Arc::new(Mutex::new(Term::new())));
    Mutex::lock_arc(&TERM)
}

/// Clears the status line when dropped.
#[must_use]
pub struct StatusGuard;

impl StatusGuard {
    #[inline]
    pub fn set(&self, status: impl Display) {
        let _ = term().set_status(status);
    }
}

impl Drop for StatusGuard {
    #[inline]
    fn drop(&mut self) {
        clear_status();
    }
}

#[inline]
pub fn set_status(status: impl Display) -> StatusGuard {
    let _ = term().set_status(status);
    StatusGuard
}

#[inline]
pub fn clear_status() {
    let _ = term().clear_status();
}

impl Term {
    fn new() -> Self {
        Self {
            stdout: io::stdout(),
            current_status: None,
        }
    }

    fn set_status(&mut self, status: impl Display) -> io::Result<()> {
        let status = status.to_string();
        if self.current_status.is_none() {
            self.stdout.queue(cursor::Hide)?;
            self.stdout.queue(terminal::DisableLineWrap)?;
        } else {
            self.stdout.queue(cursor::RestorePosition)?;
            self.stdout
                .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
        }
        self.stdout.queue(cursor::SavePosition)?;
        self.stdout.queue(SetForegroundColor(Color::DarkGreen))?;
        self.stdout.write_all(status.as_bytes())?;
        self.stdout.queue(ResetColor)?;
        self.stdout.queue(cursor::RestorePosition)?;
        self.stdout.flush()?;
        self.current_status = Some(status);
        Ok(())
    }

    fn clear_status(&mut self) -> io::Result<()> {
        if self.current_status.is_none() {
            return Ok(());
        }

        self.stdout.queue(cursor::RestorePosition)?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
        self.stdout.queue(terminal::EnableLineWrap)?;
        self.stdout.queue(cursor::Show)?;
        self.stdout.flush()?;

        self.current_status = None;
        Ok(())
    }

    fn write(&mut self, color: Option<Color>, text: impl Display) -> io::Result<()> {
        let old_status = self.current_status.clone();
        self.clear_status()?;
        if let Some(color) = color {
            self.stdout.queue(SetForegroundColor(color))?;
        }
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.stdout.write_all(text.as_bytes())?;
        if color.is_some() {
            self.stdout.queue(ResetColor)?;
        }
        if let Some(old_status) = old_status {
            self.set_status(old_status)?;
        }
        self.stdout.flush()
    }

    // The status line stays hidden until the next progress update.
    fn prompt(&mut self, question: &str) -> io::Result<()> {
        self.clear_status()?;
        self.stdout.queue(SetForegroundColor(Color::Yellow))?;
        self.stdout.write_all(question.as_bytes())?;
        self.stdout.queue(ResetColor)?;
        self.stdout.flush()
    }
}

/// Prints `question` and reads a trimmed, lowercased answer. `None` on end of input.
fn ask(question: &str) -> Option<String> {
    term().prompt(question).ok()?;
    let mut line = String::new();
    let len = io::stdin().read_line(&mut line).ok()?;
    if len == 0 {
        return None;
    }
    Some(line.trim().to_lowercase())
}

/// Asks the user on the terminal.
#[derive(Debug, Default)]
pub struct TermPrompt;

impl BatchPrompt for TermPrompt {
    #[inline]
    fn resolve_conflict(&mut self, item: &str) -> ConflictChoice {
        let question = format!(
            "{item} already exists. \
            [r]eplace, replace [a]ll, [s]kip, s[k]ip all or [c]ancel? "
        );
        loop {
            let Some(answer) = ask(&question) else {
                return ConflictChoice::Cancel;
            };
            match answer.as_str() {
                "r" => return ConflictChoice::Replace,
                "a" => return ConflictChoice::ReplaceAll,
                "s" => return ConflictChoice::Skip,
                "k" => return ConflictChoice::SkipAll,
                "c" => return ConflictChoice::Cancel,
                _ => {}
            }
        }
    }

    #[inline]
    fn continue_after_error(&mut self, item: &str, error: &anyhow::Error) -> bool {
        error!("{item}: {error:#}");
        loop {
            match ask("Continue with the remaining items? [y/n] ").as_deref() {
                Some("y") => return true,
                Some("n") | None => return false,
                Some(_) => {}
            }
        }
    }

    #[inline]
    fn report_error(&mut self, item: &str, error: &anyhow::Error) {
        error!("{item}: {error:#}");
    }
}

/// Shows the current item of a batch in the status line.
pub struct TermProgress {
    kind: OperationKind,
    labels: Vec<String>,
    status: StatusGuard,
}

impl TermProgress {
    #[inline]
    pub fn new(kind: OperationKind, labels: Vec<String>) -> Self {
        Self {
            status: set_status(format!("{kind}...")),
            kind,
            labels,
        }
    }
}

impl fmt::Debug for TermProgress {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermProgress")
            .field("kind", &self.kind)
            .field("items", &self.labels.len())
            .finish_non_exhaustive()
    }
}

impl ProgressSink for TermProgress {
    #[inline]
    fn on_progress(&mut self, unit: usize, fraction: f64) {
        let label = self.labels.get(unit).map_or("", String::as_str);
        self.status.set(format_args!(
            "{} {}/{} {label} {:.0}%",
            self.kind,
            unit.saturating_add(1),
            self.labels.len(),
            fraction * 100.0
        ));
    }
}

pub struct TermLayer;

impl<S: Subscriber> Layer<S> for TermLayer {
    #[inline]
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut message = String::new();
        let mut fields = Vec::new();
        event.record(&mut DebugVisitor(&mut message, &mut fields));
        if !fields.is_empty() {
            message = format!("{message} ({})", fields.join(", "));
        }
        let level = *event.metadata().level();
        let color = if level == Level::ERROR || level == Level::WARN {
            Some(Color::Red)
        } else if level == Level::INFO {
            None
        } else {
            Some(Color::Grey)
        };
        let _ = term().write(color, message);
    }

    #[inline]
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        metadata
            .module_path()
            .is_some_and(|path| path.starts_with("blobcrypt"))
    }
}

struct DebugVisitor<'a>(&'a mut String, &'a mut Vec<String>);

impl Visit for DebugVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        } else {
            self.1.push(format!("{} = {:?}", field.name(), value));
        }
    }
}
