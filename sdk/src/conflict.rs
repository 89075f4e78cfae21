use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Initial state of the conflict resolver for each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Prompt for every conflict until a sticky choice is made.
    #[default]
    Ask,
    ReplaceAll,
    SkipAll,
}

/// Answer to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Replace,
    ReplaceAll,
    Skip,
    SkipAll,
    Cancel,
}

impl fmt::Display for ConflictChoice {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::ReplaceAll => "replace all",
            Self::Skip => "skip",
            Self::SkipAll => "skip all",
            Self::Cancel => "cancel",
        })
    }
}

/// What to do with the conflicting item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Replace,
    Skip,
    /// Abort the rest of the batch.
    Cancel,
}

/// Per-batch conflict state. Sticky choices apply to every later conflict in the batch.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    state: ConflictPolicy,
}

impl ConflictResolver {
    #[must_use]
    #[inline]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { state: policy }
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> ConflictPolicy {
        self.state
    }

    #[inline]
    pub fn resolve(&mut self, prompt: impl FnOnce() -> ConflictChoice) -> Resolution {
        match self.state {
            ConflictPolicy::ReplaceAll => Resolution::Replace,
            ConflictPolicy::SkipAll => Resolution::Skip,
            ConflictPolicy::Ask => match prompt() {
                ConflictChoice::Replace => Resolution::Replace,
                ConflictChoice::ReplaceAll => {
                    self.state = ConflictPolicy::ReplaceAll;
                    Resolution::Replace
                }
                ConflictChoice::Skip => Resolution::Skip,
                ConflictChoice::SkipAll => {
                    self.state = ConflictPolicy::SkipAll;
                    Resolution::Skip
                }
                ConflictChoice::Cancel => Resolution::Cancel,
            },
        }
    }
}
