use std::fmt;

use keel_core::error::{KeelError, Result};

/// Where a single change-set is in its lifecycle.
///
/// `Pending → Reading → Executing → Recording → Applied`, or `Failed` from
/// any non-terminal phase. There are no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Pending,
    Reading,
    Executing,
    Recording,
    Applied,
    Failed,
}

impl MigrationPhase {
    /// The phase that follows this one on success.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Reading),
            Self::Reading => Some(Self::Executing),
            Self::Executing => Some(Self::Recording),
            Self::Recording => Some(Self::Applied),
            Self::Applied | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    /// Move to `to`, rejecting anything but the next phase or `Failed`.
    pub fn advance(&mut self, to: MigrationPhase) -> Result<()> {
        let allowed = match to {
            Self::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        };

        if !allowed {
            return Err(KeelError::InvalidState(format!(
                "change-set cannot move from {} to {}",
                self, to
            )));
        }

        *self = to;
        Ok(())
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Reading => "reading",
            Self::Executing => "executing",
            Self::Recording => "recording",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
