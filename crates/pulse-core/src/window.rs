use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a rate resolution, e.g. `"1s"` or `"60s"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A named window and the span its rate is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    id: WindowId,
    span: Duration,
}

impl WindowSpec {
    pub fn new(id: impl Into<WindowId>, span: Duration) -> Self {
        Self {
            id: id.into(),
            span,
        }
    }

    pub fn from_secs(id: &str, secs: u64) -> Self {
        Self::new(id, Duration::from_secs(secs))
    }

    pub fn id(&self) -> &WindowId {
        &self.id
    }

    pub fn span(&self) -> Duration {
        self.span
    }
}

/// The 1s / 5s / 60s resolutions served by default.
pub fn default_windows() -> Vec<WindowSpec> {
    vec![
        WindowSpec::from_secs("1s", 1),
        WindowSpec::from_secs("5s", 5),
        WindowSpec::from_secs("60s", 60),
    ]
}

/// Longest span among `windows`, or zero when empty.
pub fn longest_span(windows: &[WindowSpec]) -> Duration {
    windows
        .iter()
        .map(WindowSpec::span)
        .max()
        .unwrap_or(Duration::ZERO)
}
