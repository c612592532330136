use serde::{Deserialize, Serialize};

/// Pipeline stages in their fixed execution order.
///
/// `Raw` and `Categorize` run upstream (extraction and category
/// standardization); the remaining four are the consolidation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Raw,
    Categorize,
    Relate,
    Merge,
    Evolve,
    Track,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Raw,
        Stage::Categorize,
        Stage::Relate,
        Stage::Merge,
        Stage::Evolve,
        Stage::Track,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Stage::Raw => "raw",
            Stage::Categorize => "categorize",
            Stage::Relate => "relate",
            Stage::Merge => "merge",
            Stage::Evolve => "evolve",
            Stage::Track => "track",
        }
    }

    /// Stages that must be complete before this one may be marked complete.
    #[must_use]
    pub fn predecessors(self) -> &'static [Stage] {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        &Self::ALL[..idx]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
