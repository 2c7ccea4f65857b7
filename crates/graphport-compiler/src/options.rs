use std::fmt;

use graphport_ir::CategorySentinels;
use serde::{Deserialize, Serialize};

/// Code generation aggressiveness, `0..=3`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptLevel {
    /// One slot per value, nothing released early.
    #[default]
    O0,
    /// Release dead values after their last use.
    O1,
    /// O1 plus sharing of identical constant tables.
    O2,
    O3,
}

impl OptLevel {
    pub fn frees_dead_values(self) -> bool {
        self >= OptLevel::O1
    }

    pub fn dedups_constants(self) -> bool {
        self >= OptLevel::O2
    }
}

impl TryFrom<u8> for OptLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(OptLevel::O0),
            1 => Ok(OptLevel::O1),
            2 => Ok(OptLevel::O2),
            3 => Ok(OptLevel::O3),
            other => Err(format!("optimization level must be 0-3, got {other}")),
        }
    }
}

impl From<OptLevel> for u8 {
    fn from(level: OptLevel) -> Self {
        level as u8
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", u8::from(*self))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub opt_level: OptLevel,
    /// Log each phase at `info` and dump the generated program at `debug`.
    pub verbose: bool,
    /// Replace an existing artifact at the destination.
    pub overwrite: bool,
    pub sentinels: CategorySentinels,
    /// Inference pass budget; `None` is one more than the node count.
    pub max_inference_passes: Option<usize>,
}

impl CompileOptions {
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_level_rejects_out_of_range() {
        assert!(OptLevel::try_from(4).is_err());
        let opts: CompileOptions = serde_json::from_str(r#"{"opt_level": 2}"#).unwrap();
        assert_eq!(opts.opt_level, OptLevel::O2);
        assert!(opts.opt_level.dedups_constants());
        assert!(serde_json::from_str::<CompileOptions>(r#"{"opt_level": 9}"#).is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let opts: CompileOptions =
            serde_json::from_str(r#"{"sentinels": {"missing_int": 0}}"#).unwrap();
        assert_eq!(opts.opt_level, OptLevel::O0);
        assert!(!opts.overwrite);
        assert_eq!(opts.sentinels.missing_int, 0);
        assert_eq!(opts.sentinels.missing_string, "_Unused");
    }
}
