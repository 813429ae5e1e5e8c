use enumset::{EnumSet, EnumSetType, enum_set};
use serde::{Deserialize, Serialize};

/// Single evaluation bit. Processes receive an [`EvalMode`] combining these.
#[derive(EnumSetType, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeFlag {
    /// Return the current state without mutating anything.
    IsState,
    /// Mutate the environment until it matches the plug's meaning.
    TargetState,
    /// Fail with a dirty report instead of performing a mutation.
    DirtyCheck,
}

pub type EvalMode = EnumSet<ModeFlag>;

pub const QUERY: EvalMode = enum_set!(ModeFlag::IsState);
pub const MAKE: EvalMode = enum_set!(ModeFlag::IsState | ModeFlag::TargetState);
pub const DIRTY: EvalMode = enum_set!(ModeFlag::IsState | ModeFlag::DirtyCheck);

pub trait EvalModeExt {
    fn is_state(&self) -> bool;
    fn target_state(&self) -> bool;
    fn dirty_check(&self) -> bool;
}

impl EvalModeExt for EvalMode {
    fn is_state(&self) -> bool {
        self.contains(ModeFlag::IsState)
    }

    fn target_state(&self) -> bool {
        self.contains(ModeFlag::TargetState)
    }

    fn dirty_check(&self) -> bool {
        self.contains(ModeFlag::DirtyCheck)
    }
}

/// Parses `query`, `make`, `dirty` or a `|` separated list of flag names.
pub fn parse_eval_mode(raw: &str) -> Option<EvalMode> {
    match raw.trim() {
        "query" => return Some(QUERY),
        "make" => return Some(MAKE),
        "dirty" => return Some(DIRTY),
        _ => {}
    }
    let mut mode = EvalMode::empty();
    for part in raw.split('|').map(str::trim) {
        let flag = match part {
            "is_state" => ModeFlag::IsState,
            "target_state" => ModeFlag::TargetState,
            "dirty_check" => ModeFlag::DirtyCheck,
            _ => return None,
        };
        mode.insert(flag);
    }
    Some(mode)
}

pub fn describe_eval_mode(mode: EvalMode) -> String {
    let names: Vec<&str> = mode
        .iter()
        .map(|flag| match flag {
            ModeFlag::IsState => "is_state",
            ModeFlag::TargetState => "target_state",
            ModeFlag::DirtyCheck => "dirty_check",
        })
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join("|")
    }
}
