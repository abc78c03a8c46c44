use crate::{
    error::{ModError, ModResult},
    status::StatusStore,
    toggle::{self, ModEnv, ModReport},
};

pub const CONFLICT_WARNING: &str =
    "Another mod is already enabled. Running several mods at once may break the game.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictChoice {
    Proceed,
    #[default]
    Abort,
    DisableOthers,
}

impl ConflictChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proceed" | "continue" | "p" => Some(ConflictChoice::Proceed),
            "abort" | "cancel" | "a" => Some(ConflictChoice::Abort),
            "disable-others" | "disable" | "d" => Some(ConflictChoice::DisableOthers),
            _ => None,
        }
    }
}

// `None` means the prompt was dismissed.
pub trait ConflictResolver {
    fn resolve(&mut self, target: &str, enabled: &[String]) -> Option<ConflictChoice>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedChoice(pub ConflictChoice);

impl ConflictResolver for FixedChoice {
    fn resolve(&mut self, _target: &str, _enabled: &[String]) -> Option<ConflictChoice> {
        Some(self.0)
    }
}

pub fn guard(
    env: &ModEnv,
    statuses: &mut StatusStore,
    target: &str,
    resolver: &mut dyn ConflictResolver,
    report: &mut ModReport,
) -> ModResult<()> {
    let enabled = statuses.enabled_except(target);
    if enabled.is_empty() {
        return Ok(());
    }

    match resolver.resolve(target, &enabled).unwrap_or_default() {
        ConflictChoice::Proceed => Ok(()),
        ConflictChoice::Abort => Err(ModError::UserCancelled),
        ConflictChoice::DisableOthers => {
            for other in enabled {
                match toggle::disable(env, statuses, &other) {
                    Ok(disabled) => {
                        report.absorb(disabled);
                        report.disabled_others.push(other);
                    }
                    Err(err) => report
                        .warnings
                        .push(format!("could not disable {other}: {err}")),
                }
            }
            Ok(())
        }
    }
}
