//! Choice resolution against the current flags.
//!
//! Both functions are pure: the same inputs always produce the same output and
//! neither touches the caller's flag store.

use crate::flags::FlagStore;
use crate::story::{Choice, Effects, Scene};

/// The choices of `scene` that are selectable under `flags`, in authored order.
pub fn resolve<'a>(scene: &'a Scene, flags: &FlagStore) -> Vec<&'a Choice> {
    scene
        .choices
        .iter()
        .filter(|choice| choice.is_available(flags))
        .collect()
}

/// A new flag store with `effects` applied over `flags`.
pub fn apply_effects(flags: &FlagStore, effects: &Effects) -> FlagStore {
    flags.with_effects(effects)
}
