//! Initial language derivation for a freshly loaded duel.
//!
//! Runs at most once per duel: a user's in-progress language choice is
//! never clobbered by later server pushes (the session guards every call
//! site with its language-set flag).

use duel_proto::{Problem, SupportedLanguage};

const PREFERRED_LANGUAGE: &str = "python";

/// Picks the starting language for a problem.
///
/// Intersects the problem's starter-code templates with the supported
/// reference set, preferring python, else the first template the backend
/// supports. A problem with no templates falls back to python from the
/// reference set, else the first supported entry.
pub fn derive_initial_language(
    problem: &Problem,
    supported: &[SupportedLanguage],
) -> Option<SupportedLanguage> {
    if supported.is_empty() {
        return None;
    }

    let available: Vec<&SupportedLanguage> = supported
        .iter()
        .filter(|language| problem.starter_code.contains_key(&language.id))
        .collect();

    if !available.is_empty() {
        return available
            .iter()
            .find(|language| language.id == PREFERRED_LANGUAGE)
            .or_else(|| available.first())
            .map(|language| (*language).clone());
    }

    supported
        .iter()
        .find(|language| language.id == PREFERRED_LANGUAGE)
        .or_else(|| supported.first())
        .cloned()
}
