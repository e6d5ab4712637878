use std::collections::BTreeSet;

use anyhow::Result;

use crate::error::MigrationError;
use crate::services::{ALWAYS_AVAILABLE_KEY, PathLevel};

/// Expands per-level, per-language alias path data into every concrete path
/// consistent with it.
///
/// A level carrying only the [`ALWAYS_AVAILABLE_KEY`] entry contributes that
/// single element; any other level contributes each of its translations.
/// The result is the cartesian product of the levels in order, joined by `/`.
pub fn combine(path_data: &[PathLevel]) -> Result<BTreeSet<String>> {
    let mut levels = path_data.iter().rev();
    let Some(last) = levels.next() else {
        return Err(MigrationError::InvalidArgument(
            "alias path data must contain at least one level".to_string(),
        )
        .into());
    };

    let mut suffixes = level_candidates(last);
    for level in levels {
        let heads = level_candidates(level);
        let mut combined = BTreeSet::new();
        for head in &heads {
            for suffix in &suffixes {
                combined.insert(format!("{head}/{suffix}"));
            }
        }
        suffixes = combined;
    }
    Ok(suffixes)
}

fn level_candidates(level: &PathLevel) -> BTreeSet<String> {
    if level.len() == 1 {
        if let Some(element) = level.get(ALWAYS_AVAILABLE_KEY) {
            return BTreeSet::from([element.clone()]);
        }
    }
    level.values().cloned().collect()
}
