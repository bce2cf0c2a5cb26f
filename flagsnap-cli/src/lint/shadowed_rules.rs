use std::collections::BTreeSet;

use flagsnap_lib::{FlagDefinition, Rule, VersionRange};

use super::LintWarning;

/// An empty set places no restriction, so it covers every other set.
fn set_covers(outer: &BTreeSet<String>, inner: &BTreeSet<String>) -> bool {
    outer.is_empty() || (!inner.is_empty() && inner.is_subset(outer))
}

fn range_covers(outer: VersionRange, inner: VersionRange) -> bool {
    let lower = match (outer.min(), inner.min()) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a <= b,
    };
    let upper = match (outer.max(), inner.max()) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a >= b,
    };
    lower && upper
}

/// Whether `earlier` resolves every context that reaches `later`.
fn shadows(earlier: &Rule, later: &Rule) -> bool {
    earlier.custom_predicate().is_none()
        && earlier.rollout_share().is_full()
        && set_covers(earlier.platform_set(), later.platform_set())
        && set_covers(earlier.locale_set(), later.locale_set())
        && range_covers(earlier.range(), later.range())
}

pub fn check(def: &FlagDefinition) -> Vec<LintWarning> {
    let ordered: Vec<_> = def.ordered_bounds().collect();
    let mut warnings = Vec::new();
    for (pos, (index, bound)) in ordered.iter().enumerate() {
        let shadowing = ordered[..pos]
            .iter()
            .find(|(_, earlier)| shadows(&earlier.rule, &bound.rule));
        if let Some((earlier_index, _)) = shadowing {
            warnings.push(LintWarning::error(format!(
                "{}: rule {} is unreachable, rule {} always applies first",
                def.id(),
                index,
                earlier_index
            )));
        }
    }
    warnings
}
