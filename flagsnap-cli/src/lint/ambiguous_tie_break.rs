use std::collections::BTreeSet;

use flagsnap_lib::{FlagDefinition, Rule, VersionRange};

use super::LintWarning;

fn sets_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.is_empty() || b.is_empty() || !a.is_disjoint(b)
}

fn ranges_overlap(a: VersionRange, b: VersionRange) -> bool {
    let lower = a.min().max(b.min());
    let upper = match (a.max(), b.max()) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    match (lower, upper) {
        (Some(lower), Some(upper)) => lower <= upper,
        _ => true,
    }
}

/// Whether some context could match both rules.
fn overlap(a: &Rule, b: &Rule) -> bool {
    sets_overlap(a.platform_set(), b.platform_set())
        && sets_overlap(a.locale_set(), b.locale_set())
        && ranges_overlap(a.range(), b.range())
}

/// Rules of equal specificity that can match the same context but resolve to
/// different values are ordered by the tie-break alone.
pub fn check(def: &FlagDefinition) -> Vec<LintWarning> {
    let bounds = def.bounds();
    let mut warnings = Vec::new();
    for (i, a) in bounds.iter().enumerate() {
        for (j, b) in bounds.iter().enumerate().skip(i + 1) {
            if a.rule.specificity() == b.rule.specificity()
                && a.value != b.value
                && overlap(&a.rule, &b.rule)
            {
                warnings.push(LintWarning::warn(format!(
                    "{}: rules {} and {} overlap at equal specificity, their order depends on the tie-break",
                    def.id(),
                    i,
                    j
                )));
            }
        }
    }
    warnings
}
