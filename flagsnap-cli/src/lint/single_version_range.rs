use flagsnap_lib::{FlagDefinition, VersionRange};

use super::LintWarning;

pub fn check(def: &FlagDefinition) -> Vec<LintWarning> {
    let mut warnings = Vec::new();
    for (index, bound) in def.bounds().iter().enumerate() {
        if let VersionRange::Bounded { min, max } = bound.rule.range() {
            if min == max {
                warnings.push(LintWarning::warn(format!(
                    "{}: rule {} version range only admits {}",
                    def.id(),
                    index,
                    min
                )));
            }
        }
    }
    warnings
}
