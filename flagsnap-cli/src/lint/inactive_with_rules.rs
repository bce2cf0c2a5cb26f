use flagsnap_lib::FlagDefinition;

use super::LintWarning;

pub fn check(def: &FlagDefinition) -> Vec<LintWarning> {
    if def.is_active() || def.bounds().is_empty() {
        return Vec::new();
    }
    vec![LintWarning::warn(format!(
        "{} is inactive but still carries {} rules",
        def.id(),
        def.bounds().len()
    ))]
}
