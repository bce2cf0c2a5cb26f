use flagsnap_lib::FlagDefinition;

use super::LintWarning;

/// A 0% rule with no allowlist on either level can never resolve.
pub fn check(def: &FlagDefinition) -> Vec<LintWarning> {
    let mut warnings = Vec::new();
    for (index, bound) in def.bounds().iter().enumerate() {
        let rule = &bound.rule;
        if rule.rollout_share().threshold() == 0
            && rule.allowed_ids().is_empty()
            && def.allowlist().is_empty()
        {
            warnings.push(LintWarning::warn(format!(
                "{}: rule {} has a 0% rollout and no allowlist, it never applies",
                def.id(),
                index
            )));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use flagsnap_lib::{FeatureId, Rollout, Rule, StableId};

    use super::*;

    fn id() -> FeatureId {
        "feature::global::darkMode".parse().unwrap()
    }

    #[test]
    fn test_zero_rollout_is_reported() {
        let def = FlagDefinition::builder(id(), false)
            .rule(Rule::new().platform("IOS").rollout(Rollout::NONE), true)
            .build()
            .unwrap();
        let warnings = check(&def);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("rule 0"));
    }

    #[test]
    fn test_allowlist_only_rule_is_fine() {
        let def = FlagDefinition::builder(id(), false)
            .rule(
                Rule::new()
                    .rollout(Rollout::NONE)
                    .allow(StableId::of("qa-device")),
                true,
            )
            .build()
            .unwrap();
        assert!(check(&def).is_empty());
    }

    #[test]
    fn test_rounds_to_zero() {
        // 0.004% rounds to a threshold of 0
        let def = FlagDefinition::builder(id(), false)
            .rule(Rule::new().rollout(Rollout::new(0.004).unwrap()), true)
            .build()
            .unwrap();
        assert_eq!(check(&def).len(), 1);
    }
}
