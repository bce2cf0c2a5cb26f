use std::collections::BTreeSet;

use crate::bucket;
use crate::context::{Context, StableId};
use crate::error::{DefinitionError, PredicateError};
use crate::feature::FeatureId;
use crate::rule::{evaluation_order, Rule, TieBreak};
use crate::value::{FlagValue, ValueType};

pub const DEFAULT_SALT: &str = "v1";

/// A rule and the value it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub rule: Rule,
    pub value: FlagValue,
}

/// Why a flag resolved to its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// The flag is switched off; rules were not consulted.
    Inactive,
    /// A rule matched and admitted the context. `index` is the rule's
    /// position in declaration order.
    Rule { index: usize, note: Option<String> },
    /// No rule both matched and admitted the context.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: FlagValue,
    pub reason: Reason,
}

/// Immutable flag definition. Every bound value has the flag's type, and the
/// evaluation order of the rules is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDefinition {
    id: FeatureId,
    value_type: ValueType,
    default: FlagValue,
    salt: String,
    active: bool,
    allowlist: BTreeSet<StableId>,
    bounds: Vec<Bound>,
    order: Vec<usize>,
}

impl FlagDefinition {
    pub fn builder(id: FeatureId, default: impl Into<FlagValue>) -> FlagDefinitionBuilder {
        FlagDefinitionBuilder {
            id,
            default: default.into(),
            salt: DEFAULT_SALT.to_string(),
            active: true,
            allowlist: BTreeSet::new(),
            bounds: Vec::new(),
            tie_break: TieBreak::default(),
            order: None,
        }
    }

    /// A builder seeded with this definition, for producing a replacement.
    pub fn to_builder(&self) -> FlagDefinitionBuilder {
        FlagDefinitionBuilder {
            id: self.id.clone(),
            default: self.default.clone(),
            salt: self.salt.clone(),
            active: self.active,
            allowlist: self.allowlist.clone(),
            bounds: self.bounds.clone(),
            tie_break: TieBreak::default(),
            order: None,
        }
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn default_value(&self) -> &FlagValue {
        &self.default
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn allowlist(&self) -> &BTreeSet<StableId> {
        &self.allowlist
    }

    /// Bounds in declaration order.
    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    /// Declaration indices of the bounds in evaluation order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// `(declaration index, bound)` pairs in evaluation order.
    pub fn ordered_bounds(&self) -> impl Iterator<Item = (usize, &Bound)> {
        self.order.iter().map(move |&i| (i, &self.bounds[i]))
    }

    pub fn evaluate(&self, context: &Context) -> Result<FlagValue, PredicateError> {
        self.explain(context).map(|r| r.value)
    }

    pub fn explain(&self, context: &Context) -> Result<Resolution, PredicateError> {
        if !self.active {
            return Ok(Resolution {
                value: self.default.clone(),
                reason: Reason::Inactive,
            });
        }

        for (index, bound) in self.ordered_bounds() {
            if !bound.rule.matches(context)? {
                continue;
            }
            // a matched rule that does not admit falls through to less specific rules
            if self.admits(&bound.rule, context) {
                return Ok(Resolution {
                    value: bound.value.clone(),
                    reason: Reason::Rule {
                        index,
                        note: bound.rule.note_text().map(str::to_string),
                    },
                });
            }
        }

        Ok(Resolution {
            value: self.default.clone(),
            reason: Reason::Default,
        })
    }

    /// Rollout admission for a rule whose criteria already matched.
    pub fn admits(&self, rule: &Rule, context: &Context) -> bool {
        if let Some(id) = &context.stable_id {
            if rule.allowed_ids().contains(id) || self.allowlist.contains(id) {
                return true;
            }
        }
        bucket::is_in_rollout(
            &self.salt,
            &self.id,
            context.stable_id.as_ref(),
            rule.rollout_share(),
        )
    }
}

#[derive(Clone)]
pub struct FlagDefinitionBuilder {
    id: FeatureId,
    default: FlagValue,
    salt: String,
    active: bool,
    allowlist: BTreeSet<StableId>,
    bounds: Vec<Bound>,
    tie_break: TieBreak,
    order: Option<Vec<usize>>,
}

impl FlagDefinitionBuilder {
    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn allow(mut self, stable_id: StableId) -> Self {
        self.allowlist.insert(stable_id);
        self
    }

    pub fn allowlist<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = StableId>,
    {
        self.allowlist.extend(ids);
        self
    }

    pub fn rule(mut self, rule: Rule, value: impl Into<FlagValue>) -> Self {
        self.bounds.push(Bound {
            rule,
            value: value.into(),
        });
        self
    }

    pub fn clear_rules(mut self) -> Self {
        self.bounds.clear();
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Fixes the evaluation order instead of deriving it from the tie-break.
    /// `order` lists declaration indices and must keep more specific rules
    /// ahead of less specific ones.
    pub fn evaluation_order(mut self, order: Vec<usize>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn build(self) -> Result<FlagDefinition, DefinitionError> {
        let value_type = self.default.value_type();
        if !self.default.is_finite() {
            return Err(DefinitionError::NonFiniteValue { key: self.id });
        }
        for (index, bound) in self.bounds.iter().enumerate() {
            let found = bound.value.value_type();
            if found != value_type {
                return Err(DefinitionError::TypeMismatch {
                    key: self.id,
                    index,
                    expected: value_type,
                    found,
                });
            }
            if !bound.value.is_finite() {
                return Err(DefinitionError::NonFiniteValue { key: self.id });
            }
        }

        let order = match self.order {
            Some(order) => {
                if let Err(reason) = check_order(&order, &self.bounds) {
                    return Err(DefinitionError::InvalidOrder {
                        key: self.id,
                        reason,
                    });
                }
                order
            }
            None => evaluation_order(self.bounds.iter().map(|b| &b.rule), self.tie_break),
        };
        Ok(FlagDefinition {
            id: self.id,
            value_type,
            default: self.default,
            salt: self.salt,
            active: self.active,
            allowlist: self.allowlist,
            bounds: self.bounds,
            order,
        })
    }
}

fn check_order(order: &[usize], bounds: &[Bound]) -> Result<(), String> {
    if order.len() != bounds.len() {
        return Err(format!("{} positions for {} rules", order.len(), bounds.len()));
    }
    let mut seen = vec![false; bounds.len()];
    for &index in order {
        match seen.get_mut(index) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => return Err(format!("rule {index} is listed twice")),
            None => return Err(format!("rule {index} does not exist")),
        }
    }
    let widening = order
        .windows(2)
        .any(|pair| bounds[pair[0]].rule.specificity() < bounds[pair[1]].rule.specificity());
    if widening {
        return Err("a less specific rule is ordered ahead of a more specific one".to_string());
    }
    Ok(())
}
