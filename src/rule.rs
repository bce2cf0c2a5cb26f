use core::fmt;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::bucket::Rollout;
use crate::context::{Atom, Context, StableId};
use crate::error::PredicateError;
use crate::version::VersionRange;

/// Caller-supplied targeting criterion over the context, typically over its
/// custom attributes. An `Err` is surfaced as an evaluation error, never as a
/// silent non-match.
pub trait Predicate: Send + Sync + fmt::Debug {
    fn test(&self, context: &Context) -> Result<bool, PredicateError>;

    /// Contribution to the owning rule's specificity.
    fn specificity(&self) -> u32 {
        1
    }
}

/// [`Predicate`] backed by a closure.
pub struct FnPredicate<F> {
    name: String,
    specificity: u32,
    f: F,
}

pub fn predicate_fn<F>(name: impl Into<String>, f: F) -> FnPredicate<F>
where
    F: Fn(&Context) -> Result<bool, PredicateError> + Send + Sync,
{
    FnPredicate {
        name: name.into(),
        specificity: 1,
        f,
    }
}

impl<F> FnPredicate<F> {
    pub fn with_specificity(mut self, specificity: u32) -> Self {
        self.specificity = specificity;
        self
    }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate")
            .field("name", &self.name)
            .field("specificity", &self.specificity)
            .finish()
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Context) -> Result<bool, PredicateError> + Send + Sync,
{
    fn test(&self, context: &Context) -> Result<bool, PredicateError> {
        (self.f)(context)
    }

    fn specificity(&self) -> u32 {
        self.specificity
    }
}

/// Matches when a custom attribute is present and equal to `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEquals {
    pub key: String,
    pub value: Atom,
}

impl AttributeEquals {
    pub fn new(key: impl Into<String>, value: impl Into<Atom>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Predicate for AttributeEquals {
    fn test(&self, context: &Context) -> Result<bool, PredicateError> {
        Ok(context.attribute(&self.key) == Some(&self.value))
    }
}

/// One targeting rule. Every specified criterion must hold; within the
/// platform and locale sets any member matches. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    platforms: BTreeSet<String>,
    locales: BTreeSet<String>,
    version_range: VersionRange,
    predicate: Option<Arc<dyn Predicate>>,
    rollout: Rollout,
    note: Option<String>,
    allowlist: BTreeSet<StableId>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platforms.insert(platform.into());
        self
    }

    pub fn platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.extend(platforms.into_iter().map(Into::into));
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locales.insert(locale.into());
        self
    }

    pub fn locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locales.extend(locales.into_iter().map(Into::into));
        self
    }

    pub fn version_range(mut self, range: VersionRange) -> Self {
        self.version_range = range;
        self
    }

    pub fn predicate(mut self, predicate: impl Predicate + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn rollout(mut self, rollout: Rollout) -> Self {
        self.rollout = rollout;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
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

    pub fn platform_set(&self) -> &BTreeSet<String> {
        &self.platforms
    }

    pub fn locale_set(&self) -> &BTreeSet<String> {
        &self.locales
    }

    pub fn range(&self) -> VersionRange {
        self.version_range
    }

    pub fn custom_predicate(&self) -> Option<&Arc<dyn Predicate>> {
        self.predicate.as_ref()
    }

    pub fn rollout_share(&self) -> Rollout {
        self.rollout
    }

    pub fn note_text(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn allowed_ids(&self) -> &BTreeSet<StableId> {
        &self.allowlist
    }

    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if !self.platforms.is_empty() {
            score += 1;
        }
        if !self.locales.is_empty() {
            score += 1;
        }
        if self.version_range.is_bounded() {
            score += 1;
        }
        if let Some(p) = &self.predicate {
            score += p.specificity();
        }
        score
    }

    /// Whether the context satisfies every criterion. Rollout is not part of
    /// matching, see [`crate::flag::FlagDefinition::explain`].
    pub fn matches(&self, context: &Context) -> Result<bool, PredicateError> {
        if !self.platforms.is_empty() && !self.platforms.contains(&context.platform) {
            return Ok(false);
        }
        if !self.locales.is_empty() && !self.locales.contains(&context.locale) {
            return Ok(false);
        }
        if !self.version_range.contains(context.app_version) {
            return Ok(false);
        }
        match &self.predicate {
            Some(p) => run_predicate(p.as_ref(), context),
            None => Ok(true),
        }
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        let same_predicate = match (&self.predicate, &other.predicate) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_predicate
            && self.platforms == other.platforms
            && self.locales == other.locales
            && self.version_range == other.version_range
            && self.rollout == other.rollout
            && self.note == other.note
            && self.allowlist == other.allowlist
    }
}

fn run_predicate(predicate: &dyn Predicate, context: &Context) -> Result<bool, PredicateError> {
    match panic::catch_unwind(AssertUnwindSafe(|| predicate.test(context))) {
        Ok(result) => result,
        Err(payload) => Err(PredicateError::new(format!(
            "predicate {:?} panicked: {}",
            predicate,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Orders rules of equal specificity.
#[derive(Clone, Copy, Default)]
pub enum TieBreak {
    /// Lexicographically ascending by note, a missing note sorts as `""`.
    /// Equal notes keep declaration order.
    #[default]
    Note,
    DeclarationOrder,
    Custom(fn(&Rule, &Rule) -> Ordering),
}

impl TieBreak {
    pub fn compare(&self, a: &Rule, b: &Rule) -> Ordering {
        match self {
            TieBreak::Note => a
                .note
                .as_deref()
                .unwrap_or("")
                .cmp(b.note.as_deref().unwrap_or("")),
            TieBreak::DeclarationOrder => Ordering::Equal,
            TieBreak::Custom(cmp) => cmp(a, b),
        }
    }
}

impl fmt::Debug for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::Note => f.write_str("Note"),
            TieBreak::DeclarationOrder => f.write_str("DeclarationOrder"),
            TieBreak::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Indices of `rules` from most to least specific. The sort is stable, so
/// anything the tie-break leaves equal stays in declaration order.
pub fn evaluation_order<'a, I>(rules: I, tie_break: TieBreak) -> Vec<usize>
where
    I: IntoIterator<Item = &'a Rule>,
{
    let rules: Vec<&Rule> = rules.into_iter().collect();
    let mut order: Vec<usize> = (0..rules.len()).collect();
    order.sort_by(|&a, &b| {
        rules[b]
            .specificity()
            .cmp(&rules[a].specificity())
            .then_with(|| tie_break.compare(rules[a], rules[b]))
    });
    order
}
