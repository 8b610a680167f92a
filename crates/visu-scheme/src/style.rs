//! Style rule selection and value formatting.
//!
//! Rules are evaluated in catalog order and the first one whose predicate
//! holds decides the presentation. A rule without numeric bounds matches by
//! pattern; a rule with neither bounds nor pattern matches everything.
//! Numeric bounds are inclusive on both ends. A value sitting exactly on a
//! boundary shared by two adjacent ranges resolves to the later one.

use std::borrow::Cow;

use crate::catalog::{Element, ElementKind, StyleRule};

/// Placeholder in a rule `text` template replaced by the value label.
pub const TEXT_PLACEHOLDER: &str = "%%";

/// Presentation changes for one visual target. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub fill: Option<String>,
    pub opacity: Option<f64>,
    /// Replaces the whole inline style of the target.
    pub style: Option<String>,
    pub text: Option<String>,
}

impl Effects {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill.is_none() && self.opacity.is_none() && self.style.is_none() && self.text.is_none()
    }
}

/// Parses a telemetry value as a number; `NaN` counts as not a number.
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| !number.is_nan())
}

fn pattern_holds(rule: &StyleRule, value: &str) -> bool {
    rule.pattern
        .as_ref()
        .is_none_or(|pattern| pattern.is_match(value))
}

#[must_use]
pub fn rule_matches(rule: &StyleRule, value: &str) -> bool {
    // bounds cannot reject a value that is not a number
    let Some(number) = parse_number(value).filter(|_| rule.has_bounds()) else {
        return pattern_holds(rule, value);
    };
    !(rule.min.is_some_and(|min| number < min) || rule.max.is_some_and(|max| number > max))
}

/// First rule of `element` satisfied by `value`.
///
/// When that rule only holds because the value equals its `max`, a later
/// rule starting at the same value takes over.
#[must_use]
pub fn resolve_rule<'a>(element: &'a Element, value: &str) -> Option<&'a StyleRule> {
    let position = element
        .rules
        .iter()
        .position(|rule| rule_matches(rule, value))?;
    let first = &element.rules[position];
    let Some(number) = parse_number(value).filter(|number| first.max == Some(*number)) else {
        return Some(first);
    };
    let later = element.rules[position + 1..]
        .iter()
        .find(|rule| rule.min == Some(number) && rule_matches(rule, value));
    Some(later.unwrap_or(first))
}

/// Value as displayed: floats are rounded to the element precision,
/// anything that does not parse is passed through untouched.
#[must_use]
pub fn format_value<'a>(element: &Element, value: &'a str) -> Cow<'a, str> {
    match element.kind {
        ElementKind::Float => match parse_number(value) {
            Some(number) => Cow::Owned(format!("{number:.prec$}", prec = element.precision)),
            None => Cow::Borrowed(value),
        },
        ElementKind::Text | ElementKind::Int | ElementKind::Bool => Cow::Borrowed(value),
    }
}

/// Effects for `value` on `element`, or `None` when no rule matches.
#[must_use]
pub fn resolve(element: &Element, value: &str) -> Option<Effects> {
    let rule = resolve_rule(element, value)?;
    let formatted = format_value(element, value);
    let label = element.label(&formatted);
    Some(Effects {
        fill: rule.fill.clone(),
        opacity: rule.opacity,
        style: rule.style.clone(),
        text: rule
            .text
            .as_ref()
            .map(|template| template.replacen(TEXT_PLACEHOLDER, label, 1)),
    })
}
