//! Element catalog: every bindable point of a scheme.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::SchemeError;

/// Decimal places used for float elements that do not set `precision`.
pub const DEFAULT_PRECISION: usize = 4;

/// Accepted write values for `bool` elements without an explicit `enum`.
pub const BOOL_CHOICES: [&str; 6] = ["true", "false", "True", "False", "0", "1"];

/// Value type of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[default]
    Text,
    Int,
    Float,
    Bool,
}

impl ElementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }
}

/// A compiled regular expression that remembers its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, SchemeError> {
        let regex = Regex::new(source).map_err(|err| {
            SchemeError::InvalidConfig(format!("invalid pattern '{source}': {err}").into())
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Unanchored search, the same way a browser `RegExp.test` behaves.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// One ordered predicate -> presentation entry of an element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleRule {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Pattern>,
    pub fill: Option<String>,
    pub opacity: Option<f64>,
    pub style: Option<String>,
    pub text: Option<String>,
}

impl StyleRule {
    #[must_use]
    pub fn has_bounds(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// Immutable catalog record for one bound element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub svg_id: SmolStr,
    pub data_module: SmolStr,
    pub data_id: SmolStr,
    pub kind: ElementKind,
    pub write: bool,
    /// Push (change-of-value) subscription instead of polling.
    pub cov: bool,
    /// Polled with its own `get` instead of the module batch.
    pub single: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub choices: Vec<String>,
    pub pattern: Option<Pattern>,
    pub precision: usize,
    /// Value -> display label.
    pub map: IndexMap<String, String>,
    pub rules: Vec<StyleRule>,
}

impl Element {
    /// Plain text element with no constraints, no rules and polling enabled.
    #[must_use]
    pub fn new(svg_id: &str, data_module: &str, data_id: &str) -> Self {
        Self {
            svg_id: SmolStr::new(svg_id),
            data_module: SmolStr::new(data_module),
            data_id: SmolStr::new(data_id),
            kind: ElementKind::Text,
            write: false,
            cov: false,
            single: false,
            min: None,
            max: None,
            choices: Vec::new(),
            pattern: None,
            precision: DEFAULT_PRECISION,
            map: IndexMap::new(),
            rules: Vec::new(),
        }
    }

    /// Label shown for a value, falling back to the value itself.
    #[must_use]
    pub fn label<'a>(&'a self, value: &'a str) -> &'a str {
        self.map.get(value).map_or(value, String::as_str)
    }
}

/// Read-only set of elements for one scheme.
#[derive(Debug, Clone)]
pub struct Catalog {
    scheme_id: SmolStr,
    scheme_name: String,
    svg_path: Option<PathBuf>,
    interval: Duration,
    elements: Vec<Element>,
    by_key: HashMap<SmolStr, HashMap<SmolStr, usize>>,
}

impl Catalog {
    /// Builds a catalog, enforcing that `(data_module, data_id)` is unique.
    pub fn new(
        scheme_id: &str,
        interval: Duration,
        elements: Vec<Element>,
    ) -> Result<Self, SchemeError> {
        if interval.is_zero() {
            return Err(SchemeError::InvalidConfig(
                format!("scheme '{scheme_id}': interval must be greater than zero").into(),
            ));
        }
        let mut by_key: HashMap<SmolStr, HashMap<SmolStr, usize>> = HashMap::new();
        for (index, element) in elements.iter().enumerate() {
            for (field, value) in [
                ("svg_id", &element.svg_id),
                ("data_module", &element.data_module),
                ("data_id", &element.data_id),
            ] {
                if value.trim().is_empty() {
                    return Err(SchemeError::InvalidConfig(
                        format!("scheme '{scheme_id}': element #{index} has an empty {field}")
                            .into(),
                    ));
                }
            }
            let ids = by_key.entry(element.data_module.clone()).or_default();
            if ids.insert(element.data_id.clone(), index).is_some() {
                return Err(SchemeError::DuplicateElement {
                    data_module: element.data_module.clone(),
                    data_id: element.data_id.clone(),
                });
            }
        }
        Ok(Self {
            scheme_id: SmolStr::new(scheme_id),
            scheme_name: scheme_id.to_string(),
            svg_path: None,
            interval,
            elements,
            by_key,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.scheme_name = name.into();
        self
    }

    #[must_use]
    pub fn with_svg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.svg_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn scheme_id(&self) -> &str {
        &self.scheme_id
    }

    #[must_use]
    pub fn scheme_name(&self) -> &str {
        &self.scheme_name
    }

    #[must_use]
    pub fn svg_path(&self) -> Option<&Path> {
        self.svg_path.as_deref()
    }

    /// Poll period shared by every module of the scheme.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn lookup(&self, data_module: &str, data_id: &str) -> Option<&Element> {
        let index = *self.by_key.get(data_module)?.get(data_id)?;
        self.elements.get(index)
    }

    /// Element bound to `svg_id`; duplicates are reported instead of guessed.
    pub fn find_by_svg_id(&self, svg_id: &str) -> Result<&Element, SchemeError> {
        let mut matches = self
            .elements
            .iter()
            .filter(|element| element.svg_id == svg_id);
        let first = matches
            .next()
            .ok_or_else(|| SchemeError::UnknownElement(SmolStr::new(svg_id)))?;
        if matches.next().is_some() {
            return Err(SchemeError::AmbiguousElement(SmolStr::new(svg_id)));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(elements: Vec<Element>) -> Result<Catalog, SchemeError> {
        Catalog::new("boiler", Duration::from_secs(5), elements)
    }

    #[test]
    fn lookup_uses_module_and_id() {
        let catalog = catalog(vec![
            Element::new("t1", "plc1", "temp"),
            Element::new("t2", "plc2", "temp"),
        ])
        .expect("catalog");
        assert_eq!(
            catalog.lookup("plc2", "temp").map(|el| el.svg_id.as_str()),
            Some("t2")
        );
        assert!(catalog.lookup("plc3", "temp").is_none());
        assert!(catalog.lookup("plc1", "pressure").is_none());
    }

    #[test]
    fn duplicate_module_and_id_is_rejected() {
        let err = catalog(vec![
            Element::new("a", "plc1", "temp"),
            Element::new("b", "plc1", "temp"),
        ])
        .expect_err("duplicate");
        assert_eq!(
            err,
            SchemeError::DuplicateElement {
                data_module: "plc1".into(),
                data_id: "temp".into(),
            }
        );
    }

    #[test]
    fn empty_ids_and_zero_interval_are_rejected() {
        assert!(catalog(vec![Element::new("", "plc1", "temp")]).is_err());
        assert!(Catalog::new("boiler", Duration::ZERO, Vec::new()).is_err());
    }

    #[test]
    fn svg_lookup_reports_missing_and_ambiguous() {
        let catalog = catalog(vec![
            Element::new("pump", "plc1", "run"),
            Element::new("pump", "plc1", "fault"),
            Element::new("valve", "plc1", "open"),
        ])
        .expect("catalog");
        assert_eq!(
            catalog.find_by_svg_id("valve").map(|el| el.data_id.as_str()),
            Ok("open")
        );
        assert_eq!(
            catalog.find_by_svg_id("pump").map(|_| ()),
            Err(SchemeError::AmbiguousElement("pump".into()))
        );
        assert_eq!(
            catalog.find_by_svg_id("fan").map(|_| ()),
            Err(SchemeError::UnknownElement("fan".into()))
        );
    }

    #[test]
    fn label_prefers_map_entry() {
        let mut element = Element::new("mode", "plc1", "mode");
        element.map.insert("1".into(), "AUTO".into());
        assert_eq!(element.label("1"), "AUTO");
        assert_eq!(element.label("2"), "2");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(matches!(
            Pattern::new("(unclosed"),
            Err(SchemeError::InvalidConfig(_))
        ));
        assert!(Pattern::new("^ON$").expect("pattern").is_match("ON"));
    }
}
