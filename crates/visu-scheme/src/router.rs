//! Routing of inbound values to visual targets.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use smol_str::SmolStr;
use tracing::trace;

use crate::catalog::Catalog;
use crate::error::SchemeError;
use crate::protocol::value_text;
use crate::style::{self, Effects};

/// Port to whatever draws the scheme.
pub trait Renderer {
    /// Handle to one drawable node.
    type Target;

    /// Target bound to `svg_id`, or `None` when it is not part of the current view.
    fn find_target(&self, svg_id: &str) -> Option<Self::Target>;

    fn apply_effects(&mut self, target: &Self::Target, effects: &Effects);
}

/// What happened to one routed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied,
    UnknownElement,
    MissingTarget,
    NoMatchingRule,
}

/// Maps `(data_module, data_id, value)` to exactly one visual target.
#[derive(Debug)]
pub struct ValueRouter<R> {
    catalog: Arc<Catalog>,
    renderer: R,
}

impl<R: Renderer> ValueRouter<R> {
    pub fn new(catalog: Arc<Catalog>, renderer: R) -> Self {
        Self { catalog, renderer }
    }

    pub fn route(&mut self, data_module: &str, data_id: &str, value: &Value) -> RouteOutcome {
        let Some(element) = self.catalog.lookup(data_module, data_id) else {
            trace!("dropping value for unknown id {data_module}/{data_id}");
            return RouteOutcome::UnknownElement;
        };
        let Some(target) = self.renderer.find_target(&element.svg_id) else {
            trace!("dropping value for {}: target not rendered", element.svg_id);
            return RouteOutcome::MissingTarget;
        };
        let text = value_text(value);
        let Some(effects) = style::resolve(element, &text) else {
            trace!("no style rule for '{text}' on {}", element.svg_id);
            return RouteOutcome::NoMatchingRule;
        };
        self.renderer.apply_effects(&target, &effects);
        RouteOutcome::Applied
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }
}

/// Presentation state of one SVG node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetState {
    /// Inline style properties in attribute order.
    pub properties: IndexMap<String, String>,
    pub text: Option<String>,
    pub updates: u64,
}

impl TargetState {
    #[must_use]
    pub fn style_attribute(&self) -> String {
        self.properties
            .iter()
            .map(|(name, value)| format!("{name}:{value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    fn apply(&mut self, effects: &Effects) {
        if let Some(fill) = &effects.fill {
            self.properties.insert("fill".into(), fill.clone());
        }
        if let Some(opacity) = effects.opacity {
            self.properties.insert("opacity".into(), opacity.to_string());
        }
        if let Some(style) = &effects.style {
            self.properties = parse_style(style);
        }
        if let Some(text) = &effects.text {
            self.text = Some(text.clone());
        }
        self.updates += 1;
    }
}

fn parse_style(style: &str) -> IndexMap<String, String> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// In-memory renderer whose targets are the `id`s of an SVG document.
#[derive(Debug, Clone, Default)]
pub struct SvgScene {
    targets: IndexMap<SmolStr, TargetState>,
}

impl SvgScene {
    pub fn from_svg(text: &str) -> Result<Self, SchemeError> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let document = roxmltree::Document::parse_with_options(text, options)
            .map_err(|err| SchemeError::InvalidConfig(format!("svg: {err}").into()))?;
        let mut targets = IndexMap::new();
        for node in document.descendants().filter(roxmltree::Node::is_element) {
            let Some(id) = node.attribute("id") else {
                continue;
            };
            let text_node = node.first_element_child().unwrap_or(node);
            let state = TargetState {
                properties: node.attribute("style").map(parse_style).unwrap_or_default(),
                text: text_node
                    .text()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string),
                updates: 0,
            };
            targets.entry(SmolStr::new(id)).or_insert(state);
        }
        Ok(Self { targets })
    }

    pub fn with_targets<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            targets: ids
                .into_iter()
                .map(|id| (SmolStr::new(id), TargetState::default()))
                .collect(),
        }
    }

    #[must_use]
    pub fn target(&self, svg_id: &str) -> Option<&TargetState> {
        self.targets.get(svg_id)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &TargetState)> {
        self.targets.iter().map(|(id, state)| (id.as_str(), state))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Renderer for SvgScene {
    type Target = SmolStr;

    fn find_target(&self, svg_id: &str) -> Option<SmolStr> {
        self.targets.get_key_value(svg_id).map(|(id, _)| id.clone())
    }

    fn apply_effects(&mut self, target: &SmolStr, effects: &Effects) {
        if let Some(state) = self.targets.get_mut(target) {
            state.apply(effects);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Element, ElementKind, Pattern, StyleRule};
    use serde_json::json;
    use std::time::Duration;

    const SVG: &str = r##"<?xml version="1.0"?>
<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100">
  <rect id="tank" style="fill:#cccccc;stroke:#000" width="50" height="80"/>
  <g id="label"><text id="label_text">--</text></g>
  <circle id="lamp" r="5"/>
</svg>"##;

    fn catalog() -> Arc<Catalog> {
        let tank = Element {
            kind: ElementKind::Float,
            precision: 1,
            rules: vec![
                StyleRule {
                    max: Some(10.0),
                    fill: Some("#ff0000".into()),
                    ..StyleRule::default()
                },
                StyleRule {
                    fill: Some("#0000ff".into()),
                    ..StyleRule::default()
                },
            ],
            ..Element::new("tank", "plc1", "level")
        };
        let label = Element {
            kind: ElementKind::Float,
            precision: 1,
            rules: vec![StyleRule {
                text: Some("%% m".into()),
                ..StyleRule::default()
            }],
            ..Element::new("label", "plc1", "level_text")
        };
        let lamp = Element {
            kind: ElementKind::Bool,
            rules: vec![StyleRule {
                pattern: Some(Pattern::new("^true$").expect("pattern")),
                style: Some("fill:#00ff00; stroke : none".into()),
                ..StyleRule::default()
            }],
            ..Element::new("lamp", "plc1", "run")
        };
        let hidden = Element {
            rules: vec![StyleRule::default()],
            ..Element::new("not_drawn", "plc1", "hidden")
        };
        Arc::new(
            Catalog::new("boiler", Duration::from_secs(1), vec![tank, label, lamp, hidden])
                .expect("catalog"),
        )
    }

    fn router() -> ValueRouter<SvgScene> {
        ValueRouter::new(catalog(), SvgScene::from_svg(SVG).expect("svg"))
    }

    #[test]
    fn scene_reads_ids_style_and_text() {
        let scene = SvgScene::from_svg(SVG).expect("svg");
        assert_eq!(scene.len(), 4);
        let tank = scene.target("tank").expect("tank");
        assert_eq!(tank.property("fill"), Some("#cccccc"));
        assert_eq!(tank.style_attribute(), "fill:#cccccc;stroke:#000");
        assert_eq!(
            scene.target("label").and_then(|t| t.text.as_deref()),
            Some("--")
        );
    }

    #[test]
    fn invalid_svg_is_rejected() {
        assert!(SvgScene::from_svg("<svg").is_err());
    }

    #[test]
    fn routes_value_to_its_target() {
        let mut router = router();
        assert_eq!(router.route("plc1", "level", &json!(4.2)), RouteOutcome::Applied);
        let tank = router.renderer().target("tank").expect("tank");
        assert_eq!(tank.property("fill"), Some("#ff0000"));
        assert_eq!(tank.property("stroke"), Some("#000"));

        assert_eq!(router.route("plc1", "level", &json!("12")), RouteOutcome::Applied);
        let tank = router.renderer().target("tank").expect("tank");
        assert_eq!(tank.property("fill"), Some("#0000ff"));
        assert_eq!(tank.updates, 2);
    }

    #[test]
    fn text_template_gets_rounded_value() {
        let mut router = router();
        router.route("plc1", "level_text", &json!("3.14159"));
        assert_eq!(
            router.renderer().target("label").and_then(|t| t.text.as_deref()),
            Some("3.1 m")
        );
    }

    #[test]
    fn raw_style_replaces_inline_style() {
        let mut router = router();
        router.renderer_mut().apply_effects(
            &SmolStr::new("lamp"),
            &Effects {
                opacity: Some(0.25),
                ..Effects::default()
            },
        );
        assert_eq!(router.route("plc1", "run", &json!(true)), RouteOutcome::Applied);
        let lamp = router.renderer().target("lamp").expect("lamp");
        assert_eq!(lamp.style_attribute(), "fill:#00ff00;stroke:none");
        assert_eq!(lamp.property("opacity"), None);
    }

    #[test]
    fn integral_float_on_the_wire_hits_map_and_pattern() {
        let mut state = Element {
            kind: ElementKind::Int,
            rules: vec![
                StyleRule {
                    pattern: Some(Pattern::new("^1$").expect("pattern")),
                    fill: Some("#00ff00".into()),
                    text: Some("%%".into()),
                    ..StyleRule::default()
                },
                StyleRule {
                    text: Some("%%".into()),
                    ..StyleRule::default()
                },
            ],
            ..Element::new("state", "plc1", "pump_state")
        };
        state.map.insert("1".into(), "ON".into());
        let catalog = Catalog::new("boiler", Duration::from_secs(1), vec![state]).expect("catalog");
        let mut router = ValueRouter::new(Arc::new(catalog), SvgScene::with_targets(["state"]));

        assert_eq!(router.route("plc1", "pump_state", &json!(1.0)), RouteOutcome::Applied);
        let target = router.renderer().target("state").expect("state");
        assert_eq!(target.text.as_deref(), Some("ON"));
        assert_eq!(target.property("fill"), Some("#00ff00"));

        router.route("plc1", "pump_state", &json!(2.0));
        let target = router.renderer().target("state").expect("state");
        assert_eq!(target.text.as_deref(), Some("2"));
    }

    #[test]
    fn unknown_and_unrendered_values_are_dropped() {
        let mut router = router();
        assert_eq!(
            router.route("plc1", "unknown", &json!(1)),
            RouteOutcome::UnknownElement
        );
        assert_eq!(
            router.route("plc2", "level", &json!(1)),
            RouteOutcome::UnknownElement
        );
        assert_eq!(
            router.route("plc1", "hidden", &json!(1)),
            RouteOutcome::MissingTarget
        );
        assert_eq!(
            router.route("plc1", "run", &json!(false)),
            RouteOutcome::NoMatchingRule
        );
        assert!(router.renderer().targets().all(|(_, state)| state.updates == 0));
    }
}
