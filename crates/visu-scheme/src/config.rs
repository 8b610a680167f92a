//! Scheme configuration loading.
//!
//! A configuration is one TOML file or a directory of them, merged in
//! alphabetical order. It carries the client endpoints, reusable element
//! templates, element groups instantiated with variables, and the schemes
//! themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::catalog::{Catalog, Element, ElementKind, Pattern, StyleRule, DEFAULT_PRECISION};
use crate::error::SchemeError;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_HTTP_URL: &str = "http://localhost:8000";
pub const DEFAULT_INTERVAL_SECS: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base of the per-module socket paths (`{ws_url}/{module}`).
    pub ws_url: String,
    /// Base of the history endpoint.
    pub http_url: String,
    pub log_level: SmolStr,
    pub history_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            http_url: DEFAULT_HTTP_URL.to_string(),
            log_level: SmolStr::new("info"),
            history_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Parsed and validated configuration.
#[derive(Debug, Clone)]
pub struct VisuConfig {
    pub client: ClientConfig,
    base_dir: Option<PathBuf>,
    templates: IndexMap<String, ElementToml>,
    groups: IndexMap<String, GroupToml>,
    schemes: IndexMap<String, SchemeToml>,
}

impl VisuConfig {
    /// Loads a file, or every `*.toml` of a directory in alphabetical order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemeError> {
        let path = path.as_ref();
        if path.is_dir() {
            let pattern = path.join("*.toml");
            let pattern = pattern.to_string_lossy();
            let mut files = glob::glob(&pattern)
                .map_err(|err| SchemeError::InvalidConfig(format!("{pattern}: {err}").into()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SchemeError::InvalidConfig(err.to_string().into()))?;
            files.sort();
            if files.is_empty() {
                return Err(SchemeError::InvalidConfig(
                    format!("no *.toml files in {}", path.display()).into(),
                ));
            }
            let raws = files
                .iter()
                .map(|file| read_toml(file))
                .collect::<Result<Vec<_>, _>>()?;
            Self::from_raw(raws, Some(path.to_path_buf()))
        } else {
            let raw = read_toml(path)?;
            Self::from_raw(vec![raw], path.parent().map(Path::to_path_buf))
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SchemeError> {
        let raw: ConfigToml = toml::from_str(text)
            .map_err(|err| SchemeError::InvalidConfig(format!("config: {err}").into()))?;
        Self::from_raw(vec![raw], None)
    }

    fn from_raw(raws: Vec<ConfigToml>, base_dir: Option<PathBuf>) -> Result<Self, SchemeError> {
        let mut client = ClientSection::default();
        let mut templates = IndexMap::new();
        let mut groups = IndexMap::new();
        let mut schemes = IndexMap::new();
        for raw in raws {
            if let Some(section) = raw.client {
                client = client.overlay(section);
            }
            for template in raw.element_template {
                let name = template.template.clone().ok_or_else(|| {
                    SchemeError::InvalidConfig("template definition requires template name".into())
                })?;
                if templates.insert(name.clone(), template).is_some() {
                    return Err(SchemeError::InvalidConfig(
                        format!("duplicate template name '{name}'").into(),
                    ));
                }
            }
            for group in raw.element_group {
                let name = group.group_name.clone();
                if groups.insert(name.clone(), group).is_some() {
                    return Err(SchemeError::InvalidConfig(
                        format!("duplicate group name '{name}'").into(),
                    ));
                }
            }
            for scheme in raw.scheme {
                let id = scheme.scheme_id.clone();
                if schemes.insert(id.clone(), scheme).is_some() {
                    return Err(SchemeError::InvalidConfig(
                        format!("duplicate scheme id '{id}'").into(),
                    ));
                }
            }
        }
        let config = Self {
            client: client.into_config()?,
            base_dir,
            templates,
            groups,
            schemes,
        };
        for id in config.schemes.keys() {
            config.catalog(Some(id))?;
        }
        debug!("discovered templates: {:?}", config.templates.keys());
        debug!("discovered groups: {:?}", config.groups.keys());
        debug!("discovered schemes: {:?}", config.schemes.keys());
        Ok(config)
    }

    pub fn scheme_ids(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(String::as_str)
    }

    /// Builds the catalog of `scheme_id`, or of the first scheme when `None`.
    pub fn catalog(&self, scheme_id: Option<&str>) -> Result<Catalog, SchemeError> {
        let scheme = match scheme_id {
            Some(id) => self.schemes.get(id).ok_or_else(|| {
                SchemeError::InvalidConfig(format!("scheme '{id}' not found").into())
            })?,
            None => self
                .schemes
                .values()
                .next()
                .ok_or_else(|| SchemeError::InvalidConfig("no scheme configured".into()))?,
        };
        self.build_catalog(scheme)
    }

    fn build_catalog(&self, scheme: &SchemeToml) -> Result<Catalog, SchemeError> {
        let scheme_id = scheme.scheme_id.as_str();
        let mut raw_elements = scheme.element.clone();
        for group_ref in &scheme.group {
            let group = self.groups.get(&group_ref.group_name).ok_or_else(|| {
                SchemeError::InvalidConfig(
                    format!(
                        "group '{}' not found, required by scheme '{scheme_id}'",
                        group_ref.group_name
                    )
                    .into(),
                )
            })?;
            for element in &group.element {
                raw_elements.push(element.substitute(&group_ref.variables)?);
            }
        }

        let default_cov = scheme.cov.unwrap_or(false);
        let mut elements = Vec::with_capacity(raw_elements.len());
        for raw in raw_elements {
            let raw = match raw.template.as_deref() {
                Some(name) => {
                    let template = self.templates.get(name).ok_or_else(|| {
                        SchemeError::InvalidConfig(
                            format!(
                                "template '{name}' not found, required by {} in '{scheme_id}'",
                                raw.svg_id.as_deref().unwrap_or("?")
                            )
                            .into(),
                        )
                    })?;
                    raw.inherit(template)
                }
                None => raw,
            };
            elements.push(raw.into_element(default_cov, scheme_id)?);
        }

        let seconds = scheme.interval.unwrap_or(DEFAULT_INTERVAL_SECS);
        let interval = Duration::try_from_secs_f64(seconds)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                SchemeError::InvalidConfig(
                    format!("scheme '{scheme_id}': interval must be a positive number of seconds, got {seconds}")
                        .into(),
                )
            })?;
        let mut catalog = Catalog::new(scheme_id, interval, elements)?
            .with_name(scheme.scheme_name.clone().unwrap_or_else(|| scheme_id.to_string()));
        if let Some(svg_path) = scheme.svg_path.as_deref() {
            let path = match &self.base_dir {
                Some(dir) => dir.join(svg_path),
                None => PathBuf::from(svg_path),
            };
            catalog = catalog.with_svg_path(path);
        }
        Ok(catalog)
    }
}

fn read_toml(path: &Path) -> Result<ConfigToml, SchemeError> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| SchemeError::InvalidConfig(format!("{}: {err}", path.display()).into()))?;
    toml::from_str(&text)
        .map_err(|err| SchemeError::InvalidConfig(format!("{}: {err}", path.display()).into()))
}

/// Expands `{name}` placeholders; `{{` and `}}` are literal braces.
pub fn resolve_variables(
    text: &str,
    variables: &IndexMap<String, String>,
) -> Result<String, SchemeError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(SchemeError::InvalidConfig(
                                format!("unterminated variable in '{text}'").into(),
                            ))
                        }
                    }
                }
                let value = variables.get(name.trim()).ok_or_else(|| {
                    SchemeError::InvalidConfig(
                        format!("unknown variable '{}' in '{text}'", name.trim()).into(),
                    )
                })?;
                out.push_str(value);
            }
            '}' => {
                return Err(SchemeError::InvalidConfig(
                    format!("single '}}' in '{text}'").into(),
                ))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn resolve_opt(
    text: Option<&String>,
    variables: &IndexMap<String, String>,
) -> Result<Option<String>, SchemeError> {
    text.map(|text| resolve_variables(text, variables)).transpose()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    client: Option<ClientSection>,
    #[serde(default)]
    element_template: Vec<ElementToml>,
    #[serde(default)]
    element_group: Vec<GroupToml>,
    #[serde(default)]
    scheme: Vec<SchemeToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ClientSection {
    ws_url: Option<String>,
    http_url: Option<String>,
    log_level: Option<String>,
    history_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

impl ClientSection {
    fn overlay(self, next: ClientSection) -> Self {
        Self {
            ws_url: next.ws_url.or(self.ws_url),
            http_url: next.http_url.or(self.http_url),
            log_level: next.log_level.or(self.log_level),
            history_timeout_ms: next.history_timeout_ms.or(self.history_timeout_ms),
            read_timeout_ms: next.read_timeout_ms.or(self.read_timeout_ms),
        }
    }

    fn into_config(self) -> Result<ClientConfig, SchemeError> {
        let defaults = ClientConfig::default();
        let read_timeout = self
            .read_timeout_ms
            .map_or(defaults.read_timeout, Duration::from_millis);
        if read_timeout.is_zero() {
            return Err(SchemeError::InvalidConfig(
                "client.read_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(ClientConfig {
            ws_url: self.ws_url.unwrap_or(defaults.ws_url),
            http_url: self.http_url.unwrap_or(defaults.http_url),
            log_level: self.log_level.map_or(defaults.log_level, SmolStr::from),
            history_timeout: self
                .history_timeout_ms
                .map_or(defaults.history_timeout, Duration::from_millis),
            read_timeout,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GroupToml {
    group_name: String,
    #[serde(default)]
    element: Vec<ElementToml>,
}

#[derive(Debug, Clone, Deserialize)]
struct GroupRefToml {
    group_name: String,
    #[serde(default)]
    variables: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemeToml {
    scheme_id: String,
    scheme_name: Option<String>,
    svg_path: Option<String>,
    interval: Option<f64>,
    cov: Option<bool>,
    #[serde(default)]
    element: Vec<ElementToml>,
    #[serde(default)]
    group: Vec<GroupRefToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ElementToml {
    template: Option<String>,
    svg_id: Option<String>,
    data_module: Option<String>,
    data_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<ElementKind>,
    write: Option<bool>,
    cov: Option<bool>,
    single: Option<bool>,
    #[serde(alias = "minf")]
    min: Option<f64>,
    #[serde(alias = "maxf")]
    max: Option<f64>,
    #[serde(rename = "enum")]
    choices: Option<Vec<String>>,
    #[serde(rename = "match")]
    pattern: Option<String>,
    precision: Option<usize>,
    map: Option<IndexMap<String, String>>,
    style: Option<Vec<StyleToml>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StyleToml {
    min: Option<f64>,
    max: Option<f64>,
    #[serde(rename = "match")]
    pattern: Option<String>,
    fill: Option<String>,
    opacity: Option<f64>,
    style: Option<String>,
    text: Option<String>,
}

impl ElementToml {
    /// Fields set here win; anything unset comes from `template`.
    fn inherit(self, template: &ElementToml) -> Self {
        Self {
            template: self.template,
            svg_id: self.svg_id.or_else(|| template.svg_id.clone()),
            data_module: self.data_module.or_else(|| template.data_module.clone()),
            data_id: self.data_id.or_else(|| template.data_id.clone()),
            kind: self.kind.or(template.kind),
            write: self.write.or(template.write),
            cov: self.cov.or(template.cov),
            single: self.single.or(template.single),
            min: self.min.or(template.min),
            max: self.max.or(template.max),
            choices: self.choices.or_else(|| template.choices.clone()),
            pattern: self.pattern.or_else(|| template.pattern.clone()),
            precision: self.precision.or(template.precision),
            map: self.map.or_else(|| template.map.clone()),
            style: self.style.or_else(|| template.style.clone()),
        }
    }

    fn substitute(&self, variables: &IndexMap<String, String>) -> Result<Self, SchemeError> {
        let map = self
            .map
            .as_ref()
            .map(|map| {
                map.iter()
                    .map(|(key, value)| {
                        Ok((
                            resolve_variables(key, variables)?,
                            resolve_variables(value, variables)?,
                        ))
                    })
                    .collect::<Result<IndexMap<_, _>, SchemeError>>()
            })
            .transpose()?;
        let style = self
            .style
            .as_ref()
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| rule.substitute(variables))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        Ok(Self {
            template: resolve_opt(self.template.as_ref(), variables)?,
            svg_id: resolve_opt(self.svg_id.as_ref(), variables)?,
            data_module: resolve_opt(self.data_module.as_ref(), variables)?,
            data_id: resolve_opt(self.data_id.as_ref(), variables)?,
            pattern: resolve_opt(self.pattern.as_ref(), variables)?,
            map,
            style,
            ..self.clone()
        })
    }

    fn into_element(self, default_cov: bool, scheme_id: &str) -> Result<Element, SchemeError> {
        let required = |value: Option<String>, field: &str| {
            value.map(SmolStr::from).ok_or_else(|| {
                SchemeError::InvalidConfig(
                    format!("element in scheme '{scheme_id}' is missing {field}").into(),
                )
            })
        };
        let svg_id = required(self.svg_id, "svg_id")?;
        let data_module = required(self.data_module, "data_module")?;
        let data_id = required(self.data_id, "data_id")?;
        let pattern = self.pattern.as_deref().map(Pattern::new).transpose()?;
        let rules = self
            .style
            .unwrap_or_default()
            .into_iter()
            .map(StyleToml::into_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Element {
            svg_id,
            data_module,
            data_id,
            kind: self.kind.unwrap_or_default(),
            write: self.write.unwrap_or(false),
            cov: self.cov.unwrap_or(default_cov),
            single: self.single.unwrap_or(false),
            min: self.min,
            max: self.max,
            choices: self.choices.unwrap_or_default(),
            pattern,
            precision: self.precision.unwrap_or(DEFAULT_PRECISION),
            map: self.map.unwrap_or_default(),
            rules,
        })
    }
}

impl StyleToml {
    fn substitute(&self, variables: &IndexMap<String, String>) -> Result<Self, SchemeError> {
        Ok(Self {
            pattern: resolve_opt(self.pattern.as_ref(), variables)?,
            fill: resolve_opt(self.fill.as_ref(), variables)?,
            style: resolve_opt(self.style.as_ref(), variables)?,
            text: resolve_opt(self.text.as_ref(), variables)?,
            ..self.clone()
        })
    }

    fn into_rule(self) -> Result<StyleRule, SchemeError> {
        Ok(StyleRule {
            min: self.min,
            max: self.max,
            pattern: self.pattern.as_deref().map(Pattern::new).transpose()?,
            fill: self.fill,
            opacity: self.opacity,
            style: self.style,
            text: self.text,
        })
    }
}
