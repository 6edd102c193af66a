//! Macro parameter blocks: strict YAML parsing and the declared parameter surface.

mod resolver;

pub use resolver::ParameterResolver;

use crate::error::ParameterError;
use indexmap::IndexMap;

/// A whitelisted YAML node. Anything else (notably tagged nodes) is rejected during parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamNode {
    Null,
    Scalar(String),
    List(Vec<ParamNode>),
    Map(ParamMap),
}

pub type ParamMap = IndexMap<String, ParamNode>;

/// Parses a raw parameter block (the text between the macro name and the closing braces).
pub fn parse_block(text: &str) -> Result<ParamMap, ParameterError> {
    if text.trim().is_empty() {
        return Ok(ParamMap::new());
    }
    let raw: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ParameterError::Malformed {
            message: e.to_string(),
        })?;
    match convert(raw)? {
        ParamNode::Map(map) => Ok(map),
        ParamNode::Null => Ok(ParamMap::new()),
        _ => Err(ParameterError::Malformed {
            message: "parameters must be written as `name: value` pairs".to_string(),
        }),
    }
}

fn convert(value: serde_yaml::Value) -> Result<ParamNode, ParameterError> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => ParamNode::Null,
        Value::Bool(b) => ParamNode::Scalar(b.to_string()),
        Value::Number(n) => ParamNode::Scalar(n.to_string()),
        Value::String(s) => ParamNode::Scalar(s),
        Value::Sequence(items) => ParamNode::List(
            items
                .into_iter()
                .map(convert)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Mapping(mapping) => {
            let mut out = ParamMap::new();
            for (k, v) in mapping {
                let key = match k {
                    Value::String(s) => s,
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Tagged(t) => {
                        return Err(ParameterError::UnsupportedTag {
                            tag: t.tag.to_string(),
                        });
                    }
                    _ => {
                        return Err(ParameterError::Malformed {
                            message: "parameter names must be plain text".to_string(),
                        });
                    }
                };
                out.insert(key.trim().to_string(), convert(v)?);
            }
            ParamNode::Map(out)
        }
        Value::Tagged(t) => {
            return Err(ParameterError::UnsupportedTag {
                tag: t.tag.to_string(),
            });
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Text,
    Boolean,
    Number,
    /// A list of series sub-mappings.
    SeriesList,
}

impl ParamType {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Text => "text value",
            Self::Boolean => "boolean (true, false, yes or no)",
            Self::Number => "number",
            Self::SeriesList => "list of series",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParameterDefinition {
    pub name: &'static str,
    pub ty: ParamType,
    pub default: Option<&'static str>,
    pub required: bool,
    /// Accepts project variables `(name)` and `THIS CARD.property`.
    pub computable: bool,
    /// Holds MQL or a date, where `TODAY` and `CURRENT USER` make the chart uncacheable.
    pub contextual: bool,
    /// Allowed values, matched case-insensitively.
    pub values: &'static [&'static str],
    /// When set, a value outside `values` fails instead of falling back to the default.
    pub strict: bool,
}

impl ParameterDefinition {
    const fn new(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            default: None,
            required: false,
            computable: false,
            contextual: false,
            values: &[],
            strict: false,
        }
    }

    const fn text(name: &'static str) -> Self {
        Self::new(name, ParamType::Text)
    }

    const fn boolean(name: &'static str) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    const fn number(name: &'static str) -> Self {
        Self::new(name, ParamType::Number)
    }

    const fn default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn computable(mut self) -> Self {
        self.computable = true;
        self
    }

    const fn contextual(mut self) -> Self {
        self.contextual = true;
        self
    }

    const fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.values = values;
        self
    }

    const fn strictly_one_of(mut self, values: &'static [&'static str]) -> Self {
        self.values = values;
        self.strict = true;
        self
    }
}

pub const CHART_TYPES: &[&str] = &["line", "bar", "area"];
pub const SYMBOLS: &[&str] = &["none", "circle", "square", "diamond", "triangle"];
pub const LINE_STYLES: &[&str] = &["solid", "dash"];
pub const TREND_IGNORES: &[&str] = &["none", "zeroes-at-end", "zeroes-at-end-and-last-value"];
pub const COMBINES: &[&str] = &["overlay-top", "overlay-bottom", "total"];

pub const CHART_PARAMETERS: &[ParameterDefinition] = &[
    ParameterDefinition::text("conditions").computable().contextual(),
    ParameterDefinition::boolean("cumulative").default("false"),
    ParameterDefinition::new("series", ParamType::SeriesList).required(),
    ParameterDefinition::text("x-labels-start").computable().contextual(),
    ParameterDefinition::text("x-labels-end").computable().contextual(),
    ParameterDefinition::text("x-labels-step").computable(),
    ParameterDefinition::text("x-labels-property").computable(),
    ParameterDefinition::text("x-labels-tree").computable(),
    ParameterDefinition::text("x-labels-conditions").computable().contextual(),
    ParameterDefinition::boolean("show-start-label").default("false"),
    ParameterDefinition::text("start-label").computable(),
    ParameterDefinition::text("chart-type").one_of(CHART_TYPES),
    ParameterDefinition::number("chart-width"),
    ParameterDefinition::number("chart-height"),
    ParameterDefinition::text("chart-size").one_of(&["small", "medium", "large"]),
    ParameterDefinition::text("title").computable(),
    ParameterDefinition::text("x-title").computable(),
    ParameterDefinition::text("y-title").computable(),
    ParameterDefinition::text("legend-position").one_of(&["bottom", "right", "top"]),
    ParameterDefinition::boolean("three-d").default("false"),
    ParameterDefinition::boolean("show-guide-lines").default("true"),
    ParameterDefinition::boolean("data-labels").default("false"),
    ParameterDefinition::text("data-point-symbol").strictly_one_of(SYMBOLS),
    ParameterDefinition::text("line-style").strictly_one_of(LINE_STYLES),
    ParameterDefinition::number("line-width"),
    ParameterDefinition::boolean("trend").default("false"),
    ParameterDefinition::text("trend-scope").default("all").computable(),
    ParameterDefinition::text("trend-ignore")
        .default("zeroes-at-end-and-last-value")
        .strictly_one_of(TREND_IGNORES),
    ParameterDefinition::text("trend-line-color"),
    ParameterDefinition::text("trend-line-style").strictly_one_of(LINE_STYLES),
    ParameterDefinition::number("trend-line-width"),
];

pub const SERIES_PARAMETERS: &[ParameterDefinition] = &[
    ParameterDefinition::text("label").computable(),
    ParameterDefinition::text("data").required().computable().contextual(),
    ParameterDefinition::text("down-from").computable().contextual(),
    ParameterDefinition::text("combine").one_of(COMBINES),
    ParameterDefinition::text("color"),
    ParameterDefinition::text("type").one_of(CHART_TYPES),
    ParameterDefinition::text("project").computable(),
    ParameterDefinition::boolean("cumulative"),
    ParameterDefinition::boolean("hidden").default("false"),
    ParameterDefinition::boolean("data-labels"),
    ParameterDefinition::text("data-point-symbol").strictly_one_of(SYMBOLS),
    ParameterDefinition::text("line-style").strictly_one_of(LINE_STYLES),
    ParameterDefinition::number("line-width"),
    ParameterDefinition::boolean("trend"),
    ParameterDefinition::text("trend-scope").computable(),
    ParameterDefinition::text("trend-ignore").strictly_one_of(TREND_IGNORES),
    ParameterDefinition::text("trend-line-color"),
    ParameterDefinition::text("trend-line-style").strictly_one_of(LINE_STYLES),
    ParameterDefinition::number("trend-line-width"),
];

/// A parameter mapping paired with the definitions it is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSet<'p> {
    pub map: &'p ParamMap,
    pub definitions: &'static [ParameterDefinition],
}

impl<'p> ParameterSet<'p> {
    pub fn new(map: &'p ParamMap, definitions: &'static [ParameterDefinition]) -> Self {
        Self { map, definitions }
    }

    pub fn definition(&self, name: &str) -> Option<&'static ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Rejects keys that are not declared.
    pub fn check_known(&self) -> Result<(), ParameterError> {
        for key in self.map.keys() {
            if self.definition(key).is_none() {
                return Err(ParameterError::UnknownParameter { name: key.clone() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_series_lists() {
        let map = parse_block(
            r#"
cumulative: true
x-labels-start: 2.00
series:
  - label: Scope
    data: SELECT Iteration, SUM(Size)
  - data: SELECT Iteration, COUNT(*)
"#,
        )
        .unwrap();
        assert_eq!(map["cumulative"], ParamNode::Scalar("true".to_string()));
        let ParamNode::List(series) = &map["series"] else {
            panic!("series must be a list");
        };
        assert_eq!(series.len(), 2);
        let ParamNode::Map(first) = &series[0] else {
            panic!("series entries must be mappings");
        };
        assert_eq!(first["label"], ParamNode::Scalar("Scope".to_string()));
    }

    #[test]
    fn tagged_nodes_fail_closed() {
        let err = parse_block("chart-type: !ruby/object:Kernel { cmd: rm }").unwrap_err();
        assert!(matches!(err, ParameterError::UnsupportedTag { .. }));

        let err = parse_block("series:\n  - !series { data: x }").unwrap_err();
        assert!(matches!(err, ParameterError::UnsupportedTag { .. }));
    }

    #[test]
    fn non_mapping_blocks_are_malformed() {
        assert!(matches!(
            parse_block("- a\n- b"),
            Err(ParameterError::Malformed { .. })
        ));
        assert!(parse_block("   ").unwrap().is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let map = parse_block("colour: red").unwrap();
        let err = ParameterSet::new(&map, CHART_PARAMETERS)
            .check_known()
            .unwrap_err();
        assert_eq!(
            err,
            ParameterError::UnknownParameter {
                name: "colour".to_string()
            }
        );
    }
}
