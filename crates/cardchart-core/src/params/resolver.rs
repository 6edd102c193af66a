use super::{ParamMap, ParamNode, ParamType, ParameterDefinition, ParameterSet};
use crate::context::{Content, RenderContext};
use crate::error::{Error, ParameterError, Result, bold};
use crate::model::{ProjectModel, PropertyKind};
use crate::mql::mentions_volatile_context;
use regex::Regex;
use std::sync::OnceLock;

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^PROPERTY\s+(\(.+\))$").expect("valid regex"))
}

fn project_variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\((.+)\)$").expect("valid regex"))
}

fn this_card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^THIS\s+CARD\s*\.\s*(.+)$").expect("valid regex"))
}

/// A resolved value and the expression it came from (for error messages).
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
    value: String,
    expression: String,
}

/// Turns raw parameter nodes into typed values for one render.
#[derive(Clone, Copy)]
pub struct ParameterResolver<'a> {
    ctx: &'a RenderContext,
    model: &'a dyn ProjectModel,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(ctx: &'a RenderContext, model: &'a dyn ProjectModel) -> Self {
        Self { ctx, model }
    }

    pub fn text(&self, set: &ParameterSet<'_>, name: &str) -> Result<Option<String>> {
        Ok(self.resolve(set, name)?.map(|r| r.value))
    }

    pub fn boolean(&self, set: &ParameterSet<'_>, name: &str) -> Result<Option<bool>> {
        let Some(r) = self.resolve(set, name)? else {
            return Ok(None);
        };
        match r.value.to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(Some(true)),
            "false" | "no" => Ok(Some(false)),
            _ => Err(mismatch(name, ParamType::Boolean, &r.expression)),
        }
    }

    pub fn number(&self, set: &ParameterSet<'_>, name: &str) -> Result<Option<f64>> {
        let Some(r) = self.resolve(set, name)? else {
            return Ok(None);
        };
        match r.value.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(mismatch(name, ParamType::Number, &r.expression)),
        }
    }

    /// Resolves a `list_of` parameter into its element mappings.
    pub fn list(&self, set: &ParameterSet<'_>, name: &str) -> Result<Vec<ParamMap>> {
        let def = definition(set, name)?;
        let items = match set.map.get(name) {
            None | Some(ParamNode::Null) => Vec::new(),
            Some(ParamNode::List(items)) => items.clone(),
            Some(ParamNode::Map(map)) => vec![ParamNode::Map(map.clone())],
            Some(ParamNode::Scalar(s)) => {
                return Err(mismatch(name, def.ty, s));
            }
        };
        if items.is_empty() && def.required {
            return Err(ParameterError::Required {
                name: name.to_string(),
            }
            .into());
        }
        items
            .into_iter()
            .map(|item| match item {
                ParamNode::Map(map) => Ok(map),
                ParamNode::Scalar(s) => Err(mismatch(name, def.ty, &s)),
                _ => Err(mismatch(name, def.ty, "a nested list")),
            })
            .collect()
    }

    fn resolve(&self, set: &ParameterSet<'_>, name: &str) -> Result<Option<Resolved>> {
        let def = definition(set, name)?;
        let resolved = match set.map.get(name) {
            None | Some(ParamNode::Null) => None,
            Some(ParamNode::Scalar(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    self.interpret(def, trimmed)?
                }
            }
            Some(_) => return Err(mismatch(name, def.ty, "a list or mapping")),
        };

        let resolved = match resolved {
            Some(r) => restrict_to_values(def, r)?,
            None => None,
        };
        let resolved = resolved.or_else(|| default_of(def));

        if resolved.is_none() && def.required {
            return Err(ParameterError::Required {
                name: name.to_string(),
            }
            .into());
        }
        Ok(resolved)
    }

    /// Applies `PROPERTY (…)`, project-variable and `THIS CARD` indirection. `None` means the
    /// expression resolved to nothing and the default applies.
    fn interpret(&self, def: &ParameterDefinition, raw: &str) -> Result<Option<Resolved>> {
        if def.contextual && mentions_volatile_context(raw) {
            self.ctx.mark_volatile();
        }
        let expression = raw.to_string();

        if let Some(caps) = property_re().captures(raw) {
            return Ok(Some(Resolved {
                value: caps[1].trim().to_string(),
                expression,
            }));
        }
        if !def.computable {
            return Ok(Some(Resolved {
                value: raw.to_string(),
                expression,
            }));
        }

        let mut value = raw.to_string();
        if let Some(caps) = project_variable_re().captures(raw) {
            if let Some(v) = self.model.project_variable(self.ctx.project(), &caps[1]) {
                tracing::trace!(variable = &caps[1], value = %v, "substituted project variable");
                value = v.trim().to_string();
                if value.is_empty() {
                    return Ok(None);
                }
                if def.contextual && mentions_volatile_context(&value) {
                    self.ctx.mark_volatile();
                }
            }
        }

        if let Some(caps) = this_card_re().captures(&value) {
            let property = caps[1].trim().to_string();
            return Ok(self
                .this_card_value(def, &value, &property)?
                .map(|value| Resolved { value, expression }));
        }

        Ok(Some(Resolved { value, expression }))
    }

    fn this_card_value(
        &self,
        def: &ParameterDefinition,
        expression: &str,
        property: &str,
    ) -> Result<Option<String>> {
        let number = match self.ctx.content() {
            Content::Card { number } => *number,
            Content::CardDefaults { .. } => {
                self.ctx.defer(expression);
                return Ok(None);
            }
            Content::Page { name } => {
                return Err(Error::Unsupported {
                    message: format!(
                        "{} is not supported on page {}: THIS CARD is only available on cards.",
                        bold(expression),
                        bold(name)
                    ),
                });
            }
        };

        let project = self.ctx.project();
        match property.to_ascii_lowercase().as_str() {
            "number" => return Ok(Some(number.to_string())),
            "project" => return Ok(Some(project.to_string())),
            "name" | "type" => {
                let Some(card) = self.model.card(project, number) else {
                    return Ok(None);
                };
                return Ok(Some(if property.eq_ignore_ascii_case("name") {
                    card.name
                } else {
                    card.card_type
                }));
            }
            _ => {}
        }

        let Some(prop) = self.model.property(project, property) else {
            return Err(ParameterError::invalid(
                def.name,
                format!("{} is not a property of this card.", bold(expression)),
            )
            .into());
        };
        let Some(raw) = self.model.card_property(project, number, &prop.name) else {
            return Ok(None);
        };

        Ok(Some(match prop.kind {
            PropertyKind::User => self
                .model
                .users(project)
                .into_iter()
                .find(|u| u.login.eq_ignore_ascii_case(&raw))
                .map(|u| u.name)
                .unwrap_or(raw),
            PropertyKind::Card | PropertyKind::TreeRelationship => raw
                .parse::<u64>()
                .ok()
                .and_then(|n| self.model.card(project, n))
                .map(|c| c.reference())
                .unwrap_or(raw),
            _ => raw,
        }))
    }
}

fn definition<'s>(set: &ParameterSet<'s>, name: &str) -> Result<&'static ParameterDefinition> {
    set.definition(name).ok_or_else(|| {
        ParameterError::UnknownParameter {
            name: name.to_string(),
        }
        .into()
    })
}

fn default_of(def: &ParameterDefinition) -> Option<Resolved> {
    def.default.map(|d| Resolved {
        value: d.to_string(),
        expression: d.to_string(),
    })
}

fn restrict_to_values(def: &ParameterDefinition, r: Resolved) -> Result<Option<Resolved>> {
    if def.values.is_empty() {
        return Ok(Some(r));
    }
    if let Some(canonical) = def
        .values
        .iter()
        .find(|v| v.eq_ignore_ascii_case(&r.value))
    {
        return Ok(Some(Resolved {
            value: canonical.to_string(),
            expression: r.expression,
        }));
    }
    if def.strict {
        return Err(ParameterError::InvalidValue {
            name: def.name.to_string(),
            value: r.value,
            allowed: def.values.iter().map(|v| v.to_string()).collect(),
        }
        .into());
    }
    Ok(None)
}

fn mismatch(name: &str, ty: ParamType, expression: &str) -> Error {
    ParameterError::TypeMismatch {
        name: name.to_string(),
        expected: ty.describe().to_string(),
        expression: expression.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorkspace;
    use crate::params::{CHART_PARAMETERS, SERIES_PARAMETERS, parse_block};

    const WORKSPACE: &str = r##"
projects:
  - identifier: scrum
    name: Scrum
    variables:
      current iteration: "#2 Iteration 2"
      empty plv: ""
    users:
      - { login: bob, name: Bob Builder }
    properties:
      - { name: Iteration, kind: card, card_type: Iteration }
      - { name: Owner, kind: user }
      - { name: Size, kind: free-numeric }
    cards:
      - { number: 1, name: Iteration 1, type: Iteration }
      - { number: 2, name: Iteration 2, type: Iteration }
      - number: 3
        name: Story
        type: Story
        properties: { Iteration: "2", Owner: bob, Size: "3" }
"##;

    fn workspace() -> MemoryWorkspace {
        MemoryWorkspace::from_yaml(WORKSPACE).unwrap()
    }

    fn resolve_text(ctx: &RenderContext, block: &str, name: &str) -> Result<Option<String>> {
        let ws = workspace();
        let map = parse_block(block).unwrap();
        let set = ParameterSet::new(&map, CHART_PARAMETERS);
        ParameterResolver::new(ctx, &ws).text(&set, name)
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let ctx = RenderContext::page("scrum", "Overview");
        let ws = workspace();
        let map = parse_block("trend-scope: '   '\nshow-guide-lines:").unwrap();
        let set = ParameterSet::new(&map, CHART_PARAMETERS);
        let r = ParameterResolver::new(&ctx, &ws);
        assert_eq!(r.text(&set, "trend-scope").unwrap().as_deref(), Some("all"));
        assert_eq!(r.boolean(&set, "show-guide-lines").unwrap(), Some(true));
        assert_eq!(r.text(&set, "title").unwrap(), None);
    }

    #[test]
    fn project_variables_substitute_only_on_exact_names() {
        let ctx = RenderContext::page("scrum", "Overview");
        assert_eq!(
            resolve_text(&ctx, "x-labels-start: (current iteration)", "x-labels-start")
                .unwrap()
                .as_deref(),
            Some("#2 Iteration 2")
        );
        assert_eq!(
            resolve_text(&ctx, "x-labels-start: (Current Iteration)", "x-labels-start")
                .unwrap()
                .as_deref(),
            Some("(Current Iteration)")
        );
        assert_eq!(
            resolve_text(&ctx, "x-labels-start: (empty plv)", "x-labels-start").unwrap(),
            None
        );
    }

    #[test]
    fn property_keyword_bypasses_project_variables() {
        let ctx = RenderContext::page("scrum", "Overview");
        assert_eq!(
            resolve_text(
                &ctx,
                "x-labels-property: PROPERTY (current iteration)",
                "x-labels-property"
            )
            .unwrap()
            .as_deref(),
            Some("(current iteration)")
        );
    }

    #[test]
    fn this_card_resolves_live_values() {
        let ctx = RenderContext::card("scrum", 3);
        assert_eq!(
            resolve_text(&ctx, "x-labels-end: THIS CARD.Iteration", "x-labels-end")
                .unwrap()
                .as_deref(),
            Some("#2 Iteration 2")
        );
        assert_eq!(
            resolve_text(&ctx, "title: this card.owner", "title")
                .unwrap()
                .as_deref(),
            Some("Bob Builder")
        );
        assert_eq!(
            resolve_text(&ctx, "title: THIS CARD.number", "title")
                .unwrap()
                .as_deref(),
            Some("3")
        );
        let err = resolve_text(&ctx, "title: THIS CARD.Nope", "title").unwrap_err();
        assert!(err.to_string().contains("is not a property of this card"));
    }

    #[test]
    fn this_card_on_card_defaults_defers_once_and_uses_the_default() {
        let ctx = RenderContext::new(
            "scrum",
            Content::CardDefaults {
                card_type: "Story".to_string(),
            },
        );
        let ws = workspace();
        let map = parse_block("trend-scope: THIS CARD.Size\ntitle: THIS CARD.Size").unwrap();
        let set = ParameterSet::new(&map, CHART_PARAMETERS);
        let r = ParameterResolver::new(&ctx, &ws);
        assert_eq!(r.text(&set, "trend-scope").unwrap().as_deref(), Some("all"));
        assert_eq!(r.text(&set, "title").unwrap(), None);
        assert_eq!(ctx.notices().len(), 1);
    }

    #[test]
    fn this_card_on_pages_is_not_supported() {
        let ctx = RenderContext::page("scrum", "Overview");
        let err = resolve_text(&ctx, "title: THIS CARD.Size", "title").unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn booleans_and_numbers_are_coerced() {
        let ctx = RenderContext::page("scrum", "Overview");
        let ws = workspace();
        let map = parse_block("cumulative: Yes\nthree-d: maybe\nchart-width: wide").unwrap();
        let set = ParameterSet::new(&map, CHART_PARAMETERS);
        let r = ParameterResolver::new(&ctx, &ws);
        assert_eq!(r.boolean(&set, "cumulative").unwrap(), Some(true));
        let err = r.boolean(&set, "three-d").unwrap_err();
        assert!(err.to_string().contains("<b>three-d</b>"));
        assert!(err.to_string().contains("<b>maybe</b>"));
        assert!(r.number(&set, "chart-width").is_err());
    }

    #[test]
    fn enumerations_are_case_insensitive_and_non_strict_by_default() {
        let ctx = RenderContext::page("scrum", "Overview");
        assert_eq!(
            resolve_text(&ctx, "legend-position: RIGHT", "legend-position")
                .unwrap()
                .as_deref(),
            Some("right")
        );
        assert_eq!(
            resolve_text(&ctx, "legend-position: sideways", "legend-position").unwrap(),
            None
        );
        let err = resolve_text(&ctx, "data-point-symbol: star", "data-point-symbol").unwrap_err();
        assert!(err.to_string().contains("<b>data-point-symbol</b>"));
    }

    #[test]
    fn required_values_must_be_present() {
        let ctx = RenderContext::page("scrum", "Overview");
        let ws = workspace();
        let map = parse_block("label: Scope\ndata: '  '").unwrap();
        let set = ParameterSet::new(&map, SERIES_PARAMETERS);
        let err = ParameterResolver::new(&ctx, &ws)
            .text(&set, "data")
            .unwrap_err();
        assert_eq!(err.to_string(), "Parameter <b>data</b> is required.");
    }

    #[test]
    fn volatile_references_taint_the_context() {
        let ctx = RenderContext::page("scrum", "Overview");
        resolve_text(&ctx, "conditions: Owner = CURRENT USER", "conditions").unwrap();
        assert!(ctx.is_volatile());
    }

    #[test]
    fn titles_mentioning_today_stay_cacheable() {
        let ctx = RenderContext::page("scrum", "Overview");
        let title = resolve_text(&ctx, "title: Done Today", "title").unwrap();
        assert_eq!(title.as_deref(), Some("Done Today"));
        assert!(!ctx.is_volatile());
    }
}
