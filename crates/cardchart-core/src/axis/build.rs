use super::{AxisKind, AxisLabelSet, Label, LabelKey, format_number, round_to};
use crate::context::RenderContext;
use crate::error::{AxisLabelError, ParameterError, Result, bold};
use crate::model::{ProjectInfo, PropertyKind};
use crate::mql::quote;
use crate::query::Collaborators;
use crate::runtime;
use chrono::{Days, NaiveDate};
use rustc_hash::FxHashSet;

/// Everything needed to compute the chart's x-axis.
#[derive(Debug, Clone, Copy)]
pub struct AxisRequest<'a> {
    pub project: &'a ProjectInfo,
    pub property: &'a str,
    pub tree: Option<&'a str>,
    pub conditions: Option<&'a str>,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
    pub step: Option<&'a str>,
    /// Text of the synthetic first label, when `show-start-label` is on.
    pub start_label: Option<&'a str>,
    /// Raw category values returned by the series queries, in series order.
    pub observed: &'a [String],
}

pub fn build(
    req: &AxisRequest<'_>,
    collab: Collaborators<'_>,
    ctx: &RenderContext,
) -> Result<AxisLabelSet> {
    let project = &req.project.identifier;
    let Some(property) = collab.model.property(project, req.property) else {
        return Err(ParameterError::invalid(
            "x-labels-property",
            format!(
                "{} is not a property of project {}.",
                bold(req.property),
                bold(&req.project.name)
            ),
        )
        .into());
    };

    let kind = axis_kind(req, collab, property.kind, property.tree.as_deref())?;
    let scope = LabelScope::query(req, collab, ctx, &kind, &property.name)?;

    let mut date_window = (None, None);
    let labels = match &kind {
        AxisKind::Enumerated { numeric } => {
            enumerated_labels(collab, project, &property.name, *numeric, &scope)
        }
        AxisKind::FreeNumeric => free_numeric_labels(scope.values_or(req.observed)),
        AxisKind::Formula => formula_labels(scope.values_or(req.observed), req.project.precision),
        AxisKind::FreeText => free_text_labels(scope.values_or(req.observed)),
        AxisKind::Date => {
            let start = req
                .start
                .map(|s| parse_override_date(s, "x-labels-start", req.project, ctx))
                .transpose()?;
            let end = req
                .end
                .map(|s| parse_override_date(s, "x-labels-end", req.project, ctx))
                .transpose()?;
            date_window = (start, end);
            date_labels(scope.values_or(req.observed), start, end, req.project)?
        }
        AxisKind::User => user_labels(collab, project, &scope),
        AxisKind::Card => card_labels(collab, project, property.card_type.as_deref(), &scope),
        AxisKind::Tree { tree } => {
            let paths = req.start.is_none() && req.end.is_none();
            tree_labels(collab, project, tree, property.card_type.as_deref(), &scope, paths)
        }
    };

    tracing::debug!(
        property = %property.name,
        kind = ?kind,
        labels = labels.len(),
        "built x-axis labels"
    );

    let axis = AxisLabelSet::new(property, kind, labels);

    let (start, end) = match date_window {
        (None, None) => (
            locate_bound(&axis, req.start, "x-labels-start")?,
            locate_bound(&axis, req.end, "x-labels-end")?,
        ),
        (start, end) => (
            date_bound(&axis, start, req.start),
            date_bound(&axis, end, req.end),
        ),
    };
    let mut axis = axis.restrict(start, end)?;

    if let Some(step) = req.step {
        axis = axis.sample(parse_step(step)?);
    }
    if let Some(text) = req.start_label {
        axis = axis.with_start_label(text)?;
    }
    Ok(axis)
}

fn axis_kind(
    req: &AxisRequest<'_>,
    collab: Collaborators<'_>,
    kind: PropertyKind,
    property_tree: Option<&str>,
) -> Result<AxisKind> {
    if let Some(tree) = req.tree {
        if collab.model.tree(&req.project.identifier, tree).is_none() {
            return Err(AxisLabelError::NoSuchTree {
                tree: tree.to_string(),
            }
            .into());
        }
        let compatible = match kind {
            PropertyKind::Card => true,
            PropertyKind::TreeRelationship => {
                property_tree.is_none_or(|t| t.eq_ignore_ascii_case(tree))
            }
            _ => false,
        };
        if !compatible {
            return Err(AxisLabelError::IncompatibleTreeProperty {
                property: req.property.to_string(),
                tree: tree.to_string(),
            }
            .into());
        }
        return Ok(AxisKind::Tree {
            tree: tree.to_string(),
        });
    }

    Ok(match kind {
        PropertyKind::ManagedNumeric => AxisKind::Enumerated { numeric: true },
        PropertyKind::ManagedText => AxisKind::Enumerated { numeric: false },
        PropertyKind::FreeNumeric => AxisKind::FreeNumeric,
        PropertyKind::Formula => AxisKind::Formula,
        PropertyKind::FreeText => AxisKind::FreeText,
        PropertyKind::Date => AxisKind::Date,
        PropertyKind::User => AxisKind::User,
        PropertyKind::Card => AxisKind::Card,
        PropertyKind::TreeRelationship => match property_tree {
            Some(tree) => AxisKind::Tree {
                tree: tree.to_string(),
            },
            None => AxisKind::Card,
        },
    })
}

/// Label candidates allowed by `x-labels-conditions` (and the tree, for card axes).
enum LabelScope {
    Unrestricted,
    /// Raw property values of the cards matching the conditions.
    Values(Vec<String>),
    /// Card numbers matching the conditions.
    Cards(FxHashSet<u64>),
}

impl LabelScope {
    fn query(
        req: &AxisRequest<'_>,
        collab: Collaborators<'_>,
        ctx: &RenderContext,
        kind: &AxisKind,
        property: &str,
    ) -> Result<Self> {
        let Some(conditions) = req.conditions else {
            return Ok(Self::Unrestricted);
        };
        let options = ctx.query_options();
        if kind.is_card() {
            let from = match kind {
                AxisKind::Tree { tree } => format!(" FROM TREE {}", quote(tree)),
                _ => String::new(),
            };
            let query = format!("SELECT Number{from} WHERE {conditions}");
            let rows = collab
                .queries
                .records(&query, &req.project.identifier, &options)?;
            return Ok(Self::Cards(rows.into_iter().map(|r| r.number).collect()));
        }
        let query = format!("SELECT {} WHERE {conditions}", quote(property));
        let rows = collab
            .queries
            .records(&query, &req.project.identifier, &options)?;
        Ok(Self::Values(
            rows.into_iter().filter_map(|r| r.category).collect(),
        ))
    }

    fn values_or<'s>(&'s self, observed: &'s [String]) -> &'s [String] {
        match self {
            Self::Values(values) => values,
            _ => observed,
        }
    }

    fn allows_value(&self, key: &LabelKey, to_key: impl Fn(&str) -> LabelKey) -> bool {
        match self {
            Self::Values(values) => values.iter().any(|v| to_key(v) == *key),
            _ => true,
        }
    }

    fn allows_card(&self, number: u64) -> bool {
        match self {
            Self::Cards(cards) => cards.contains(&number),
            _ => true,
        }
    }
}

fn numeric_or_text_key(value: &str, numeric: bool) -> LabelKey {
    match value.trim().parse::<f64>() {
        Ok(v) if numeric => LabelKey::number(v),
        _ => LabelKey::text(value),
    }
}

fn enumerated_labels(
    collab: Collaborators<'_>,
    project: &str,
    property: &str,
    numeric: bool,
    scope: &LabelScope,
) -> Vec<Label> {
    let mut seen = FxHashSet::default();
    collab
        .model
        .property_values(project, property)
        .into_iter()
        .filter_map(|value| {
            let key = numeric_or_text_key(&value, numeric);
            if !seen.insert(key.clone())
                || !scope.allows_value(&key, |v| numeric_or_text_key(v, numeric))
            {
                return None;
            }
            Some(Label::new(value, key))
        })
        .collect()
}

/// Groups by numeric value keeping the first literal seen; numeric labels ascend, anything that
/// does not parse follows in source order.
fn free_numeric_labels(values: &[String]) -> Vec<Label> {
    let mut numeric: Vec<(f64, Label)> = Vec::new();
    let mut other: Vec<Label> = Vec::new();
    let mut seen = FxHashSet::default();
    for raw in values {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                let key = LabelKey::number(v);
                if seen.insert(key.clone()) {
                    numeric.push((v, Label::new(text, key)));
                }
            }
            _ => {
                let key = LabelKey::text(text);
                if seen.insert(key.clone()) {
                    other.push(Label::new(text, key));
                }
            }
        }
    }
    numeric.sort_by(|a, b| a.0.total_cmp(&b.0));
    numeric.into_iter().map(|(_, l)| l).chain(other).collect()
}

fn formula_labels(values: &[String], precision: usize) -> Vec<Label> {
    let mut numbers: Vec<f64> = values
        .iter()
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| round_to(v, precision))
        .collect();
    numbers.sort_by(f64::total_cmp);
    numbers.dedup_by(|a, b| LabelKey::number(*a) == LabelKey::number(*b));
    numbers
        .into_iter()
        .map(|v| Label::new(format_number(v), LabelKey::number(v)))
        .collect()
}

fn free_text_labels(values: &[String]) -> Vec<Label> {
    let mut seen = FxHashSet::default();
    let mut labels: Vec<Label> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter_map(|v| {
            let key = LabelKey::text(v);
            seen.insert(key.clone()).then(|| Label::new(v, key))
        })
        .collect();
    labels.sort_by(|a, b| {
        a.text
            .to_lowercase()
            .cmp(&b.text.to_lowercase())
            .then_with(|| a.text.cmp(&b.text))
    });
    labels
}

/// Every calendar date between the earliest and latest of the observed dates and the overrides.
fn date_labels(
    values: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    project: &ProjectInfo,
) -> Result<Vec<Label>> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AxisLabelError::StartAfterEnd {
                start: format_date(s, &project.date_format),
                end: format_date(e, &project.date_format),
            }
            .into());
        }
    }
    let dates = values
        .iter()
        .filter_map(|v| parse_stored_date(v, &project.date_format))
        .chain(start)
        .chain(end);
    let (lo, hi) = dates.fold((None::<NaiveDate>, None::<NaiveDate>), |(lo, hi), d| {
        (
            Some(lo.map_or(d, |l| l.min(d))),
            Some(hi.map_or(d, |h| h.max(d))),
        )
    });
    let (Some(lo), Some(hi)) = (lo, hi) else {
        return Ok(Vec::new());
    };

    let mut labels = Vec::new();
    let mut day = lo;
    while day <= hi {
        labels.push(Label::new(
            format_date(day, &project.date_format),
            LabelKey::Date(day),
        ));
        let Some(next) = day.checked_add_days(Days::new(1)) else {
            break;
        };
        day = next;
    }
    Ok(labels)
}

fn user_labels(collab: Collaborators<'_>, project: &str, scope: &LabelScope) -> Vec<Label> {
    let mut users = collab.model.users(project);
    users.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.login.cmp(&b.login))
    });
    users
        .into_iter()
        .map(|u| {
            let key = LabelKey::user(&u.login);
            (format!("{} ({})", u.login, u.name), key)
        })
        .filter(|(_, key)| scope.allows_value(key, LabelKey::user))
        .map(|(text, key)| Label::new(text, key))
        .collect()
}

fn card_labels(
    collab: Collaborators<'_>,
    project: &str,
    card_type: Option<&str>,
    scope: &LabelScope,
) -> Vec<Label> {
    let mut cards = collab.model.cards_of_type(project, card_type.unwrap_or_default());
    cards.sort_by_key(|c| c.number);
    cards
        .into_iter()
        .filter(|c| scope.allows_card(c.number))
        .map(|card| Label {
            text: card.reference(),
            key: LabelKey::Card(card.number),
            card: Some(card),
        })
        .chain(std::iter::once(Label::not_set()))
        .collect()
}

fn tree_labels(
    collab: Collaborators<'_>,
    project: &str,
    tree_name: &str,
    card_type: Option<&str>,
    scope: &LabelScope,
    use_paths: bool,
) -> Vec<Label> {
    let Some(tree) = collab.model.tree(project, tree_name) else {
        return vec![Label::not_set()];
    };
    let nodes: Vec<_> = tree
        .nodes
        .iter()
        .filter(|n| card_type.is_none_or(|t| n.card_type.eq_ignore_ascii_case(t)))
        .filter(|n| scope.allows_card(n.number))
        .filter_map(|n| Some((n, tree.path(n.number)?)))
        .collect();

    let mut seen = FxHashSet::default();
    let unique_paths = nodes.iter().all(|(_, path)| seen.insert(path.clone()));
    let use_paths = use_paths && unique_paths;

    nodes
        .into_iter()
        .map(|(node, path)| {
            let card = collab.model.card(project, node.number);
            let reference = format!("#{} {}", node.number, node.name);
            let text = if use_paths {
                path.join(" > ")
            } else {
                reference
            };
            let key = if unique_paths {
                LabelKey::TreeNode {
                    tree: tree.name.clone(),
                    path,
                }
            } else {
                LabelKey::Card(node.number)
            };
            Label { text, key, card }
        })
        .chain(std::iter::once(Label::not_set()))
        .collect()
}

/// Full-axis index of an `x-labels-start`/`x-labels-end` value.
fn locate_bound<'t>(
    axis: &AxisLabelSet,
    text: Option<&'t str>,
    parameter: &str,
) -> Result<Option<(usize, &'t str)>> {
    let Some(text) = text else {
        return Ok(None);
    };
    match locate_text(axis, text) {
        Some(i) => Ok(Some((i, text))),
        None => Err(AxisLabelError::NotInAxis {
            parameter: parameter.to_string(),
            value: text.to_string(),
        }
        .into()),
    }
}

fn locate_text(axis: &AxisLabelSet, text: &str) -> Option<usize> {
    let text = text.trim();
    let labels = axis.labels();
    if let Some(i) = labels.iter().position(|l| l.text.eq_ignore_ascii_case(text)) {
        return Some(i);
    }
    match axis.kind() {
        AxisKind::Enumerated { numeric: true } | AxisKind::FreeNumeric => {
            let v = text.parse::<f64>().ok()?;
            axis.locate(&LabelKey::number(v))
        }
        AxisKind::Formula => {
            let v = text.parse::<f64>().ok()?;
            labels.iter().position(|l| {
                l.key
                    .as_number()
                    .is_some_and(|n| (n - v).abs() < f64::EPSILON * n.abs().max(1.0))
            })
        }
        AxisKind::Enumerated { numeric: false } | AxisKind::FreeText => {
            axis.locate(&LabelKey::text(text))
        }
        AxisKind::User => axis.locate(&LabelKey::user(text)).or_else(|| {
            let suffix = format!("({})", text.to_lowercase());
            labels
                .iter()
                .position(|l| l.text.to_lowercase().ends_with(&suffix))
        }),
        AxisKind::Card | AxisKind::Tree { .. } => {
            let number = text
                .strip_prefix('#')
                .unwrap_or(text)
                .split_whitespace()
                .next()
                .and_then(|n| n.parse::<u64>().ok());
            let by_number = number.and_then(|n| {
                labels
                    .iter()
                    .position(|l| l.card.as_ref().is_some_and(|c| c.number == n))
            });
            by_number.or_else(|| {
                labels.iter().position(|l| {
                    l.card
                        .as_ref()
                        .is_some_and(|c| c.name.eq_ignore_ascii_case(text))
                })
            })
        }
        AxisKind::Date => None,
    }
}

fn date_bound<'t>(
    axis: &AxisLabelSet,
    date: Option<NaiveDate>,
    text: Option<&'t str>,
) -> Option<(usize, &'t str)> {
    let i = axis.locate(&LabelKey::Date(date?))?;
    Some((i, text.unwrap_or_default()))
}

fn parse_step(text: &str) -> Result<usize> {
    match text.trim().parse::<usize>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(ParameterError::NotNaturalNumber {
            name: "x-labels-step".to_string(),
            value: text.trim().to_string(),
        }
        .into()),
    }
}

/// Renders a date with a project's `strftime` pattern, falling back to ISO when the pattern
/// cannot be formatted.
pub(crate) fn format_date(date: NaiveDate, pattern: &str) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if write!(out, "{}", date.format(pattern)).is_err() {
        return date.format("%Y-%m-%d").to_string();
    }
    out
}

/// Parses a stored date value: ISO first, then the project's display pattern.
pub(crate) fn parse_stored_date(text: &str, pattern: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, pattern))
        .ok()
}

/// Parses an `x-labels-start`/`x-labels-end` date override. Besides stored-date syntax this
/// accepts `today`, `yesterday` and `tomorrow`, which make the render date-dependent.
fn parse_override_date(
    text: &str,
    parameter: &str,
    project: &ProjectInfo,
    ctx: &RenderContext,
) -> Result<NaiveDate> {
    if let Some(date) = parse_stored_date(text, &project.date_format) {
        return Ok(date);
    }
    let today = runtime::today();
    let relative = match text.trim().to_ascii_lowercase().as_str() {
        "today" => Some(today),
        "yesterday" => today.checked_sub_days(Days::new(1)),
        "tomorrow" => today.checked_add_days(Days::new(1)),
        _ => None,
    };
    match relative {
        Some(date) => {
            ctx.mark_volatile();
            Ok(date)
        }
        None => Err(ParameterError::InvalidDate {
            name: parameter.to_string(),
            value: text.trim().to_string(),
        }
        .into()),
    }
}
