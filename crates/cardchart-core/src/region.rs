//! Drill-down regions: the records behind each plotted point and a predicate that selects them.
//!
//! Records come from the series' own `data` query (and its `down-from` query), bucketed through
//! the same key resolution used for the values, so a region always agrees with its point.

use crate::axis::{AxisLabelSet, KeyResolver, PredicateValue};
use crate::context::RenderContext;
use crate::error::Result;
use crate::mql::quote;
use crate::query::{Collaborators, RecordRow};
use crate::series::Series;
use rustc_hash::FxHashSet;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    pub number: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionEntry {
    /// Most recently created first.
    pub records: Vec<RecordRef>,
    pub count: usize,
}

impl RegionEntry {
    fn from_rows<'r>(rows: impl IntoIterator<Item = &'r RecordRow>) -> Self {
        let mut rows: Vec<&RecordRow> = rows.into_iter().collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        let records: Vec<RecordRef> = rows
            .into_iter()
            .map(|r| RecordRef {
                number: r.number,
                name: r.name.clone(),
            })
            .collect();
        Self {
            count: records.len(),
            records,
        }
    }
}

/// Full-axis indices whose records make up each plotted point, in plotted order.
fn windows(axis: &AxisLabelSet, cumulative: bool) -> Vec<Vec<usize>> {
    let start = axis.start_label().map(|_| {
        if cumulative {
            (0..axis.window_start()).collect()
        } else {
            Vec::new()
        }
    });
    start
        .into_iter()
        .chain(axis.positions().iter().map(|&i| {
            if cumulative {
                (0..=i).collect()
            } else {
                vec![i]
            }
        }))
        .collect()
}

pub(crate) fn collect_records(
    series: &Series,
    axis: &AxisLabelSet,
    collab: Collaborators<'_>,
    ctx: &RenderContext,
) -> Result<Vec<RegionEntry>> {
    let spec = series.spec();
    let options = ctx.query_options();
    let project = &spec.project.identifier;

    let query = spec.data.to_string();
    tracing::debug!(series = %spec.label, %project, %query, "collecting region records");
    let rows = collab.queries.records(&query, project, &options)?;

    let keys = KeyResolver::new(axis, collab.model, &spec.project, ctx.project());
    let mut by_label: Vec<Vec<&RecordRow>> = vec![Vec::new(); axis.len()];
    for row in &rows {
        if let Some(i) = keys.position(row.category.as_deref()) {
            by_label[i].push(row);
        }
    }

    let ceiling_rows = match &spec.down_from {
        Some(down_from) => {
            let query = down_from.to_string();
            Some(collab.queries.records(&query, project, &options)?)
        }
        None => None,
    };

    let entries = windows(axis, spec.cumulative)
        .into_iter()
        .map(|window| {
            let selected = window.iter().flat_map(|&i| by_label[i].iter().copied());
            match &ceiling_rows {
                None => RegionEntry::from_rows(selected),
                Some(ceiling) => {
                    let done: FxHashSet<u64> = selected.map(|r| r.id).collect();
                    RegionEntry::from_rows(ceiling.iter().filter(|r| !done.contains(&r.id)))
                }
            }
        })
        .collect();
    Ok(entries)
}

pub(crate) fn predicates(
    series: &Series,
    axis: &AxisLabelSet,
    collab: Collaborators<'_>,
    chart_project: &str,
) -> Vec<Option<String>> {
    let spec = series.spec();
    let keys = KeyResolver::new(axis, collab.model, &spec.project, chart_project);
    let Some(property) = spec.data.category_property() else {
        return vec![None; axis.plotted_len()];
    };
    let property = quote(property);
    let data_predicate = spec.data.predicate.as_deref();

    windows(axis, spec.cumulative)
        .into_iter()
        .map(|window| {
            let values: Vec<PredicateValue> = window
                .iter()
                .filter_map(|&i| keys.predicate_value(&axis.labels()[i]))
                .collect();
            let selection = if spec.cumulative {
                in_window(&property, &values)
            } else {
                Some(equal_to(&property, values.first()?))
            };
            match &spec.down_from {
                None => Some(and(&selection?, data_predicate)),
                Some(down_from) => Some(remaining(
                    selection.map(|s| and(&s, data_predicate)).as_deref(),
                    down_from.predicate.as_deref(),
                )),
            }
        })
        .collect()
}

/// Ceiling records outside the `done` selection. Nothing is done yet when `done` is `None`.
fn remaining(done: Option<&str>, ceiling: Option<&str>) -> String {
    match (done, ceiling) {
        (Some(done), Some(ceiling)) => {
            format!("({ceiling}) AND NOT NUMBER IN (SELECT NUMBER WHERE {done})")
        }
        (Some(done), None) => format!("NOT NUMBER IN (SELECT NUMBER WHERE {done})"),
        (None, Some(ceiling)) => format!("({ceiling})"),
        (None, None) => "NUMBER IS NOT NULL".to_string(),
    }
}

fn and(selection: &str, predicate: Option<&str>) -> String {
    match predicate {
        Some(p) => format!("{selection} AND ({p})"),
        None => selection.to_string(),
    }
}

fn equal_to(property: &str, value: &PredicateValue) -> String {
    match value {
        PredicateValue::Literal(v) => format!("{property} = {v}"),
        PredicateValue::Card(n) => format!("{property} = NUMBER {n}"),
        PredicateValue::NotSet => format!("{property} IS NULL"),
    }
}

/// `prop IN (…)`, `prop NUMBER IN (…)` and `prop IS NULL`, OR-ed together when more than one
/// applies.
fn in_window(property: &str, values: &[PredicateValue]) -> Option<String> {
    let mut literals = Vec::new();
    let mut cards = Vec::new();
    let mut not_set = false;
    for value in values {
        match value {
            PredicateValue::Literal(v) => literals.push(v.clone()),
            PredicateValue::Card(n) => cards.push(n.to_string()),
            PredicateValue::NotSet => not_set = true,
        }
    }

    let mut parts = Vec::new();
    if !literals.is_empty() {
        parts.push(format!("{property} IN ({})", literals.join(", ")));
    }
    if !cards.is_empty() {
        parts.push(format!("{property} NUMBER IN ({})", cards.join(", ")));
    }
    if not_set {
        parts.push(format!("{property} IS NULL"));
    }
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(" OR "))),
    }
}
