//! Data series: resolution of a `series` entry, query execution, alignment onto the x-axis,
//! accumulation, down-from inversion and trend lines.

mod trend;

pub use trend::{TrendIgnore, TrendScope, trend_line};

use crate::axis::{AxisLabelSet, KeyResolver};
use crate::config::ChartConfig;
use crate::context::RenderContext;
use crate::error::{ParameterError, Result, bold};
use crate::model::ProjectInfo;
use crate::mql::{Aggregate, Query};
use crate::params::{ParamMap, ParameterResolver, ParameterSet, SERIES_PARAMETERS};
use crate::query::{Collaborators, QueryRow};
use crate::region::{self, RegionEntry};
use rustc_hash::FxHashMap;
use std::cell::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    OverlayTop,
    OverlayBottom,
    Total,
}

impl Combine {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "overlay-top" => Some(Self::OverlayTop),
            "overlay-bottom" => Some(Self::OverlayBottom),
            "total" => Some(Self::Total),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OverlayTop => "overlay-top",
            Self::OverlayBottom => "overlay-bottom",
            Self::Total => "total",
        }
    }

    pub fn is_overlay(self) -> bool {
        matches!(self, Self::OverlayTop | Self::OverlayBottom)
    }
}

/// Chart-level settings a series falls back to for attributes it leaves unset.
#[derive(Debug, Clone, Default)]
pub struct SeriesDefaults {
    pub conditions: Option<String>,
    pub cumulative: bool,
    pub chart_type: Option<String>,
    pub data_point_symbol: Option<String>,
    pub line_style: Option<String>,
    pub line_width: Option<f64>,
    pub data_labels: bool,
    pub trend: bool,
    pub trend_scope: Option<String>,
    pub trend_ignore: Option<String>,
    pub trend_line_color: Option<String>,
    pub trend_line_style: Option<String>,
    pub trend_line_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStyle {
    pub chart_type: String,
    pub color: String,
    pub data_point_symbol: String,
    pub line_style: String,
    pub line_width: f64,
    pub data_labels: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSpec {
    pub scope: TrendScope,
    pub ignore: TrendIgnore,
    pub color: String,
    pub line_style: String,
    pub line_width: f64,
}

/// A `series` entry after parameter resolution, before any query has run.
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    /// Declaration index within the chart.
    pub index: usize,
    pub label: String,
    /// The `data` query as the author wrote it.
    pub data_text: String,
    /// The `data` query restricted with the chart conditions.
    pub data: Query,
    pub down_from: Option<Query>,
    pub combine: Option<Combine>,
    pub project: ProjectInfo,
    pub cumulative: bool,
    pub hidden: bool,
    pub style: SeriesStyle,
    pub trend: Option<TrendSpec>,
}

/// Series-first, then chart, then site default.
fn fallback<T>(series: Option<T>, chart: Option<T>, default: T) -> T {
    series.or(chart).unwrap_or(default)
}

impl SeriesSpec {
    pub fn resolve(
        index: usize,
        map: &ParamMap,
        defaults: &SeriesDefaults,
        config: &ChartConfig,
        resolver: &ParameterResolver<'_>,
        collab: Collaborators<'_>,
        chart_project: &ProjectInfo,
    ) -> Result<Self> {
        let set = ParameterSet::new(map, SERIES_PARAMETERS);
        set.check_known()?;

        let label = resolver
            .text(&set, "label")?
            .unwrap_or_else(|| format!("Series {}", index + 1));

        let data_text = resolver.text(&set, "data")?.unwrap_or_default();
        let data = Query::parse(&data_text)?;
        if !data.is_category_aggregate() {
            return Err(ParameterError::invalid(
                "data",
                format!(
                    "Series {}: {} must select one property and one aggregate, e.g. {}.",
                    bold(&label),
                    bold(&data_text),
                    bold("SELECT Status, COUNT(*)")
                ),
            )
            .into());
        }
        let conditions = defaults.conditions.as_deref();
        let data = data.restrict_with(conditions);

        let cumulative = resolver
            .boolean(&set, "cumulative")?
            .unwrap_or(defaults.cumulative);

        let down_from = match resolver.text(&set, "down-from")? {
            None => None,
            Some(_) if !cumulative => {
                return Err(ParameterError::invalid(
                    "down-from",
                    format!(
                        "Series {}: down-from requires {}.",
                        bold(&label),
                        bold("cumulative: true")
                    ),
                )
                .into());
            }
            Some(text) => {
                let query = Query::parse(&text)?;
                if !query.is_single_aggregate() {
                    return Err(ParameterError::invalid(
                        "down-from",
                        format!(
                            "Series {}: {} must select a single aggregate, e.g. {}.",
                            bold(&label),
                            bold(&text),
                            bold("SELECT SUM(Size)")
                        ),
                    )
                    .into());
                }
                Some(query.restrict_with(conditions))
            }
        };

        let combine = resolver
            .text(&set, "combine")?
            .and_then(|c| Combine::parse(&c));

        let project = match resolver.text(&set, "project")? {
            None => chart_project.clone(),
            Some(identifier) => resolve_project(collab, &identifier, &label)?,
        };

        let hidden = resolver.boolean(&set, "hidden")?.unwrap_or(false);

        let color = resolver
            .text(&set, "color")?
            .unwrap_or_else(|| config.palette_color(index));
        let style = SeriesStyle {
            chart_type: fallback(
                resolver.text(&set, "type")?,
                defaults.chart_type.clone(),
                config.get_str("chart.type").unwrap_or("line").to_string(),
            ),
            data_point_symbol: fallback(
                resolver.text(&set, "data-point-symbol")?,
                defaults.data_point_symbol.clone(),
                config
                    .get_str("series.dataPointSymbol")
                    .unwrap_or("circle")
                    .to_string(),
            ),
            line_style: fallback(
                resolver.text(&set, "line-style")?,
                defaults.line_style.clone(),
                config
                    .get_str("series.lineStyle")
                    .unwrap_or("solid")
                    .to_string(),
            ),
            line_width: fallback(
                resolver.number(&set, "line-width")?,
                defaults.line_width,
                config.get_f64("series.lineWidth").unwrap_or(2.0),
            ),
            data_labels: resolver
                .boolean(&set, "data-labels")?
                .unwrap_or(defaults.data_labels),
            color: color.clone(),
        };

        let scope = match resolver
            .text(&set, "trend-scope")?
            .or_else(|| defaults.trend_scope.clone())
        {
            Some(text) => TrendScope::parse(&text)?,
            None => TrendScope::All,
        };
        let ignore = resolver
            .text(&set, "trend-ignore")?
            .or_else(|| defaults.trend_ignore.clone())
            .and_then(|t| TrendIgnore::parse(&t))
            .unwrap_or(TrendIgnore::ZeroesAtEndAndLastValue);
        let trend_color = resolver.text(&set, "trend-line-color")?;
        let trend_style = resolver.text(&set, "trend-line-style")?;
        let trend_width = resolver.number(&set, "trend-line-width")?;
        let trend = resolver
            .boolean(&set, "trend")?
            .unwrap_or(defaults.trend)
            .then(|| TrendSpec {
                scope,
                ignore,
                color: trend_color
                    .or_else(|| defaults.trend_line_color.clone())
                    .unwrap_or(color),
                line_style: fallback(
                    trend_style,
                    defaults.trend_line_style.clone(),
                    config.get_str("trend.lineStyle").unwrap_or("dash").to_string(),
                ),
                line_width: fallback(
                    trend_width,
                    defaults.trend_line_width,
                    config.get_f64("trend.lineWidth").unwrap_or(2.0),
                ),
            });

        Ok(Self {
            index,
            label,
            data_text,
            data,
            down_from,
            combine,
            project,
            cumulative,
            hidden,
            style,
            trend,
        })
    }

    /// Runs the `data` query, and the `down-from` query when there is one.
    ///
    /// `AVG` series run the `SUM` and `COUNT` forms instead, so that categories merged on the
    /// axis average over all of their records.
    pub fn fetch(&self, collab: Collaborators<'_>, ctx: &RenderContext) -> Result<Fetched> {
        let options = ctx.query_options();
        let project = &self.project.identifier;
        let run = |query: &Query, what: &str| {
            let query = query.to_string();
            tracing::debug!(series = %self.label, %project, %query, "executing {what} query");
            collab.queries.execute(&query, project, &options)
        };

        let averaged = matches!(self.data.aggregate(), Some((Aggregate::Avg, _)));
        let (rows, weights) = if averaged {
            let sums = run(&self.data.with_aggregate(Aggregate::Sum), "series sum")?;
            let counts: FxHashMap<Option<String>, f64> =
                run(&self.data.with_aggregate(Aggregate::Count), "series count")?
                    .into_iter()
                    .map(|r| (r.category, r.value.unwrap_or(0.0)))
                    .collect();
            let weights = sums
                .iter()
                .map(|r| counts.get(&r.category).copied().unwrap_or(0.0))
                .collect();
            (sums, weights)
        } else {
            (run(&self.data, "series")?, Vec::new())
        };

        let ceiling = match &self.down_from {
            None => None,
            Some(down_from) => {
                let rows = run(down_from, "down-from")?;
                Some(rows.first().and_then(|r| r.value).unwrap_or(0.0))
            }
        };
        Ok(Fetched {
            rows,
            weights,
            ceiling,
        })
    }

    pub fn category_property(&self) -> Option<&str> {
        self.data.category_property()
    }
}

fn resolve_project(
    collab: Collaborators<'_>,
    identifier: &str,
    series: &str,
) -> Result<ProjectInfo> {
    let Some(project) = collab.model.project(identifier) else {
        return Err(ParameterError::invalid(
            "project",
            format!(
                "Series {}: there is no project with identifier {}.",
                bold(series),
                bold(identifier)
            ),
        )
        .into());
    };
    if !project.accessible {
        return Err(ParameterError::invalid(
            "project",
            format!(
                "Series {}: you are not a member of project {}.",
                bold(series),
                bold(&project.name)
            ),
        )
        .into());
    }
    Ok(project)
}

/// Raw query output for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub rows: Vec<QueryRow>,
    /// Records behind each row of an averaged series, parallel to `rows`; empty otherwise.
    pub weights: Vec<f64>,
    /// Value of the `down-from` query.
    pub ceiling: Option<f64>,
}

#[derive(Debug)]
pub struct Series {
    spec: SeriesSpec,
    /// Aggregate per full-axis label.
    increments: Vec<f64>,
    ceiling: Option<f64>,
    /// Plotted values, starting with the start label when it is shown.
    values: Vec<f64>,
    trend: Vec<f64>,
    regions: OnceCell<Result<Vec<RegionEntry>>>,
    predicates: OnceCell<Vec<Option<String>>>,
}

impl Series {
    /// Aligns fetched rows onto `axis` and computes the plotted values.
    pub fn align(
        spec: SeriesSpec,
        fetched: Fetched,
        axis: &AxisLabelSet,
        collab: Collaborators<'_>,
        chart_project: &str,
    ) -> Self {
        let keys = KeyResolver::new(axis, collab.model, &spec.project, chart_project);
        let mut groups: Vec<Vec<(f64, f64)>> = vec![Vec::new(); axis.len()];
        for (n, row) in fetched.rows.iter().enumerate() {
            let weight = fetched.weights.get(n).copied().unwrap_or(1.0);
            match keys.position(row.category.as_deref()) {
                Some(i) => groups[i].extend(row.value.map(|v| (v, weight))),
                None => tracing::trace!(
                    series = %spec.label,
                    category = ?row.category,
                    "category is not on the x-axis"
                ),
            }
        }
        let aggregate = spec
            .data
            .aggregate()
            .map_or(Aggregate::Count, |(function, _)| function);
        let increments: Vec<f64> = groups.iter().map(|g| merge(aggregate, g)).collect();

        let values = plotted_values(&increments, axis, spec.cumulative, fetched.ceiling);
        let trend = match &spec.trend {
            Some(t) => {
                let deltas = plotted_increments(&values, spec.cumulative, fetched.ceiling);
                trend_line(&values, &deltas, t.scope, t.ignore)
            }
            None => Vec::new(),
        };

        Self {
            spec,
            increments,
            ceiling: fetched.ceiling,
            values,
            trend,
            regions: OnceCell::new(),
            predicates: OnceCell::new(),
        }
    }

    pub fn spec(&self) -> &SeriesSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Regression line over `values`; empty when disabled or when there is too little data.
    pub fn trend(&self) -> &[f64] {
        &self.trend
    }

    pub fn trend_label(&self) -> String {
        format!("{} Trend", self.spec.label)
    }

    pub fn increments(&self) -> &[f64] {
        &self.increments
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn is_hidden(&self) -> bool {
        self.spec.hidden
    }

    pub fn combine(&self) -> Option<Combine> {
        self.spec.combine
    }

    /// Records behind each plotted point, queried on first use.
    pub(crate) fn regions(
        &self,
        axis: &AxisLabelSet,
        collab: Collaborators<'_>,
        ctx: &RenderContext,
    ) -> &Result<Vec<RegionEntry>> {
        self.regions
            .get_or_init(|| region::collect_records(self, axis, collab, ctx))
    }

    /// Predicates reproducing each plotted point's records.
    pub(crate) fn predicates(
        &self,
        axis: &AxisLabelSet,
        collab: Collaborators<'_>,
        chart_project: &str,
    ) -> &[Option<String>] {
        self.predicates
            .get_or_init(|| region::predicates(self, axis, collab, chart_project))
    }
}

/// Folds the rows that landed on one label. For `AVG`, each row is a `(sum, count)` pair.
fn merge(aggregate: Aggregate, rows: &[(f64, f64)]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let values = rows.iter().map(|(v, _)| *v);
    match aggregate {
        Aggregate::Count | Aggregate::Sum => values.sum(),
        Aggregate::Min => values.fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Avg => {
            let count: f64 = rows.iter().map(|(_, w)| w).sum();
            if count > 0.0 {
                values.sum::<f64>() / count
            } else {
                0.0
            }
        }
    }
}

fn plotted_values(
    increments: &[f64],
    axis: &AxisLabelSet,
    cumulative: bool,
    ceiling: Option<f64>,
) -> Vec<f64> {
    let running: Vec<f64> = increments
        .iter()
        .scan(0.0, |total, v| {
            *total += v;
            Some(*total)
        })
        .collect();
    let at = |i: usize| if cumulative { running[i] } else { increments[i] };
    let measure = |v: f64| ceiling.map_or(v, |c| c - v);

    let start = axis.window_start();
    let baseline = if cumulative && start > 0 {
        running[start - 1]
    } else {
        0.0
    };

    axis.start_label()
        .map(|_| measure(baseline))
        .into_iter()
        .chain(axis.positions().iter().map(|&i| measure(at(i))))
        .collect()
}

/// Change contributed by each plotted point, used to spot trailing placeholders.
fn plotted_increments(values: &[f64], cumulative: bool, ceiling: Option<f64>) -> Vec<f64> {
    if !cumulative {
        return values.to_vec();
    }
    let mut previous = ceiling.unwrap_or(0.0);
    values
        .iter()
        .map(|v| {
            let delta = v - previous;
            previous = *v;
            delta
        })
        .collect()
}

/// Makes series labels unique: labels that occur once are kept, repeated labels get the first
/// free ` (n)` suffix in declaration order.
pub fn disambiguate_labels(labels: &[String]) -> Vec<String> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for label in labels {
        *counts.entry(label.as_str()).or_default() += 1;
    }
    let mut used: rustc_hash::FxHashSet<String> = labels
        .iter()
        .filter(|l| counts[l.as_str()] == 1)
        .cloned()
        .collect();

    labels
        .iter()
        .map(|label| {
            if counts[label.as_str()] == 1 {
                return label.clone();
            }
            let mut n = 1;
            loop {
                let candidate = format!("{label} ({n})");
                if used.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn repeated_labels_take_the_next_free_suffix() {
        assert_eq!(
            disambiguate_labels(&strings(&["Scope", "Scope", "Scope (1)"])),
            strings(&["Scope (2)", "Scope (3)", "Scope (1)"])
        );
        assert_eq!(
            disambiguate_labels(&strings(&["A", "B", "A"])),
            strings(&["A (1)", "B", "A (2)"])
        );
    }

    #[test]
    fn merging_follows_the_aggregate() {
        let rows = [(3.0, 1.0), (2.0, 1.0)];
        assert_eq!(merge(Aggregate::Count, &rows), 5.0);
        assert_eq!(merge(Aggregate::Max, &rows), 3.0);
        assert_eq!(merge(Aggregate::Min, &rows), 2.0);
        assert_eq!(merge(Aggregate::Sum, &[]), 0.0);
    }

    #[test]
    fn averages_weigh_rows_by_their_record_count() {
        // "2.0" holds one record worth 10, "2" holds two records worth 1 each.
        assert_eq!(merge(Aggregate::Avg, &[(10.0, 1.0), (2.0, 2.0)]), 4.0);
        assert_eq!(merge(Aggregate::Avg, &[(0.0, 0.0)]), 0.0);
    }

    #[test]
    fn cumulative_increments_start_from_the_ceiling() {
        assert_eq!(
            plotted_increments(&[43.0, 33.0, 33.0], true, Some(43.0)),
            vec![0.0, -10.0, 0.0]
        );
        assert_eq!(
            plotted_increments(&[1.0, 0.0], false, None),
            vec![1.0, 0.0]
        );
    }
}
