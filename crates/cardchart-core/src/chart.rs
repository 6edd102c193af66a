//! Chart assembly: chart-level parameters, series, x-axis, combination and the JSON description.

use crate::axis::{self, AxisLabelSet, AxisRequest};
use crate::combine;
use crate::config::ChartConfig;
use crate::context::RenderContext;
use crate::error::{Error, Result, bold};
use crate::model::ProjectInfo;
use crate::params::{CHART_PARAMETERS, ParameterResolver, ParameterSet, parse_block};
use crate::query::Collaborators;
use crate::region::RegionEntry;
use crate::runtime;
use crate::series::{Series, SeriesDefaults, SeriesSpec, disambiguate_labels};
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Chart-wide presentation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub chart_type: String,
    pub width: f64,
    pub height: f64,
    pub title: Option<String>,
    pub x_title: Option<String>,
    pub y_title: Option<String>,
    pub legend_position: String,
    pub three_d: bool,
    pub show_guide_lines: bool,
}

/// `region_data`: plotted label, then series label.
pub type RegionData = IndexMap<String, IndexMap<String, RegionEntry>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionMql {
    /// Plotted label, then series label.
    pub conditions: IndexMap<String, IndexMap<String, String>>,
    pub project_identifier: IndexMap<String, String>,
}

/// A rendered chart. Values are final; region data is computed on first request.
#[derive(Debug)]
pub struct Chart<'a> {
    collab: Collaborators<'a>,
    ctx: &'a RenderContext,
    fixed_today: Option<NaiveDate>,
    project: ProjectInfo,
    axis: AxisLabelSet,
    series: Vec<Series>,
    layout: Layout,
}

pub(crate) fn build<'a>(
    params: &str,
    config: &ChartConfig,
    fixed_today: Option<NaiveDate>,
    ctx: &'a RenderContext,
    collab: Collaborators<'a>,
) -> Result<Chart<'a>> {
    let map = parse_block(params)?;
    let set = ParameterSet::new(&map, CHART_PARAMETERS);
    set.check_known()?;

    let Some(project) = collab.model.project(ctx.project()) else {
        return Err(Error::Unsupported {
            message: format!("Project {} does not exist.", bold(ctx.project())),
        });
    };
    let resolver = ParameterResolver::new(ctx, collab.model);

    let defaults = SeriesDefaults {
        conditions: resolver.text(&set, "conditions")?,
        cumulative: resolver.boolean(&set, "cumulative")?.unwrap_or(false),
        chart_type: resolver.text(&set, "chart-type")?,
        data_point_symbol: resolver.text(&set, "data-point-symbol")?,
        line_style: resolver.text(&set, "line-style")?,
        line_width: resolver.number(&set, "line-width")?,
        data_labels: resolver.boolean(&set, "data-labels")?.unwrap_or(false),
        trend: resolver.boolean(&set, "trend")?.unwrap_or(false),
        trend_scope: resolver.text(&set, "trend-scope")?,
        trend_ignore: resolver.text(&set, "trend-ignore")?,
        trend_line_color: resolver.text(&set, "trend-line-color")?,
        trend_line_style: resolver.text(&set, "trend-line-style")?,
        trend_line_width: resolver.number(&set, "trend-line-width")?,
    };

    let mut specs = resolver
        .list(&set, "series")?
        .iter()
        .enumerate()
        .map(|(i, map)| SeriesSpec::resolve(i, map, &defaults, config, &resolver, collab, &project))
        .collect::<Result<Vec<_>>>()?;
    let labels: Vec<String> = specs.iter().map(|s| s.label.clone()).collect();
    for (spec, label) in specs.iter_mut().zip(disambiguate_labels(&labels)) {
        spec.label = label;
    }

    let fetched = specs
        .iter()
        .map(|s| s.fetch(collab, ctx))
        .collect::<Result<Vec<_>>>()?;
    let observed: Vec<String> = fetched
        .iter()
        .flat_map(|f| f.rows.iter().filter_map(|r| r.category.clone()))
        .collect();

    let property = match resolver.text(&set, "x-labels-property")? {
        Some(p) => p,
        None => specs
            .first()
            .and_then(|s| s.category_property())
            .unwrap_or_default()
            .to_string(),
    };
    let start_label = if resolver.boolean(&set, "show-start-label")?.unwrap_or(false) {
        Some(resolver.text(&set, "start-label")?.unwrap_or_else(|| {
            config.get_str("startLabel").unwrap_or("Start").to_string()
        }))
    } else {
        None
    };
    let tree = resolver.text(&set, "x-labels-tree")?;
    let conditions = resolver.text(&set, "x-labels-conditions")?;
    let start = resolver.text(&set, "x-labels-start")?;
    let end = resolver.text(&set, "x-labels-end")?;
    let step = resolver.text(&set, "x-labels-step")?;

    let axis = axis::build(
        &AxisRequest {
            project: &project,
            property: &property,
            tree: tree.as_deref(),
            conditions: conditions.as_deref(),
            start: start.as_deref(),
            end: end.as_deref(),
            step: step.as_deref(),
            start_label: start_label.as_deref(),
            observed: &observed,
        },
        collab,
        ctx,
    )?;

    let series: Vec<Series> = specs
        .into_iter()
        .zip(fetched)
        .map(|(spec, fetched)| Series::align(spec, fetched, &axis, collab, &project.identifier))
        .collect();
    combine::validate(&series, &axis.labels_for_plot())?;

    let layout = layout(&resolver, &set, config)?;

    Ok(Chart {
        collab,
        ctx,
        fixed_today,
        project,
        axis,
        series,
        layout,
    })
}

fn layout(
    resolver: &ParameterResolver<'_>,
    set: &ParameterSet<'_>,
    config: &ChartConfig,
) -> Result<Layout> {
    let preset = resolver.text(set, "chart-size")?;
    let preset_dimension = |dimension: &str| {
        preset
            .as_deref()
            .and_then(|p| config.get_f64(&format!("chart.sizes.{p}.{dimension}")))
    };
    Ok(Layout {
        chart_type: resolver
            .text(set, "chart-type")?
            .unwrap_or_else(|| config.get_str("chart.type").unwrap_or("line").to_string()),
        width: resolver
            .number(set, "chart-width")?
            .or_else(|| preset_dimension("width"))
            .or_else(|| config.get_f64("chart.width"))
            .unwrap_or(600.0),
        height: resolver
            .number(set, "chart-height")?
            .or_else(|| preset_dimension("height"))
            .or_else(|| config.get_f64("chart.height"))
            .unwrap_or(450.0),
        title: resolver.text(set, "title")?,
        x_title: resolver.text(set, "x-title")?,
        y_title: resolver.text(set, "y-title")?,
        legend_position: resolver.text(set, "legend-position")?.unwrap_or_else(|| {
            config
                .get_str("legend.position")
                .unwrap_or("bottom")
                .to_string()
        }),
        three_d: resolver.boolean(set, "three-d")?.unwrap_or(false),
        show_guide_lines: resolver.boolean(set, "show-guide-lines")?.unwrap_or(true),
    })
}

/// Integral values serialize as integers.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

impl<'a> Chart<'a> {
    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    pub fn axis(&self) -> &AxisLabelSet {
        &self.axis
    }

    /// Every series in declaration order, hidden ones included.
    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn labels_for_plot(&self) -> Vec<String> {
        self.axis.labels_for_plot()
    }

    /// False when anything in the chart depends on the viewer or on the current date.
    pub fn is_cacheable(&self) -> bool {
        !self.ctx.is_volatile()
    }

    /// Informational notices collected while rendering.
    pub fn notices(&self) -> Vec<String> {
        self.ctx.notices().iter().map(ToString::to_string).collect()
    }

    fn visible(&self) -> impl Iterator<Item = &Series> {
        self.series.iter().filter(|s| !s.is_hidden())
    }

    /// Records behind every plotted point of every visible series. Series whose records cannot
    /// be collected are left out.
    pub fn region_data(&self) -> RegionData {
        let labels = self.axis.labels_for_plot();
        let mut out: RegionData = labels
            .iter()
            .map(|l| (l.clone(), IndexMap::new()))
            .collect();
        for series in self.visible() {
            let regions = runtime::with_fixed_today(self.fixed_today, || {
                series.regions(&self.axis, self.collab, self.ctx)
            });
            let entries = match regions {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(series = %series.label(), %err, "region data unavailable");
                    continue;
                }
            };
            for (label, entry) in labels.iter().zip(entries) {
                if let Some(by_series) = out.get_mut(label) {
                    by_series.insert(series.label().to_string(), entry.clone());
                }
            }
        }
        out
    }

    /// Predicates reproducing each region, and the project each series queries.
    pub fn region_mql(&self) -> RegionMql {
        let labels = self.axis.labels_for_plot();
        let mut conditions: IndexMap<String, IndexMap<String, String>> = labels
            .iter()
            .map(|l| (l.clone(), IndexMap::new()))
            .collect();
        let mut project_identifier = IndexMap::new();
        for series in self.visible() {
            let predicates = series.predicates(&self.axis, self.collab, &self.project.identifier);
            for (label, predicate) in labels.iter().zip(predicates) {
                if let (Some(predicate), Some(by_series)) = (predicate, conditions.get_mut(label)) {
                    by_series.insert(series.label().to_string(), predicate.clone());
                }
            }
            project_identifier.insert(
                series.label().to_string(),
                series.spec().project.identifier.clone(),
            );
        }
        RegionMql {
            conditions,
            project_identifier,
        }
    }

    /// The chart description consumed by the client-side renderer.
    pub fn description(&self) -> Value {
        let labels = self.axis.labels_for_plot();
        let mut columns = Vec::new();
        let mut types = Map::new();
        let mut colors = Map::new();
        let mut symbols = Map::new();
        let mut styles = Map::new();
        let mut widths = Map::new();
        let mut trends = Vec::new();
        let mut regions = Map::new();
        let mut data_labels = Vec::new();

        for series in self.visible() {
            let spec = series.spec();
            let label = series.label().to_string();
            columns.push(Value::Array(
                std::iter::once(Value::String(label.clone()))
                    .chain(series.values().iter().map(|v| number(*v)))
                    .collect(),
            ));
            types.insert(label.clone(), json!(spec.style.chart_type));
            colors.insert(label.clone(), json!(spec.style.color));
            symbols.insert(label.clone(), json!(spec.style.data_point_symbol));
            styles.insert(label.clone(), json!(spec.style.line_style));
            widths.insert(label.clone(), number(spec.style.line_width));
            if spec.style.data_labels {
                data_labels.push(json!(label));
            }

            let Some(trend) = spec.trend.as_ref().filter(|_| !series.trend().is_empty()) else {
                continue;
            };
            let name = series.trend_label();
            columns.push(Value::Array(
                std::iter::once(Value::String(name.clone()))
                    .chain(series.trend().iter().map(|v| number(*v)))
                    .collect(),
            ));
            types.insert(name.clone(), json!("line"));
            colors.insert(name.clone(), json!(trend.color));
            symbols.insert(name.clone(), json!("none"));
            styles.insert(name.clone(), json!(trend.line_style));
            widths.insert(name.clone(), number(trend.line_width));
            if trend.line_style == "dash" {
                regions.insert(name.clone(), json!([{ "style": "dashed" }]));
            }
            trends.push(json!(name));
        }

        let x_title = self
            .layout
            .x_title
            .clone()
            .unwrap_or_else(|| self.axis.property().name.clone());
        let y_title = self.layout.y_title.clone().unwrap_or_else(|| {
            self.series
                .first()
                .and_then(|s| s.spec().data.columns.get(1))
                .map(ToString::to_string)
                .unwrap_or_default()
        });

        json!({
            "data": {
                "columns": columns,
                "type": self.layout.chart_type,
                "types": types,
                "colors": colors,
                "groups": combine::groups(&self.series),
                "trends": trends,
                "regions": regions,
                "labels": data_labels,
            },
            "axis": {
                "x": {
                    "type": "category",
                    "categories": labels,
                    "label": { "text": x_title },
                },
                "y": {
                    "label": { "text": y_title },
                },
            },
            "size": {
                "width": number(self.layout.width),
                "height": number(self.layout.height),
            },
            "point": { "symbols": symbols },
            "line": { "styles": styles, "widths": widths },
            "tooltip": { "grouped": true },
            "legend": { "position": self.layout.legend_position },
            "grid": {
                "x": { "show": self.layout.show_guide_lines },
                "y": { "show": self.layout.show_guide_lines },
            },
            "title": { "text": self.layout.title.clone().unwrap_or_default() },
            "three_d": self.layout.three_d,
            "interaction": { "enabled": self.visible().next().is_some() },
        })
    }

    /// [`Chart::description`] plus `region_data` and `region_mql`.
    pub fn description_with_regions(&self) -> Value {
        let mut description = self.description();
        if let Value::Object(map) = &mut description {
            map.insert(
                "region_data".to_string(),
                serde_json::to_value(self.region_data()).unwrap_or(Value::Null),
            );
            map.insert(
                "region_mql".to_string(),
                serde_json::to_value(self.region_mql()).unwrap_or(Value::Null),
            );
        }
        description
    }
}
