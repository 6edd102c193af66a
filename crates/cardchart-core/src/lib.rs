#![forbid(unsafe_code)]

//! Chart macro engine (headless).
//!
//! Turns a chart macro's parameter block into a chart description: series queries are executed
//! through a [`QueryEngine`], their rows are reconciled onto a common x-axis, accumulated,
//! combined and fitted with trend lines, and drill-down regions are available on demand.
//!
//! Design goals:
//! - deterministic output for identical inputs, so rendered charts can be cached
//! - collaborators (schema lookups, query execution) behind narrow traits
//! - runtime-agnostic async APIs (no specific executor required)

pub mod axis;
pub mod chart;
pub mod combine;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod model;
pub mod mql;
pub mod params;
pub mod query;
pub mod region;
mod runtime;
pub mod series;

pub use axis::{AxisLabelSet, Label, LabelKey};
pub use chart::{Chart, Layout, RegionData, RegionMql};
pub use config::ChartConfig;
pub use context::{Content, DeferredRenderingNotice, RenderContext};
pub use error::{Error, Result};
pub use memory::MemoryWorkspace;
pub use model::ProjectModel;
pub use query::{Collaborators, QueryEngine, QueryOptions};
pub use series::Series;

#[derive(Debug, Clone, Default)]
pub struct Engine {
    site_config: ChartConfig,
    fixed_today: Option<chrono::NaiveDate>,
}

impl Engine {
    fn render_timing_enabled() -> bool {
        static ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
        *ENABLED.get_or_init(|| {
            matches!(
                std::env::var("CARDCHART_RENDER_TIMING").as_deref(),
                Ok("1") | Ok("true")
            )
        })
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the "today" used by date axes and `TODAY` in queries.
    ///
    /// This exists primarily to make fixture snapshots deterministic. By default the current
    /// local date is used.
    pub fn with_fixed_today(mut self, today: Option<chrono::NaiveDate>) -> Self {
        self.fixed_today = today;
        self
    }

    pub fn with_site_config(mut self, site_config: ChartConfig) -> Self {
        // Merge overrides onto the built-in defaults so unset keys keep working.
        self.site_config.deep_merge(site_config.as_value());
        self
    }

    pub fn site_config(&self) -> &ChartConfig {
        &self.site_config
    }

    /// Synchronous variant of [`Engine::render`].
    ///
    /// `params` is the raw parameter block of one chart macro. The first hard error aborts the
    /// render; no partial chart is returned.
    pub fn render_sync<'a>(
        &self,
        params: &str,
        ctx: &'a RenderContext,
        collab: Collaborators<'a>,
    ) -> Result<Chart<'a>> {
        let timing_enabled = Self::render_timing_enabled();
        let start = timing_enabled.then(std::time::Instant::now);

        let chart = runtime::with_fixed_today(self.fixed_today, || {
            chart::build(params, &self.site_config, self.fixed_today, ctx, collab)
        });

        if let Some(start) = start {
            eprintln!(
                "[render-timing] project={} total={:?} ok={}",
                ctx.project(),
                start.elapsed(),
                chart.is_ok()
            );
        }
        if let Err(err) = &chart {
            tracing::debug!(project = ctx.project(), %err, "chart render failed");
        }
        chart
    }

    /// Renders one chart macro.
    ///
    /// The work is CPU-bound apart from the collaborator calls, which are synchronous; this is a
    /// convenience wrapper over [`Engine::render_sync`].
    pub async fn render<'a>(
        &self,
        params: &str,
        ctx: &'a RenderContext,
        collab: Collaborators<'a>,
    ) -> Result<Chart<'a>> {
        self.render_sync(params, ctx, collab)
    }
}
