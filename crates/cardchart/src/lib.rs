#![forbid(unsafe_code)]

//! `cardchart` renders chart macros for card-wall projects.
//!
//! The engine lives in `cardchart-core` and is re-exported here unchanged. Host applications
//! implement [`ProjectModel`] and [`QueryEngine`] over their own storage, or use the bundled
//! [`MemoryWorkspace`] for fixtures and previews.
//!
//! # Features
//!
//! - `html`: embed a rendered chart into an HTML page (`cardchart::html`)

pub use cardchart_core::*;

#[cfg(feature = "html")]
pub mod html {
    use cardchart_core::Chart;

    /// Converts an arbitrary string into a conservative HTML `id` token, so several charts on the
    /// same page never share a container id.
    ///
    /// Unsupported characters become `-`, runs of `-` collapse, and ids that do not start with an
    /// ASCII letter get a `chart-` prefix.
    pub fn sanitize_element_id(raw: &str) -> String {
        let raw = raw.trim();
        let mut out = String::with_capacity(raw.len() + 6);
        for ch in raw.chars() {
            let ok = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_';
            out.push(if ok { ch } else { '-' });
        }
        while out.contains("--") {
            out = out.replace("--", "-");
        }
        let out = out.trim_matches('-');
        if out.is_empty() {
            return "chart-untitled".to_string();
        }
        if out.starts_with(|c: char| c.is_ascii_alphabetic()) {
            out.to_string()
        } else {
            format!("chart-{out}")
        }
    }

    /// Renders the chart container the client-side renderer picks up.
    ///
    /// The description (including drill-down regions) is serialized to JSON and stored in a
    /// `data-chart` attribute; the title, when present, is emitted as visible fallback text.
    pub fn embed(chart: &Chart<'_>, element_id: &str) -> String {
        let id = sanitize_element_id(element_id);
        let payload = serde_json::to_string(&chart.description_with_regions())
            .unwrap_or_else(|_| "{}".to_string());
        let title = chart.layout().title.as_deref().unwrap_or_default();
        format!(
            r#"<div class="cardchart" id="{id}" data-chart="{}">{}</div>"#,
            htmlize::escape_attribute(payload),
            htmlize::escape_text(title),
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use cardchart_core::{Engine, MemoryWorkspace, RenderContext};
        use futures::executor::block_on;

        const WORKSPACE: &str = r#"
projects:
  - identifier: demo
    properties:
      - { name: Status, kind: managed-text, values: [Open, Done] }
    cards:
      - { number: 1, name: a, type: Story, properties: { Status: Open } }
      - { number: 2, name: b, type: Story, properties: { Status: Done } }
"#;

        #[test]
        fn element_ids_are_sanitized() {
            assert_eq!(sanitize_element_id("burn down"), "burn-down");
            assert_eq!(sanitize_element_id("  "), "chart-untitled");
            assert_eq!(sanitize_element_id("42 <x>"), "chart-42-x");
            assert_eq!(sanitize_element_id("a__b"), "a__b");
        }

        #[test]
        fn embed_escapes_the_payload_and_title() {
            let ws = MemoryWorkspace::from_yaml(WORKSPACE).unwrap();
            let ctx = RenderContext::page("demo", "Board");
            let chart = block_on(Engine::new().render(
                "title: Open & \"Done\" <stories>\nseries:\n  - data: SELECT Status, COUNT(*)\n",
                &ctx,
                ws.collaborators(),
            ))
            .unwrap();

            let html = embed(&chart, "status chart");
            assert!(html.starts_with(r#"<div class="cardchart" id="status-chart" data-chart=""#));
            assert!(html.ends_with("Open &amp; \"Done\" &lt;stories&gt;</div>"));
            assert!(html.contains("&quot;region_data&quot;"));
            assert!(!html.contains("\"columns\""));
        }
    }
}
