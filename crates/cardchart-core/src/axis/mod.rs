//! X-axis labels: the ordered, de-duplicated categories every series is aligned onto.
//!
//! Labels carry a typed [`LabelKey`] next to their display text. Series rows are matched onto the
//! axis through keys (numeric value, date, login, card identity or tree path), never through the
//! rendered text, so that `2.0` and `2.00` land in the same bucket and two projects with different
//! card numbering can still agree on a tree node.

mod build;
mod keys;

pub use build::{AxisRequest, build};
pub use keys::{KeyResolver, PredicateValue};

use crate::error::{AxisLabelError, ParameterError, Result};
use crate::model::{CardSummary, PropertyDefinition};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;

pub const NOT_SET: &str = "(not set)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisKind {
    /// Managed properties: the project-defined value order.
    Enumerated { numeric: bool },
    FreeNumeric,
    Formula,
    FreeText,
    Date,
    User,
    Card,
    /// Card labels drawn from (and keyed by their position in) a planning tree.
    Tree { tree: String },
}

impl AxisKind {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Enumerated { numeric: true } | Self::FreeNumeric | Self::Formula
        )
    }

    pub fn is_card(&self) -> bool {
        matches!(self, Self::Card | Self::Tree { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelKey {
    /// Bit pattern of the numeric value (negative zero folded into zero).
    Number(u64),
    Date(NaiveDate),
    Card(u64),
    TreeNode { tree: String, path: Vec<String> },
    User(String),
    Text(String),
    NotSet,
}

impl LabelKey {
    pub fn number(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        Self::Number(value.to_bits())
    }

    pub fn text(value: &str) -> Self {
        Self::Text(value.trim().to_lowercase())
    }

    pub fn user(login: &str) -> Self {
        Self::User(login.trim().to_lowercase())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub text: String,
    pub key: LabelKey,
    /// The card behind card and tree labels, in the chart's project.
    pub card: Option<CardSummary>,
}

impl Label {
    pub(crate) fn new(text: impl Into<String>, key: LabelKey) -> Self {
        Self {
            text: text.into(),
            key,
            card: None,
        }
    }

    pub(crate) fn not_set() -> Self {
        Self::new(NOT_SET, LabelKey::NotSet)
    }
}

#[derive(Debug, Clone)]
pub struct AxisLabelSet {
    property: PropertyDefinition,
    kind: AxisKind,
    labels: Vec<Label>,
    index: FxHashMap<LabelKey, usize>,
    /// Inclusive range of full-axis indices inside `x-labels-start`/`x-labels-end`.
    window: Option<(usize, usize)>,
    /// Full-axis indices that are plotted, after windowing and stepping.
    positions: Vec<usize>,
    start_label: Option<String>,
}

impl AxisLabelSet {
    pub(crate) fn new(property: PropertyDefinition, kind: AxisKind, labels: Vec<Label>) -> Self {
        let mut index = FxHashMap::default();
        for (i, label) in labels.iter().enumerate() {
            index.entry(label.key.clone()).or_insert(i);
        }
        let window = (!labels.is_empty()).then(|| (0, labels.len() - 1));
        let positions = (0..labels.len()).collect();
        Self {
            property,
            kind,
            labels,
            index,
            window,
            positions,
            start_label: None,
        }
    }

    pub fn property(&self) -> &PropertyDefinition {
        &self.property
    }

    pub fn kind(&self) -> &AxisKind {
        &self.kind
    }

    /// Every label, before windowing.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn locate(&self, key: &LabelKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Full-axis index of the first label inside the window.
    pub fn window_start(&self) -> usize {
        self.window.map_or(0, |(start, _)| start)
    }

    pub fn start_label(&self) -> Option<&str> {
        self.start_label.as_deref()
    }

    /// Number of plotted points, including the synthetic start label.
    pub fn plotted_len(&self) -> usize {
        self.positions.len() + usize::from(self.start_label.is_some())
    }

    pub fn labels_for_plot(&self) -> Vec<String> {
        self.start_label
            .iter()
            .cloned()
            .chain(self.positions.iter().map(|&i| self.labels[i].text.clone()))
            .collect()
    }

    /// Narrows the plotted labels to the inclusive `[start, end]` range of full-axis indices.
    pub(crate) fn restrict(
        mut self,
        start: Option<(usize, &str)>,
        end: Option<(usize, &str)>,
    ) -> Result<Self> {
        let Some((full_start, full_end)) = self.window else {
            return Ok(self);
        };
        let lo = start.map_or(full_start, |(i, _)| i);
        let hi = end.map_or(full_end, |(i, _)| i);
        if lo > hi {
            return Err(AxisLabelError::StartAfterEnd {
                start: start.map_or_else(|| self.labels[lo].text.clone(), |(_, t)| t.to_string()),
                end: end.map_or_else(|| self.labels[hi].text.clone(), |(_, t)| t.to_string()),
            }
            .into());
        }
        self.window = Some((lo, hi));
        self.positions = (lo..=hi).collect();
        Ok(self)
    }

    /// Keeps every `step`-th plotted label, starting with the first.
    pub(crate) fn sample(mut self, step: usize) -> Self {
        if step > 1 {
            self.positions = self.positions.into_iter().step_by(step).collect();
        }
        self
    }

    pub(crate) fn with_start_label(mut self, text: &str) -> Result<Self> {
        let text = text.trim();
        if self
            .labels
            .iter()
            .any(|label| label.text.eq_ignore_ascii_case(text))
        {
            return Err(ParameterError::invalid(
                "start-label",
                format!(
                    "{} is already an x-axis label; choose a different start label.",
                    crate::error::bold(text)
                ),
            )
            .into());
        }
        self.start_label = Some(text.to_string());
        Ok(self)
    }
}

/// Minimal decimal rendering (`4` rather than `4.0`, `0.1` rather than `0.1000000001`).
pub(crate) fn format_number(value: f64) -> String {
    ryu_js::Buffer::new().format(value).to_string()
}

pub(crate) fn round_to(value: f64, precision: usize) -> f64 {
    let scale = 10f64.powi(precision.min(12) as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyKind;

    fn numeric_axis(values: &[f64]) -> AxisLabelSet {
        let labels = values
            .iter()
            .map(|v| Label::new(format_number(*v), LabelKey::number(*v)))
            .collect();
        AxisLabelSet::new(
            PropertyDefinition {
                name: "Size".to_string(),
                kind: PropertyKind::ManagedNumeric,
                card_type: None,
                tree: None,
            },
            AxisKind::Enumerated { numeric: true },
            labels,
        )
    }

    #[test]
    fn restriction_and_sampling_keep_full_axis_indices() {
        let axis = numeric_axis(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .restrict(Some((1, "2")), Some((5, "6")))
            .unwrap()
            .sample(2);
        assert_eq!(axis.positions(), &[1, 3, 5]);
        assert_eq!(axis.labels_for_plot(), vec!["2", "4", "6"]);
        assert_eq!(axis.window_start(), 1);
        assert_eq!(axis.len(), 6);
    }

    #[test]
    fn start_after_end_names_both_values() {
        let err = numeric_axis(&[1.0, 2.0, 3.0])
            .restrict(Some((2, "3")), Some((0, "1")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "<b>x-labels-start</b>: <b>3</b> must be a value less than <b>x-labels-end</b> (1)."
        );
    }

    #[test]
    fn start_label_is_prepended_and_cannot_shadow_a_label() {
        let axis = numeric_axis(&[1.0, 2.0]).with_start_label("Start").unwrap();
        assert_eq!(axis.labels_for_plot(), vec!["Start", "1", "2"]);
        assert_eq!(axis.plotted_len(), 3);

        let err = numeric_axis(&[1.0, 2.0]).with_start_label("2").unwrap_err();
        assert!(err.to_string().contains("<b>start-label</b>"));
    }

    #[test]
    fn numeric_keys_ignore_trailing_zeroes_and_signed_zero() {
        assert_eq!(
            LabelKey::number("2.00".parse().unwrap()),
            LabelKey::number(2.0)
        );
        assert_eq!(LabelKey::number(-0.0), LabelKey::number(0.0));
        assert_eq!(format_number(4.0), "4");
        assert_eq!(round_to(1.23456, 2), 1.23);
    }
}
