use super::build::{format_date, parse_stored_date};
use super::{AxisKind, AxisLabelSet, Label, LabelKey, round_to};
use crate::model::{ProjectInfo, ProjectModel, TreeInfo};
use crate::mql::quote;

/// How a label is written on the right-hand side of a drill-down predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateValue {
    /// An already quoted literal.
    Literal(String),
    /// A card, referenced by its number in the series' project.
    Card(u64),
    NotSet,
}

/// Maps raw category values from one series' project onto the chart's axis, and axis labels
/// back into that project's terms.
pub struct KeyResolver<'a> {
    axis: &'a AxisLabelSet,
    model: &'a dyn ProjectModel,
    project: &'a ProjectInfo,
    same_project: bool,
    tree: Option<TreeInfo>,
}

impl<'a> KeyResolver<'a> {
    pub fn new(
        axis: &'a AxisLabelSet,
        model: &'a dyn ProjectModel,
        project: &'a ProjectInfo,
        chart_project: &str,
    ) -> Self {
        let tree = match axis.kind() {
            AxisKind::Tree { tree } => model.tree(&project.identifier, tree),
            _ => None,
        };
        Self {
            axis,
            model,
            project,
            same_project: project.identifier.eq_ignore_ascii_case(chart_project),
            tree,
        }
    }

    /// Full-axis index of a raw category value, if the axis has a label for it.
    pub fn position(&self, raw: Option<&str>) -> Option<usize> {
        let raw = raw.map(str::trim).filter(|r| !r.is_empty());
        let Some(raw) = raw else {
            return self
                .axis
                .kind()
                .is_card()
                .then(|| self.axis.locate(&LabelKey::NotSet))
                .flatten();
        };

        match self.axis.kind() {
            AxisKind::Enumerated { numeric: true } | AxisKind::FreeNumeric => {
                match raw.parse::<f64>() {
                    Ok(v) => self.axis.locate(&LabelKey::number(v)),
                    Err(_) => self.axis.locate(&LabelKey::text(raw)),
                }
            }
            AxisKind::Formula => {
                let v = raw.parse::<f64>().ok()?;
                self.axis.locate(&LabelKey::number(round_to(v, self.project.precision)))
            }
            AxisKind::Enumerated { numeric: false } | AxisKind::FreeText => {
                self.axis.locate(&LabelKey::text(raw))
            }
            AxisKind::Date => {
                let date = parse_stored_date(raw, &self.project.date_format)?;
                self.axis.locate(&LabelKey::Date(date))
            }
            AxisKind::User => self.axis.locate(&LabelKey::user(raw)),
            AxisKind::Card => {
                let number = raw.parse::<u64>().ok()?;
                if self.same_project {
                    return self.axis.locate(&LabelKey::Card(number));
                }
                let card = self.model.card(&self.project.identifier, number)?;
                self.axis.labels().iter().position(|l| {
                    l.card
                        .as_ref()
                        .is_some_and(|c| c.name.eq_ignore_ascii_case(&card.name))
                })
            }
            AxisKind::Tree { tree } => {
                let number = raw.parse::<u64>().ok()?;
                let path = self.tree.as_ref().and_then(|t| t.path(number));
                let by_path = path.and_then(|path| {
                    self.axis.locate(&LabelKey::TreeNode {
                        tree: tree.clone(),
                        path,
                    })
                });
                by_path.or_else(|| {
                    self.same_project
                        .then(|| self.axis.locate(&LabelKey::Card(number)))
                        .flatten()
                })
            }
        }
    }

    /// The value a predicate in the series' project uses to select `label`.
    pub fn predicate_value(&self, label: &Label) -> Option<PredicateValue> {
        match &label.key {
            LabelKey::NotSet => Some(PredicateValue::NotSet),
            LabelKey::Number(_) => {
                let v = label.key.as_number()?;
                Some(PredicateValue::Literal(quote(&format!(
                    "{v:.precision$}",
                    precision = self.project.precision
                ))))
            }
            LabelKey::Text(_) => Some(PredicateValue::Literal(quote(&label.text))),
            LabelKey::Date(date) => Some(PredicateValue::Literal(quote(&format_date(
                *date,
                &self.project.date_format,
            )))),
            LabelKey::User(login) => Some(PredicateValue::Literal(quote(login))),
            LabelKey::Card(number) => {
                if self.same_project {
                    return Some(PredicateValue::Card(*number));
                }
                let card = label.card.as_ref()?;
                self.model
                    .cards_of_type(&self.project.identifier, &card.card_type)
                    .into_iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&card.name))
                    .map(|c| PredicateValue::Card(c.number))
            }
            LabelKey::TreeNode { path, .. } => self
                .tree
                .as_ref()?
                .find_by_path(path)
                .map(|n| PredicateValue::Card(n.number)),
        }
    }
}
