//! An in-memory workspace that answers both collaborator traits.
//!
//! Used by the fixture suite and the CLI. Projects are described in YAML; queries are evaluated
//! against the cards directly with the predicate subset the engine itself emits plus the common
//! comparisons authors write by hand.

mod eval;

use crate::error::{QueryError, bold};
use crate::model::{
    CardSummary, ProjectInfo, ProjectModel, PropertyDefinition, PropertyKind, TreeInfo, TreeNode,
    UserInfo,
};
use crate::mql::{Aggregate, Column, Query};
use crate::query::{Collaborators, QueryEngine, QueryOptions, QueryRow, RecordRow};
use chrono::NaiveDate;
use eval::{Expr, Op, Operand, Set, Subquery, Value};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryWorkspace {
    #[serde(default)]
    projects: Vec<ProjectFixture>,
    #[serde(skip)]
    executions: AtomicUsize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFixture {
    identifier: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default = "default_precision")]
    precision: usize,
    #[serde(default = "default_accessible")]
    accessible: bool,
    #[serde(default)]
    variables: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    users: Vec<UserInfo>,
    #[serde(default)]
    properties: Vec<PropertyFixture>,
    #[serde(default)]
    trees: Vec<TreeFixture>,
    #[serde(default)]
    cards: Vec<CardFixture>,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_precision() -> usize {
    2
}

fn default_accessible() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PropertyFixture {
    name: String,
    kind: PropertyKind,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    tree: Option<String>,
    /// Managed values, in project order.
    #[serde(default)]
    values: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeFixture {
    name: String,
    nodes: Vec<TreeNodeFixture>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreeNodeFixture {
    number: u64,
    #[serde(default)]
    parent: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CardFixture {
    /// Creation order; defaults to the card number.
    #[serde(default)]
    id: Option<u64>,
    number: u64,
    name: String,
    #[serde(rename = "type")]
    card_type: String,
    #[serde(default)]
    properties: IndexMap<String, serde_yaml::Value>,
}

impl CardFixture {
    fn id(&self) -> u64 {
        self.id.unwrap_or(self.number)
    }

    fn summary(&self) -> CardSummary {
        CardSummary {
            id: self.id(),
            number: self.number,
            name: self.name.clone(),
            card_type: self.card_type.clone(),
        }
    }
}

/// Stored text of a YAML scalar; `null` and blank strings are unset.
fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    let text = match value {
        serde_yaml::Value::Null => return None,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        _ => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

const BUILT_IN: &[(&str, PropertyKind)] = &[
    ("Number", PropertyKind::FreeNumeric),
    ("Name", PropertyKind::FreeText),
    ("Type", PropertyKind::ManagedText),
];

impl ProjectFixture {
    fn info(&self) -> ProjectInfo {
        ProjectInfo {
            identifier: self.identifier.clone(),
            name: self.name.clone().unwrap_or_else(|| self.identifier.clone()),
            date_format: self.date_format.clone(),
            precision: self.precision,
            accessible: self.accessible,
        }
    }

    fn definition(&self, name: &str) -> Option<PropertyDefinition> {
        if let Some(p) = self
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Some(PropertyDefinition {
                name: p.name.clone(),
                kind: p.kind,
                card_type: p.card_type.clone(),
                tree: p.tree.clone(),
            });
        }
        BUILT_IN
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(n, kind)| PropertyDefinition {
                name: n.to_string(),
                kind: *kind,
                card_type: None,
                tree: None,
            })
    }

    fn cards_by_number(&self) -> Vec<&CardFixture> {
        let mut cards: Vec<&CardFixture> = self.cards.iter().collect();
        cards.sort_by_key(|c| c.number);
        cards
    }

    fn card(&self, number: u64) -> Option<&CardFixture> {
        self.cards.iter().find(|c| c.number == number)
    }

    fn raw(&self, card: &CardFixture, property: &str) -> Option<String> {
        if property.eq_ignore_ascii_case("Number") {
            return Some(card.number.to_string());
        }
        if property.eq_ignore_ascii_case("Name") {
            return Some(card.name.clone());
        }
        if property.eq_ignore_ascii_case("Type") {
            return Some(card.card_type.clone());
        }
        card.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(property))
            .and_then(|(_, v)| scalar_text(v))
    }

    fn managed_values(&self, property: &PropertyDefinition) -> Option<Vec<String>> {
        if property.name == "Type" {
            let mut seen = FxHashSet::default();
            return Some(
                self.cards_by_number()
                    .into_iter()
                    .filter(|c| seen.insert(c.card_type.to_lowercase()))
                    .map(|c| c.card_type.clone())
                    .collect(),
            );
        }
        if !matches!(
            property.kind,
            PropertyKind::ManagedText | PropertyKind::ManagedNumeric
        ) {
            return None;
        }
        let fixture = self
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&property.name))?;
        Some(fixture.values.iter().filter_map(scalar_text).collect())
    }

    fn tree_info(&self, name: &str) -> Option<TreeInfo> {
        let fixture = self
            .trees
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))?;

        fn visit(
            project: &ProjectFixture,
            fixture: &TreeFixture,
            parent: Option<u64>,
            out: &mut Vec<TreeNode>,
        ) {
            for node in fixture.nodes.iter().filter(|n| n.parent == parent) {
                if out.iter().any(|n| n.number == node.number) {
                    continue;
                }
                let Some(card) = project.card(node.number) else {
                    continue;
                };
                out.push(TreeNode {
                    number: card.number,
                    name: card.name.clone(),
                    card_type: card.card_type.clone(),
                    parent,
                });
                visit(project, fixture, Some(node.number), out);
            }
        }

        let mut nodes = Vec::new();
        visit(self, fixture, None, &mut nodes);
        Some(TreeInfo {
            name: fixture.name.clone(),
            nodes,
        })
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(text, &self.date_format))
            .ok()
    }

    /// A card number from `n`, `#n Name` or a card name.
    fn card_number_of(&self, text: &str, card_type: Option<&str>) -> Option<u64> {
        let text = text.trim();
        if let Ok(n) = text.parse::<u64>() {
            return Some(n);
        }
        if let Some(rest) = text.strip_prefix('#') {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(n) = digits.parse::<u64>() {
                return Some(n);
            }
        }
        self.cards_by_number()
            .into_iter()
            .filter(|c| card_type.is_none_or(|t| c.card_type.eq_ignore_ascii_case(t)))
            .find(|c| c.name.eq_ignore_ascii_case(text))
            .map(|c| c.number)
    }

    fn user_login(&self, text: &str) -> String {
        self.users
            .iter()
            .find(|u| u.login.eq_ignore_ascii_case(text) || u.name.eq_ignore_ascii_case(text))
            .map(|u| u.login.to_lowercase())
            .unwrap_or_else(|| text.to_lowercase())
    }

    fn compare(&self, property: &PropertyDefinition, raw: &str, rhs: &str) -> Option<Ordering> {
        match property.kind {
            PropertyKind::ManagedNumeric | PropertyKind::FreeNumeric | PropertyKind::Formula => {
                let lhs = raw.trim().parse::<f64>().ok()?;
                let rhs = rhs.trim().parse::<f64>().ok()?;
                lhs.partial_cmp(&rhs)
            }
            PropertyKind::Date => Some(self.parse_date(raw)?.cmp(&self.parse_date(rhs)?)),
            PropertyKind::User => Some(self.user_login(raw).cmp(&self.user_login(rhs))),
            PropertyKind::Card | PropertyKind::TreeRelationship => {
                let card_type = property.card_type.as_deref();
                let lhs = self.card_number_of(raw, card_type)?;
                let rhs = self.card_number_of(rhs, card_type)?;
                Some(lhs.cmp(&rhs))
            }
            PropertyKind::ManagedText => {
                let values = self.managed_values(property).unwrap_or_default();
                let position =
                    |v: &str| values.iter().position(|m| m.eq_ignore_ascii_case(v.trim()));
                match (position(raw), position(rhs)) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => Some(raw.trim().to_lowercase().cmp(&rhs.trim().to_lowercase())),
                }
            }
            PropertyKind::FreeText => {
                Some(raw.trim().to_lowercase().cmp(&rhs.trim().to_lowercase()))
            }
        }
    }
}

/// Evaluates one parsed query against one project.
struct Evaluation<'w> {
    project: &'w ProjectFixture,
    options: &'w QueryOptions,
}

impl<'w> Evaluation<'w> {
    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::in_project(&self.project.identifier, message)
    }

    fn definition(&self, name: &str) -> Result<PropertyDefinition, QueryError> {
        self.project.definition(name).ok_or_else(|| {
            self.error(format!("Card property {} does not exist.", bold(name)))
        })
    }

    fn select(
        &self,
        tree: Option<&str>,
        predicate: Option<&Expr>,
    ) -> Result<Vec<&'w CardFixture>, QueryError> {
        let members = match tree {
            Some(name) => {
                let tree = self
                    .project
                    .tree_info(name)
                    .ok_or_else(|| self.error(format!("There is no tree named {}.", bold(name))))?;
                Some(tree.nodes.iter().map(|n| n.number).collect::<FxHashSet<u64>>())
            }
            None => None,
        };
        let mut out = Vec::new();
        for card in self.project.cards_by_number() {
            if members.as_ref().is_some_and(|m| !m.contains(&card.number)) {
                continue;
            }
            if let Some(predicate) = predicate {
                if !self.matches(predicate, card)? {
                    continue;
                }
            }
            out.push(card);
        }
        Ok(out)
    }

    fn operand(
        &self,
        operand: &Operand,
        card: &CardFixture,
    ) -> Result<(PropertyDefinition, Option<String>), QueryError> {
        let name = match operand {
            Operand::Number => "Number",
            Operand::Property(name) => name.as_str(),
        };
        let definition = self.definition(name)?;
        let raw = self.project.raw(card, &definition.name);
        Ok((definition, raw))
    }

    /// The stored-form text of a right-hand side value; `None` when it refers to nothing.
    fn value(&self, value: &Value) -> Result<Option<String>, QueryError> {
        match value {
            Value::Literal(text) => Ok(Some(text.clone())),
            Value::CardNumber(n) => Ok(Some(n.to_string())),
            Value::Today => Ok(Some(crate::runtime::today().format("%Y-%m-%d").to_string())),
            Value::CurrentUser => Ok(self.options.current_user.clone()),
            Value::ThisCard(property) => {
                let number = self.options.this_card.ok_or_else(|| {
                    self.error(format!(
                        "{} is not available outside of a card.",
                        bold("THIS CARD")
                    ))
                })?;
                match property {
                    None => Ok(Some(number.to_string())),
                    Some(property) => {
                        let definition = self.definition(property)?;
                        Ok(self
                            .project
                            .card(number)
                            .and_then(|card| self.project.raw(card, &definition.name)))
                    }
                }
            }
        }
    }

    fn numbers(&self, set: &Set, card_type: Option<&str>) -> Result<FxHashSet<u64>, QueryError> {
        match set {
            Set::Values(values) => {
                let mut out = FxHashSet::default();
                for value in values {
                    if let Some(text) = self.value(value)? {
                        if let Some(n) = self.project.card_number_of(&text, card_type) {
                            out.insert(n);
                        }
                    }
                }
                Ok(out)
            }
            Set::Numbers(Subquery { tree, predicate }) => Ok(self
                .select(tree.as_deref(), predicate.as_deref())?
                .into_iter()
                .map(|c| c.number)
                .collect()),
        }
    }

    fn matches(&self, expr: &Expr, card: &CardFixture) -> Result<bool, QueryError> {
        match expr {
            Expr::And(lhs, rhs) => Ok(self.matches(lhs, card)? && self.matches(rhs, card)?),
            Expr::Or(lhs, rhs) => Ok(self.matches(lhs, card)? || self.matches(rhs, card)?),
            Expr::Not(inner) => Ok(!self.matches(inner, card)?),
            Expr::IsNull { lhs, negated } => {
                let (_, raw) = self.operand(lhs, card)?;
                Ok(raw.is_none() != *negated)
            }
            Expr::Compare { lhs, op, rhs } => {
                let (definition, raw) = self.operand(lhs, card)?;
                let rhs = self.value(rhs)?;
                Ok(match (raw, rhs) {
                    (Some(raw), Some(rhs)) => self
                        .project
                        .compare(&definition, &raw, &rhs)
                        .is_some_and(|ordering| op.holds(ordering)),
                    (None, None) => *op == Op::Eq,
                    _ => *op == Op::Ne,
                })
            }
            Expr::In {
                lhs,
                by_number,
                negated,
                set,
            } => {
                let (definition, raw) = self.operand(lhs, card)?;
                let Some(raw) = raw else {
                    return Ok(*negated);
                };
                let by_number = *by_number
                    || matches!(lhs, Operand::Number)
                    || matches!(set, Set::Numbers(_));
                let found = if by_number {
                    let card_type = definition.card_type.as_deref();
                    let numbers = self.numbers(set, card_type)?;
                    self.project
                        .card_number_of(&raw, card_type)
                        .is_some_and(|n| numbers.contains(&n))
                } else {
                    let Set::Values(values) = set else {
                        return Ok(*negated);
                    };
                    let mut found = false;
                    for value in values {
                        if let Some(rhs) = self.value(value)? {
                            if self.project.compare(&definition, &raw, &rhs)
                                == Some(Ordering::Equal)
                            {
                                found = true;
                                break;
                            }
                        }
                    }
                    found
                };
                Ok(found != *negated)
            }
        }
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    numeric: usize,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>, present: bool) {
        if present {
            self.count += 1;
        }
        if let Some(v) = value {
            self.numeric += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn finish(&self, function: Aggregate) -> Option<f64> {
        match function {
            Aggregate::Count => Some(self.count as f64),
            Aggregate::Sum => Some(self.sum),
            Aggregate::Avg => (self.numeric > 0).then(|| self.sum / self.numeric as f64),
            Aggregate::Min => self.min,
            Aggregate::Max => self.max,
        }
    }
}

impl MemoryWorkspace {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Both collaborator roles, borrowed from this workspace.
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators::new(self, self)
    }

    /// Number of `execute` and `records` calls answered so far.
    pub fn execution_count(&self) -> usize {
        self.executions.load(AtomicOrdering::Relaxed)
    }

    fn fixture(&self, identifier: &str) -> Option<&ProjectFixture> {
        self.projects
            .iter()
            .find(|p| p.identifier.eq_ignore_ascii_case(identifier))
    }

    fn prepare<'w>(
        &'w self,
        query: &str,
        project: &str,
    ) -> Result<(&'w ProjectFixture, Query, Option<Expr>), QueryError> {
        self.executions.fetch_add(1, AtomicOrdering::Relaxed);
        let fixture = self.fixture(project).ok_or_else(|| {
            QueryError::in_project(project, format!("There is no project {}.", bold(project)))
        })?;
        let parsed = Query::parse(query)?;
        let predicate = parsed
            .predicate
            .as_deref()
            .map(eval::parse_predicate)
            .transpose()
            .map_err(|message| {
                QueryError::in_project(
                    &fixture.identifier,
                    format!("{} is not a valid condition: {message}", bold(query)),
                )
            })?;
        Ok((fixture, parsed, predicate))
    }
}

impl ProjectModel for MemoryWorkspace {
    fn project(&self, identifier: &str) -> Option<ProjectInfo> {
        self.fixture(identifier).map(ProjectFixture::info)
    }

    fn property(&self, project: &str, name: &str) -> Option<PropertyDefinition> {
        self.fixture(project)?.definition(name)
    }

    fn property_values(&self, project: &str, property: &str) -> Vec<String> {
        let Some(fixture) = self.fixture(project) else {
            return Vec::new();
        };
        let Some(definition) = fixture.definition(property) else {
            return Vec::new();
        };
        if let Some(values) = fixture.managed_values(&definition) {
            return values;
        }
        let mut seen = FxHashSet::default();
        fixture
            .cards_by_number()
            .into_iter()
            .filter_map(|card| fixture.raw(card, &definition.name))
            .filter(|value| seen.insert(value.clone()))
            .collect()
    }

    fn users(&self, project: &str) -> Vec<UserInfo> {
        self.fixture(project)
            .map(|p| p.users.clone())
            .unwrap_or_default()
    }

    fn cards_of_type(&self, project: &str, card_type: &str) -> Vec<CardSummary> {
        let Some(fixture) = self.fixture(project) else {
            return Vec::new();
        };
        fixture
            .cards_by_number()
            .into_iter()
            .filter(|c| c.card_type.eq_ignore_ascii_case(card_type))
            .map(CardFixture::summary)
            .collect()
    }

    fn card(&self, project: &str, number: u64) -> Option<CardSummary> {
        self.fixture(project)?.card(number).map(CardFixture::summary)
    }

    fn card_property(&self, project: &str, number: u64, property: &str) -> Option<String> {
        let fixture = self.fixture(project)?;
        fixture.raw(fixture.card(number)?, property)
    }

    fn tree(&self, project: &str, name: &str) -> Option<TreeInfo> {
        self.fixture(project)?.tree_info(name)
    }

    fn project_variable(&self, project: &str, name: &str) -> Option<String> {
        let value = self.fixture(project)?.variables.get(name)?;
        Some(scalar_text(value).unwrap_or_default())
    }
}

impl QueryEngine for MemoryWorkspace {
    fn execute(
        &self,
        query: &str,
        project: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryRow>, QueryError> {
        let (fixture, parsed, predicate) = self.prepare(query, project)?;
        let eval = Evaluation {
            project: fixture,
            options,
        };
        let cards = eval.select(parsed.tree.as_deref(), predicate.as_ref())?;

        let (category, function, argument) = match parsed.columns.as_slice() {
            [Column::Aggregate { function, property }] => (None, *function, property.as_deref()),
            [
                Column::Property(category),
                Column::Aggregate { function, property },
            ] => (Some(category.as_str()), *function, property.as_deref()),
            _ => {
                return Err(eval.error(format!(
                    "{} must select an aggregate, optionally grouped by one property.",
                    bold(query)
                )));
            }
        };

        let category = category.map(|c| eval.definition(c)).transpose()?;
        let argument = argument.map(|a| eval.definition(a)).transpose()?;
        if let Some(argument) = &argument {
            let numeric = argument.kind.is_numeric() || argument.name == "Number";
            if function != Aggregate::Count && !numeric {
                return Err(eval.error(format!(
                    "Property {} is not numeric.",
                    bold(&argument.name)
                )));
            }
        }

        let mut groups: IndexMap<Option<String>, Accumulator> = IndexMap::new();
        for card in cards {
            let key = category
                .as_ref()
                .and_then(|c| fixture.raw(card, &c.name));
            let (value, present) = match &argument {
                None => (None, true),
                Some(argument) => {
                    let raw = fixture.raw(card, &argument.name);
                    let value = raw.as_deref().and_then(|r| r.trim().parse::<f64>().ok());
                    (value, raw.is_some())
                }
            };
            groups.entry(key).or_default().push(value, present);
        }
        if category.is_none() && groups.is_empty() {
            groups.insert(None, Accumulator::default());
        }

        let mut rows: Vec<QueryRow> = groups
            .into_iter()
            .map(|(category, acc)| QueryRow {
                category,
                value: acc.finish(function),
            })
            .collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        tracing::trace!(%project, %query, rows = rows.len(), "memory query executed");
        Ok(rows)
    }

    fn records(
        &self,
        query: &str,
        project: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RecordRow>, QueryError> {
        let (fixture, parsed, predicate) = self.prepare(query, project)?;
        let eval = Evaluation {
            project: fixture,
            options,
        };
        let category = match parsed.columns.first() {
            Some(Column::Property(p)) => Some(eval.definition(p)?),
            _ => None,
        };
        let mut rows: Vec<RecordRow> = eval
            .select(parsed.tree.as_deref(), predicate.as_ref())?
            .into_iter()
            .map(|card| RecordRow {
                id: card.id(),
                number: card.number,
                name: card.name.clone(),
                category: category.as_ref().and_then(|c| fixture.raw(card, &c.name)),
            })
            .collect();
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
