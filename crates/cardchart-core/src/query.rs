use crate::error::QueryError;
use crate::model::ProjectModel;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Card number `THIS CARD` refers to inside query predicates.
    pub this_card: Option<u64>,
    /// Login `CURRENT USER` refers to inside query predicates.
    pub current_user: Option<String>,
    pub limit: Option<usize>,
}

/// One aggregated row: the raw stored category value and the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub category: Option<String>,
    pub value: Option<f64>,
}

/// One record selected by a query, with the raw value of the query's first column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub id: u64,
    pub number: u64,
    pub name: String,
    pub category: Option<String>,
}

/// The MQL execution collaborator.
pub trait QueryEngine {
    fn execute(
        &self,
        query: &str,
        project: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryRow>, QueryError>;

    /// Records matched by the query's tree scope and predicate.
    fn records(
        &self,
        query: &str,
        project: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RecordRow>, QueryError>;
}

/// Everything the engine consults outside itself during one render.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub model: &'a dyn ProjectModel,
    pub queries: &'a dyn QueryEngine,
}

impl<'a> Collaborators<'a> {
    pub fn new(model: &'a dyn ProjectModel, queries: &'a dyn QueryEngine) -> Self {
        Self { model, queries }
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
