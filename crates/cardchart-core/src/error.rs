pub type Result<T> = std::result::Result<T, Error>;

/// Wraps a parameter or value name in the emphasis marker used by error messages.
pub fn bold(name: &str) -> String {
    format!("<b>{name}</b>")
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    AxisLabel(#[from] AxisLabelError),

    #[error(transparent)]
    Combination(#[from] CombinationError),

    #[error("{message}")]
    Unsupported { message: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("Parameter {} is required.", bold(.name))]
    Required { name: String },

    #[error("Parameter {} is not a supported parameter.", bold(.name))]
    UnknownParameter { name: String },

    #[error(
        "Parameter {} resolved to {}, which is not a valid {expected}.",
        bold(.name),
        bold(.expression)
    )]
    TypeMismatch {
        name: String,
        expected: String,
        expression: String,
    },

    #[error(
        "{}: {} is not a valid value. Valid values are {}.",
        bold(.name),
        bold(.value),
        .allowed.join(", ")
    )]
    InvalidValue {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{}: {} must be a valid date.", bold(.name), bold(.value))]
    InvalidDate { name: String, value: String },

    #[error("{}: {} is not an integer number greater than 0.", bold(.name), bold(.value))]
    NotNaturalNumber { name: String, value: String },

    #[error("{}: {message}", bold(.name))]
    Invalid { name: String, message: String },

    #[error("Parameters contain an unsupported YAML tag {}.", bold(.tag))]
    UnsupportedTag { tag: String },

    #[error("Parameters could not be parsed: {message}")]
    Malformed { message: String },
}

impl ParameterError {
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Name of the offending parameter, when the error is tied to one.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::Required { name }
            | Self::UnknownParameter { name }
            | Self::TypeMismatch { name, .. }
            | Self::InvalidValue { name, .. }
            | Self::InvalidDate { name, .. }
            | Self::NotNaturalNumber { name, .. }
            | Self::Invalid { name, .. } => Some(name),
            Self::UnsupportedTag { .. } | Self::Malformed { .. } => None,
        }
    }
}

/// Failure reported by (or on behalf of) the query-execution collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", render_query_error(.message, .project.as_deref()))]
pub struct QueryError {
    pub message: String,
    /// Project the query was executed against; absent for purely syntactic failures.
    pub project: Option<String>,
}

impl QueryError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            project: None,
        }
    }

    pub fn in_project(project: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            project: Some(project.to_string()),
        }
    }
}

fn render_query_error(message: &str, project: Option<&str>) -> String {
    match project {
        Some(p) => format!("Error in project {}: {message}", bold(p)),
        None => message.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AxisLabelError {
    #[error("There is no tree named {}.", bold(.tree))]
    NoSuchTree { tree: String },

    #[error("{}: {} does not exist.", bold(.parameter), bold(.value))]
    NotInAxis { parameter: String, value: String },

    #[error(
        "{}: {} must be a value less than {} ({}).",
        bold("x-labels-start"),
        bold(.start),
        bold("x-labels-end"),
        .end
    )]
    StartAfterEnd { start: String, end: String },

    #[error(
        "{}: property {} is not a card property of tree {}.",
        bold("x-labels-tree"),
        bold(.property),
        bold(.tree)
    )]
    IncompatibleTreeProperty { property: String, tree: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "Series {} cannot be combined: the overlay values of {} exceed the total series at x-axis label {}.",
    bold(.series),
    bold(.query),
    bold(.label)
)]
pub struct CombinationError {
    pub series: String,
    pub query: String,
    pub label: String,
}
