use crate::error::bold;
use crate::query::QueryOptions;
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::fmt;

/// What the macro is embedded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// A live card in the render project.
    Card { number: u64 },
    /// The defaults template of a card type; no card exists yet.
    CardDefaults { card_type: String },
    /// A wiki page.
    Page { name: String },
}

/// Informational notice: a `THIS CARD` expression cannot be evaluated yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRenderingNotice {
    pub expression: String,
}

impl fmt::Display for DeferredRenderingNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Macros using {} will be rendered when a card is created from this card default.",
            bold(&self.expression)
        )
    }
}

/// Per-render context threaded through parameter resolution and query execution.
#[derive(Debug)]
pub struct RenderContext {
    project: String,
    content: Content,
    current_user: Option<String>,
    notices: RefCell<Vec<DeferredRenderingNotice>>,
    noticed: RefCell<FxHashSet<String>>,
    volatile: Cell<bool>,
}

impl RenderContext {
    pub fn new(project: impl Into<String>, content: Content) -> Self {
        Self {
            project: project.into(),
            content,
            current_user: None,
            notices: RefCell::new(Vec::new()),
            noticed: RefCell::new(FxHashSet::default()),
            volatile: Cell::new(false),
        }
    }

    pub fn page(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(project, Content::Page { name: name.into() })
    }

    pub fn card(project: impl Into<String>, number: u64) -> Self {
        Self::new(project, Content::Card { number })
    }

    pub fn with_current_user(mut self, login: impl Into<String>) -> Self {
        self.current_user = Some(login.into());
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub fn this_card(&self) -> Option<u64> {
        match self.content {
            Content::Card { number } => Some(number),
            _ => None,
        }
    }

    /// Options every query issued for this render carries.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            this_card: self.this_card(),
            current_user: self.current_user.clone(),
            limit: None,
        }
    }

    /// Records a deferred-rendering notice, once per distinct expression.
    pub fn defer(&self, expression: &str) {
        let key = expression.trim().to_ascii_lowercase();
        if self.noticed.borrow_mut().insert(key) {
            tracing::debug!(expression, "deferring THIS CARD expression");
            self.notices.borrow_mut().push(DeferredRenderingNotice {
                expression: expression.trim().to_string(),
            });
        }
    }

    pub fn notices(&self) -> Vec<DeferredRenderingNotice> {
        self.notices.borrow().clone()
    }

    /// Marks the render as depending on "today" or on the viewer.
    pub fn mark_volatile(&self) {
        self.volatile.set(true);
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_notices_are_recorded_once_per_expression() {
        let ctx = RenderContext::new(
            "scrum",
            Content::CardDefaults {
                card_type: "Story".to_string(),
            },
        );
        ctx.defer("THIS CARD.Iteration");
        ctx.defer("this card.iteration ");
        ctx.defer("THIS CARD.Release");
        let notices = ctx.notices();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].expression, "THIS CARD.Iteration");
        assert!(notices[0].to_string().contains("<b>THIS CARD.Iteration</b>"));
    }
}
