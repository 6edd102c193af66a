use super::*;
use crate::error::{AxisLabelError, ParameterError};

fn render_err(params: &str) -> Error {
    let ctx = RenderContext::page("scrum", "Overview");
    render(workspace(), &ctx, params).unwrap_err()
}

fn parameter_err(params: &str) -> ParameterError {
    match render_err(params) {
        Error::Parameter(err) => err,
        other => panic!("expected a parameter error, got {other:?}"),
    }
}

#[test]
fn series_are_required() {
    assert_eq!(
        parameter_err("title: Nothing to plot"),
        ParameterError::Required {
            name: "series".to_string()
        }
    );
}

#[test]
fn unknown_parameters_are_rejected_at_both_levels() {
    assert_eq!(
        parameter_err("colour: red\nseries:\n  - data: SELECT Estimate, COUNT(*)\n"),
        ParameterError::UnknownParameter {
            name: "colour".to_string()
        }
    );
    assert_eq!(
        parameter_err("series:\n  - data: SELECT Estimate, COUNT(*)\n    colour: red\n"),
        ParameterError::UnknownParameter {
            name: "colour".to_string()
        }
    );
}

#[test]
fn data_must_select_a_category_and_an_aggregate() {
    let err = parameter_err("series:\n  - data: SELECT COUNT(*)\n");
    assert_eq!(err.parameter(), Some("data"));
}

#[test]
fn down_from_requires_cumulative() {
    let err = parameter_err(
        r#"
series:
  - data: SELECT Estimate, SUM(Size)
    down-from: SELECT SUM(Size)
"#,
    );
    assert_eq!(err.parameter(), Some("down-from"));
}

#[test]
fn strict_values_fail_and_loose_values_fall_back() {
    let err = parameter_err(
        "data-point-symbol: star\nseries:\n  - data: SELECT Estimate, COUNT(*)\n",
    );
    assert!(matches!(
        err,
        ParameterError::InvalidValue { ref name, .. } if name == "data-point-symbol"
    ));

    let ctx = RenderContext::page("scrum", "Overview");
    let chart = render(
        workspace(),
        &ctx,
        "chart-type: pie\nseries:\n  - data: SELECT Estimate, COUNT(*)\n",
    )
    .unwrap();
    assert_eq!(chart.layout().chart_type, "line");
}

#[test]
fn typed_parameters_reject_mismatches() {
    assert!(matches!(
        parameter_err("cumulative: maybe\nseries:\n  - data: SELECT Estimate, COUNT(*)\n"),
        ParameterError::TypeMismatch { ref name, .. } if name == "cumulative"
    ));
    assert!(matches!(
        parameter_err("chart-width: wide\nseries:\n  - data: SELECT Estimate, COUNT(*)\n"),
        ParameterError::TypeMismatch { ref name, .. } if name == "chart-width"
    ));
    assert!(matches!(
        parameter_err("series: SELECT Estimate, COUNT(*)\n"),
        ParameterError::TypeMismatch { ref name, .. } if name == "series"
    ));
}

#[test]
fn trend_scope_must_be_all_or_a_positive_integer() {
    let err = parameter_err(
        "trend-scope: 0\nseries:\n  - data: SELECT Estimate, COUNT(*)\n",
    );
    assert_eq!(err.parameter(), Some("trend-scope"));
}

#[test]
fn series_projects_must_exist_and_be_accessible() {
    let missing = parameter_err(
        "series:\n  - label: Other\n    project: nowhere\n    data: SELECT Estimate, COUNT(*)\n",
    );
    assert_eq!(missing.parameter(), Some("project"));
    assert!(missing.to_string().contains("nowhere"));

    let secret = parameter_err(
        "series:\n  - label: Other\n    project: secret\n    data: SELECT Estimate, COUNT(*)\n",
    );
    assert!(secret.to_string().contains("not a member"));
}

#[test]
fn axis_bounds_must_exist_and_be_ordered() {
    let err = render_err(
        "x-labels-start: 4\nseries:\n  - data: SELECT Estimate, COUNT(*)\n",
    );
    assert_eq!(
        err,
        Error::AxisLabel(AxisLabelError::NotInAxis {
            parameter: "x-labels-start".to_string(),
            value: "4".to_string(),
        })
    );

    let err = render_err(
        "x-labels-start: 5\nx-labels-end: 2\nseries:\n  - data: SELECT Estimate, COUNT(*)\n",
    );
    assert!(matches!(err, Error::AxisLabel(AxisLabelError::StartAfterEnd { .. })));

    let err = render_err(
        "x-labels-start: 2024-03-05\nx-labels-end: 2024-03-01\nseries:\n  - data: \"SELECT 'Added On', COUNT(*)\"\n",
    );
    assert!(matches!(err, Error::AxisLabel(AxisLabelError::StartAfterEnd { .. })));

    assert!(matches!(
        parameter_err(
            "x-labels-start: someday\nseries:\n  - data: \"SELECT 'Added On', COUNT(*)\"\n"
        ),
        ParameterError::InvalidDate { .. }
    ));
}

#[test]
fn step_must_be_a_natural_number() {
    assert_eq!(
        parameter_err("x-labels-step: 0\nseries:\n  - data: SELECT Estimate, COUNT(*)\n"),
        ParameterError::NotNaturalNumber {
            name: "x-labels-step".to_string(),
            value: "0".to_string()
        }
    );
}

#[test]
fn trees_must_exist_and_fit_the_property() {
    assert_eq!(
        render_err(
            "x-labels-tree: Roadmap\nseries:\n  - data: SELECT Iteration, COUNT(*)\n"
        ),
        Error::AxisLabel(AxisLabelError::NoSuchTree {
            tree: "Roadmap".to_string()
        })
    );
    assert!(matches!(
        render_err("x-labels-tree: Planning\nseries:\n  - data: SELECT Estimate, COUNT(*)\n"),
        Error::AxisLabel(AxisLabelError::IncompatibleTreeProperty { .. })
    ));
}

#[test]
fn start_label_may_not_repeat_a_plotted_label() {
    let err = parameter_err(
        r#"
show-start-label: true
start-label: 2
series:
  - data: SELECT Estimate, COUNT(*)
"#,
    );
    assert_eq!(err.parameter(), Some("start-label"));
}

#[test]
fn start_label_may_not_repeat_a_label_outside_the_window() {
    let before_window = parameter_err(
        r#"
show-start-label: true
x-labels-start: 3
start-label: 1
series:
  - data: SELECT Estimate, COUNT(*)
"#,
    );
    assert_eq!(before_window.parameter(), Some("start-label"));

    let stepped_over = parameter_err(
        r#"
show-start-label: true
x-labels-step: 2
start-label: 2
series:
  - data: SELECT Estimate, COUNT(*)
"#,
    );
    assert_eq!(stepped_over.parameter(), Some("start-label"));
}

#[test]
fn query_failures_name_the_project() {
    match render_err("series:\n  - data: SELECT Colour, COUNT(*)\n") {
        Error::Query(err) => assert_eq!(err.project.as_deref(), Some("scrum")),
        other => panic!("expected a query error, got {other:?}"),
    }
    assert!(matches!(
        render_err("series:\n  - data: Estimate, COUNT(*)\n"),
        Error::Query(_)
    ));
}

#[test]
fn malformed_blocks_and_tags_are_rejected() {
    assert!(matches!(
        parameter_err("series: [unclosed"),
        ParameterError::Malformed { .. }
    ));
    assert!(matches!(
        parameter_err("series: !ruby/object:Chart {}"),
        ParameterError::UnsupportedTag { .. }
    ));
}
