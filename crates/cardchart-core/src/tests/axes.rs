use super::*;

fn plot(ctx: &RenderContext, params: &str) -> (Vec<String>, Vec<f64>) {
    let chart = render(workspace(), ctx, params).unwrap();
    (chart.labels_for_plot(), chart.series()[0].values().to_vec())
}

#[test]
fn user_axes_list_every_member_by_name() {
    let ctx = RenderContext::page("scrum", "Owners");
    let (labels, values) = plot(
        &ctx,
        "series:\n  - data: SELECT Owner, COUNT(*) WHERE Type = Story\n",
    );
    assert_eq!(
        labels,
        strings(&["amy (Amy Adams)", "bob (Bob Builder)", "cat (Cat Stevens)"])
    );
    assert_eq!(values, vec![1.0, 2.0, 0.0]);
}

#[test]
fn user_bounds_match_login_or_name() {
    let ctx = RenderContext::page("scrum", "Owners");
    let (labels, _) = plot(
        &ctx,
        r#"
x-labels-start: Bob Builder
x-labels-end: cat
series:
  - data: SELECT Owner, COUNT(*) WHERE Type = Story
"#,
    );
    assert_eq!(labels, strings(&["bob (Bob Builder)", "cat (Cat Stevens)"]));
}

#[test]
fn date_axes_fill_every_day_between_observed_dates() {
    let ctx = RenderContext::page("scrum", "Timeline");
    let (labels, values) = plot(
        &ctx,
        "series:\n  - data: \"SELECT 'Added On', COUNT(*) WHERE Type = Story\"\n",
    );
    assert_eq!(
        labels,
        strings(&["2024-03-01", "2024-03-02", "2024-03-03", "2024-03-04"])
    );
    assert_eq!(values, vec![1.0, 0.0, 2.0, 1.0]);
}

#[test]
fn date_overrides_widen_the_axis_and_accept_relative_days() {
    let ctx = RenderContext::page("scrum", "Timeline");
    let chart = render(
        workspace(),
        &ctx,
        r#"
x-labels-start: 2024-02-28
x-labels-end: yesterday
x-labels-step: 7
series:
  - data: "SELECT 'Added On', COUNT(*) WHERE Type = Story"
"#,
    )
    .unwrap();
    assert_eq!(
        chart.labels_for_plot(),
        strings(&["2024-02-28", "2024-03-06", "2024-03-13"])
    );
    assert!(!chart.is_cacheable());
}

#[test]
fn card_axes_end_with_not_set() {
    let ctx = RenderContext::page("scrum", "Iterations");
    let (labels, values) = plot(
        &ctx,
        "series:\n  - data: SELECT Iteration, COUNT(*) WHERE Type = Story\n",
    );
    assert_eq!(
        labels,
        strings(&[
            "#10 Iteration 1",
            "#11 Iteration 2",
            "#12 Iteration 3",
            "(not set)"
        ])
    );
    assert_eq!(values, vec![2.0, 1.0, 0.0, 1.0]);
}

#[test]
fn label_conditions_limit_card_labels() {
    let ctx = RenderContext::page("scrum", "Iterations");
    let (labels, values) = plot(
        &ctx,
        r#"
x-labels-conditions: Name != 'Iteration 3'
series:
  - data: SELECT Iteration, COUNT(*) WHERE Type = Story
"#,
    );
    assert_eq!(
        labels,
        strings(&["#10 Iteration 1", "#11 Iteration 2", "(not set)"])
    );
    assert_eq!(values, vec![2.0, 1.0, 1.0]);
}

#[test]
fn label_conditions_limit_enumerated_labels() {
    let ctx = RenderContext::page("scrum", "Estimates");
    let (labels, values) = plot(
        &ctx,
        r#"
x-labels-conditions: Status = Open
series:
  - data: SELECT Estimate, COUNT(*) WHERE Type = Story
"#,
    );
    assert_eq!(labels, strings(&["3", "5"]));
    assert_eq!(values, vec![1.0, 1.0]);
}

#[test]
fn tree_relationship_axes_label_by_path() {
    let ctx = RenderContext::page("scrum", "Releases");
    let (labels, values) = plot(
        &ctx,
        r#"
series:
  - data: "SELECT 'Planning Release', COUNT(*) WHERE Type = Story"
"#,
    );
    assert_eq!(labels, strings(&["Release 1", "Release 2", "(not set)"]));
    assert_eq!(values, vec![2.0, 0.0, 2.0]);
}

#[test]
fn tree_axes_with_bounds_label_by_card() {
    let ctx = RenderContext::page("scrum", "Releases");
    let (labels, _) = plot(
        &ctx,
        r#"
x-labels-tree: Planning
x-labels-start: (release card)
x-labels-end: Release 2
series:
  - data: "SELECT 'Planning Release', COUNT(*) WHERE Type = Story"
"#,
    );
    assert_eq!(labels, strings(&["#1 Release 1", "#2 Release 2"]));
}

#[test]
fn steps_sample_from_the_first_plotted_label() {
    let ctx = RenderContext::page("scrum", "Estimates");
    let (labels, values) = plot(
        &ctx,
        r#"
x-labels-step: 2
series:
  - data: SELECT Estimate, COUNT(*) WHERE Type = Story
"#,
    );
    assert_eq!(labels, strings(&["1", "3", "8"]));
    assert_eq!(values, vec![1.0, 1.0, 0.0]);
}

#[test]
fn explicit_property_overrides_the_series_category() {
    let ctx = RenderContext::page("scrum", "Status");
    let (labels, values) = plot(
        &ctx,
        r#"
x-labels-property: Status
series:
  - data: SELECT Status, SUM(Size)
"#,
    );
    assert_eq!(labels, strings(&["New", "Open", "Done"]));
    assert_eq!(values, vec![0.0, 8.0, 2.0]);
}
