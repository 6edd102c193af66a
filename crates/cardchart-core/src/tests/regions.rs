use super::*;
use crate::query::QueryEngine;

fn numbers(entry: &region::RegionEntry) -> Vec<u64> {
    entry.records.iter().map(|r| r.number).collect()
}

#[test]
fn regions_list_the_records_behind_each_point() {
    let ctx = RenderContext::page("scrum", "Iterations");
    let chart = render(
        workspace(),
        &ctx,
        r#"
series:
  - label: Stories
    data: SELECT Iteration, COUNT(*) WHERE Type = Story
"#,
    )
    .unwrap();
    let data = chart.region_data();
    assert_eq!(
        data.keys().cloned().collect::<Vec<_>>(),
        chart.labels_for_plot()
    );
    let first = &data["#10 Iteration 1"]["Stories"];
    assert_eq!(first.count, 2);
    assert_eq!(numbers(first), vec![21, 20]);
    assert_eq!(numbers(&data["(not set)"]["Stories"]), vec![23]);
    assert_eq!(data["#12 Iteration 3"]["Stories"].count, 0);

    let mql = chart.region_mql();
    assert_eq!(
        mql.conditions["(not set)"]["Stories"],
        "Iteration IS NULL AND (Type = Story)"
    );
}

#[test]
fn regions_are_computed_once_per_render() {
    let ws = fresh_workspace();
    let ctx = RenderContext::page("scrum", "Estimates");
    let chart = render(
        &ws,
        &ctx,
        "series:\n  - data: SELECT Estimate, COUNT(*) WHERE Type = Story\n",
    )
    .unwrap();
    let after_render = ws.execution_count();

    let first = chart.region_data();
    let after_first = ws.execution_count();
    assert!(after_first > after_render);

    let second = chart.region_data();
    assert_eq!(first, second);
    assert_eq!(ws.execution_count(), after_first);
}

#[test]
fn cumulative_regions_cover_everything_up_to_the_label() {
    let ctx = RenderContext::page("scrum", "Estimates");
    let chart = render(
        workspace(),
        &ctx,
        r#"
cumulative: true
show-start-label: true
x-labels-start: 3
series:
  - label: Stories
    data: SELECT Estimate, COUNT(*) WHERE Type = Story
"#,
    )
    .unwrap();
    assert_eq!(chart.labels_for_plot(), strings(&["Start", "3", "5", "8"]));
    let data = chart.region_data();
    assert_eq!(numbers(&data["Start"]["Stories"]), vec![23, 20]);
    assert_eq!(numbers(&data["3"]["Stories"]), vec![23, 21, 20]);
    assert_eq!(data["8"]["Stories"].count, 4);

    let mql = chart.region_mql();
    assert_eq!(
        mql.conditions["Start"]["Stories"],
        "Estimate IN ('1.00', '2.00') AND (Type = Story)"
    );
    assert_eq!(
        mql.conditions["3"]["Stories"],
        "Estimate IN ('1.00', '2.00', '3.00') AND (Type = Story)"
    );
}

#[test]
fn down_from_regions_hold_the_remaining_records() {
    let ctx = RenderContext::page("burndown", "Release burndown");
    let chart = render(
        workspace(),
        &ctx,
        r#"
cumulative: true
show-start-label: true
series:
  - label: Remaining
    data: "SELECT 'Development Complete Iteration', SUM(Size)"
    down-from: "SELECT SUM(Size) WHERE 'Entered Scope Iteration' IS NOT NULL"
"#,
    )
    .unwrap();
    let data = chart.region_data();
    assert_eq!(data["Start"]["Remaining"].count, 7);
    assert_eq!(numbers(&data["1"]["Remaining"]), vec![7, 6, 5, 4, 3]);
    assert_eq!(numbers(&data["4"]["Remaining"]), vec![7]);

    let mql = chart.region_mql();
    assert_eq!(
        mql.conditions["Start"]["Remaining"],
        "('Entered Scope Iteration' IS NOT NULL)"
    );
    let start = workspace()
        .records(
            &format!("SELECT Number WHERE {}", mql.conditions["Start"]["Remaining"]),
            "burndown",
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(start.len(), data["Start"]["Remaining"].count);

    let condition = &mql.conditions["1"]["Remaining"];
    assert_eq!(
        condition,
        "('Entered Scope Iteration' IS NOT NULL) AND NOT NUMBER IN (SELECT NUMBER WHERE 'Development Complete Iteration' IN ('1.00'))"
    );

    // The predicate selects the same records as the region.
    let rows = workspace()
        .records(
            &format!("SELECT Number WHERE {condition}"),
            "burndown",
            &QueryOptions::default(),
        )
        .unwrap();
    let mut selected: Vec<u64> = rows.iter().map(|r| r.number).collect();
    selected.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(selected, numbers(&data["1"]["Remaining"]));
}

#[test]
fn region_predicates_use_the_series_project() {
    let ctx = RenderContext::page("scrum", "Overview");
    let chart = render(
        workspace(),
        &ctx,
        r#"
x-labels-property: Iteration
cumulative: true
series:
  - label: Ops
    project: ops
    data: SELECT Iteration, COUNT(*) WHERE Type = Story
"#,
    )
    .unwrap();
    assert_eq!(chart.series()[0].values(), &[1.0, 3.0, 3.0, 3.0]);
    let mql = chart.region_mql();
    assert_eq!(
        mql.conditions["#11 Iteration 2"]["Ops"],
        "Iteration NUMBER IN (5, 6) AND (Type = Story)"
    );
    assert_eq!(
        mql.conditions["(not set)"]["Ops"],
        "(Iteration NUMBER IN (5, 6) OR Iteration IS NULL) AND (Type = Story)"
    );
    let data = chart.region_data();
    assert_eq!(numbers(&data["#11 Iteration 2"]["Ops"]), vec![9, 8, 7]);
}

#[test]
fn description_with_regions_embeds_both_maps() {
    let ctx = RenderContext::page("velocity", "Velocity");
    let chart = render(
        workspace(),
        &ctx,
        "series:\n  - label: Velocity\n    data: SELECT Sprint, SUM(Size)\n",
    )
    .unwrap();
    let description = chart.description_with_regions();
    assert_eq!(description["region_data"]["4"]["Velocity"]["count"], 2);
    assert_eq!(
        description["region_data"]["4"]["Velocity"]["records"][0]["number"],
        5
    );
    assert_eq!(
        description["region_mql"]["conditions"]["4"]["Velocity"],
        "Sprint = '4.00'"
    );
    assert_eq!(
        description["region_mql"]["project_identifier"]["Velocity"],
        "velocity"
    );
}
