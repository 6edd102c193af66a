//! `combine` directives: stacking groups and overlay-versus-total validation.

use crate::error::{CombinationError, ParameterError, Result, bold};
use crate::series::{Combine, Series};

/// Tolerance for float noise when comparing accumulated overlays with the total.
const EPSILON: f64 = 1e-9;

/// Checks that, at every plotted label, the overlays accumulated in declaration order never
/// exceed the `total` series. Hidden series take part in the check.
pub fn validate(series: &[Series], labels: &[String]) -> Result<()> {
    let totals: Vec<&Series> = series
        .iter()
        .filter(|s| s.combine() == Some(Combine::Total))
        .collect();
    let total = match totals.as_slice() {
        [] => return Ok(()),
        [total] => *total,
        [first, second, ..] => {
            return Err(ParameterError::invalid(
                "combine",
                format!(
                    "only one series can be combined as {}, but {} and {} both are.",
                    bold("total"),
                    bold(first.label()),
                    bold(second.label())
                ),
            )
            .into());
        }
    };
    let overlays: Vec<&Series> = series
        .iter()
        .filter(|s| s.combine().is_some_and(Combine::is_overlay))
        .collect();

    for (k, label) in labels.iter().enumerate() {
        let Some(&ceiling) = total.values().get(k) else {
            break;
        };
        let mut accumulated = 0.0;
        for overlay in &overlays {
            accumulated += overlay.values().get(k).copied().unwrap_or(0.0);
            if accumulated > ceiling + EPSILON {
                tracing::warn!(
                    series = %overlay.label(),
                    total = %total.label(),
                    label = %label,
                    accumulated,
                    ceiling,
                    "overlay exceeds total"
                );
                return Err(CombinationError {
                    series: overlay.label().to_string(),
                    query: overlay.spec().data_text.clone(),
                    label: label.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Stacking groups for the visible overlays: bottoms first, then tops.
pub fn groups(series: &[Series]) -> Vec<Vec<String>> {
    let visible = || series.iter().filter(|s| !s.is_hidden());
    let group: Vec<String> = visible()
        .filter(|s| s.combine() == Some(Combine::OverlayBottom))
        .chain(visible().filter(|s| s.combine() == Some(Combine::OverlayTop)))
        .map(|s| s.label().to_string())
        .collect();
    if group.is_empty() {
        Vec::new()
    } else {
        vec![group]
    }
}
