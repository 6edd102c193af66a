use crate::error::{ParameterError, bold};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendScope {
    All,
    /// Only the last `n` eligible points.
    Last(usize),
}

impl TrendScope {
    pub fn parse(text: &str) -> Result<Self, ParameterError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match text.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Self::Last(n)),
            _ => Err(ParameterError::invalid(
                "trend-scope",
                format!(
                    "{} is not valid; use {} or an integer number greater than 0.",
                    bold(text),
                    bold("all")
                ),
            )),
        }
    }
}

/// Which trailing points are left out of the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendIgnore {
    None,
    ZeroesAtEnd,
    ZeroesAtEndAndLastValue,
}

impl TrendIgnore {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "zeroes-at-end" => Some(Self::ZeroesAtEnd),
            "zeroes-at-end-and-last-value" => Some(Self::ZeroesAtEndAndLastValue),
            _ => None,
        }
    }
}

/// Least-squares line through the eligible prefix of `values`, evaluated at every position.
///
/// `increments` holds the per-point contribution behind each value; trailing zero increments
/// are placeholders for points that have no data yet. Returns an empty line when fewer than two
/// points are eligible.
pub fn trend_line(
    values: &[f64],
    increments: &[f64],
    scope: TrendScope,
    ignore: TrendIgnore,
) -> Vec<f64> {
    let mut end = values.len().min(increments.len());
    if ignore != TrendIgnore::None {
        while end > 0 && increments[end - 1] == 0.0 {
            end -= 1;
        }
        if ignore == TrendIgnore::ZeroesAtEndAndLastValue {
            end = end.saturating_sub(1);
        }
    }
    let start = match scope {
        TrendScope::All => 0,
        TrendScope::Last(n) => end.saturating_sub(n),
    };
    if end.saturating_sub(start) < 2 {
        return Vec::new();
    }

    let n = (end - start) as f64;
    let mean_x = (start..end).map(|k| k as f64).sum::<f64>() / n;
    let mean_y = values[start..end].iter().sum::<f64>() / n;
    let (sxx, sxy) = (start..end).fold((0.0, 0.0), |(sxx, sxy), k| {
        let dx = k as f64 - mean_x;
        (sxx + dx * dx, sxy + dx * (values[k] - mean_y))
    });
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    (0..values.len())
        .map(|k| round2(intercept + slope * k as f64))
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}
