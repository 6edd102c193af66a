use serde_json::{Map, Value, json};

/// Series colors used when the site configuration leaves `palette` empty.
pub const DEFAULT_PALETTE: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// Site-level chart configuration: defaults that apply when a macro leaves a setting unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartConfig(Value);

impl Default for ChartConfig {
    fn default() -> Self {
        Self::site_defaults()
    }
}

impl ChartConfig {
    pub fn empty_object() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Built-in defaults. Overrides are deep-merged on top of these.
    pub fn site_defaults() -> Self {
        Self(json!({
            "palette": DEFAULT_PALETTE,
            "chart": {
                "type": "line",
                "width": 600,
                "height": 450,
                "sizes": {
                    "small": { "width": 400, "height": 300 },
                    "medium": { "width": 600, "height": 450 },
                    "large": { "width": 800, "height": 600 }
                }
            },
            "series": {
                "lineStyle": "solid",
                "lineWidth": 2,
                "dataPointSymbol": "circle"
            },
            "trend": {
                "lineStyle": "dash",
                "lineWidth": 2
            },
            "legend": { "position": "bottom" },
            "startLabel": "Start"
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn lookup(&self, dotted_path: &str) -> Option<&Value> {
        let mut cur = &self.0;
        for segment in dotted_path.split('.') {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }

    pub fn get_str(&self, dotted_path: &str) -> Option<&str> {
        self.lookup(dotted_path)?.as_str()
    }

    pub fn get_f64(&self, dotted_path: &str) -> Option<f64> {
        self.lookup(dotted_path)?.as_f64()
    }

    pub fn get_str_list(&self, dotted_path: &str) -> Vec<&str> {
        self.lookup(dotted_path)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn set_value(&mut self, dotted_path: &str, value: Value) {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }

        let Value::Object(ref mut root) = self.0 else {
            return;
        };
        let mut cur: &mut Map<String, Value> = root;
        let mut segments = dotted_path.split('.').peekable();
        while let Some(seg) = segments.next() {
            if segments.peek().is_none() {
                cur.insert(seg.to_string(), value);
                return;
            }
            let slot = cur.entry(seg).or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Some(next) = slot.as_object_mut() else {
                return;
            };
            cur = next;
        }
    }

    pub fn deep_merge(&mut self, other: &Value) {
        deep_merge_value(&mut self.0, other);
    }

    /// Color for the series at `index`, cycling through the palette.
    pub fn palette_color(&self, index: usize) -> String {
        let palette = self.get_str_list("palette");
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.to_vec()
        } else {
            palette
        };
        palette[index % palette.len()].to_string()
    }
}

fn deep_merge_value(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(in_map)) => {
            for (key, in_value) in in_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge_value(base_value, in_value),
                    None => {
                        base_map.insert(key.clone(), in_value.clone());
                    }
                }
            }
        }
        (base_slot, in_value) => {
            *base_slot = in_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_keeps_untouched_defaults() {
        let mut config = ChartConfig::site_defaults();
        config.deep_merge(&json!({ "chart": { "width": 900 } }));
        assert_eq!(config.get_f64("chart.width"), Some(900.0));
        assert_eq!(config.get_f64("chart.height"), Some(450.0));
        assert_eq!(config.get_str("chart.type"), Some("line"));
    }

    #[test]
    fn palette_cycles() {
        let mut config = ChartConfig::empty_object();
        config.set_value("palette", json!(["#111111", "#222222"]));
        assert_eq!(config.palette_color(0), "#111111");
        assert_eq!(config.palette_color(3), "#222222");
    }

    #[test]
    fn empty_palette_uses_the_built_in_colors() {
        let mut config = ChartConfig::site_defaults();
        config.set_value("palette", json!([]));
        assert_eq!(config.palette_color(0), DEFAULT_PALETTE[0]);
        assert_eq!(config.palette_color(11), DEFAULT_PALETTE[1]);
    }
}
