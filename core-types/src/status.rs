// Copyright (c) James Kassemi, SC, US. All rights reserved.

/// Metric sample emitted by a module-specific reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

impl MetricSample {
    pub fn gauge(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

/// Implemented by every module that exposes operational monitoring.
pub trait ServiceMetricsReporter: Send + Sync {
    fn service_name(&self) -> &str;
    fn collect_metrics(&self) -> Vec<MetricSample>;
}

/// Renders samples as `service_metric{labels} value` lines for log output.
pub fn render_samples(service: &str, samples: &[MetricSample]) -> String {
    let mut out = String::new();
    for sample in samples {
        out.push_str(service);
        out.push('_');
        out.push_str(&slugify(&sample.metric));
        if !sample.labels.is_empty() {
            let labels = sample
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{v}\""))
                .collect::<Vec<_>>()
                .join(",");
            out.push('{');
            out.push_str(&labels);
            out.push('}');
        }
        out.push(' ');
        out.push_str(&sample.value.to_string());
        out.push('\n');
    }
    out
}

fn slugify(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    out
}
