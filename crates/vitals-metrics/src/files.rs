//! Rendering of the four per-metric files.
//!
//! `annotations` and `fields` are all-or-nothing: a snapshot that exceeds
//! its buffer budget fails the open, and no partial content is ever
//! observable. `values` truncates row-atomically instead, and `version`
//! is a constant.

use vitals_core::Error as HostError;

use crate::emitter::Emitter;
use crate::escape::escape_into;
use crate::metric::Metric;

/// Budget for an `annotations` snapshot.
pub const ANNOTATIONS_BUF_SIZE: usize = 1024;
/// Budget for a `fields` snapshot.
pub const FIELDS_BUF_SIZE: usize = 1024;
/// Budget for a `values` snapshot.
pub const VALUES_BUF_SIZE: usize = 64 * 1024;
/// Budget for a `version` snapshot.
pub const VERSION_BUF_SIZE: usize = 8;

/// Contents of the `version` file.
pub const VERSION_CONTENTS: &str = "1\n";

pub(crate) fn render_annotations(metric: &Metric) -> Result<String, HostError> {
    let mut out = String::new();
    out.push_str("DESCRIPTION \"");
    escape_into(&mut out, metric.description());
    out.push_str("\"\n");
    if metric.is_cumulative() {
        out.push_str("CUMULATIVE\n");
    }
    if out.len() > ANNOTATIONS_BUF_SIZE {
        return Err(HostError::OutOfMemory(format!(
            "annotations snapshot for metric {:?}",
            metric.name()
        )));
    }
    Ok(out)
}

pub(crate) fn render_fields(metric: &Metric) -> Result<String, HostError> {
    let mut out = String::new();
    for field in metric.fields() {
        out.push_str(field);
        out.push(' ');
    }
    out.push_str("value\n");
    for _ in metric.fields() {
        out.push_str("str ");
    }
    out.push_str(metric.kind().token());
    out.push('\n');
    if out.len() > FIELDS_BUF_SIZE {
        return Err(HostError::OutOfMemory(format!(
            "fields snapshot for metric {:?}",
            metric.name()
        )));
    }
    Ok(out)
}

pub(crate) fn render_values(metric: &Metric) -> String {
    let mut emitter = Emitter::new(
        metric.name(),
        metric.kind(),
        metric.fields().len(),
        VALUES_BUF_SIZE,
    );
    metric.run_emit(&mut emitter);
    emitter.into_string()
}

#[cfg(test)]
mod tests {
    use vitals_core::NodeId;

    use super::*;
    use crate::metric::{MetricBuilder, MetricKind};

    fn metric(builder: MetricBuilder) -> Metric {
        Metric::from_builder(builder, Box::new(|_: &mut Emitter| {}), NodeId::new(0))
    }

    #[test]
    fn test_annotations_plain() {
        let m = metric(MetricBuilder::new("m").description("Two fields example."));
        assert_eq!(
            render_annotations(&m).unwrap(),
            "DESCRIPTION \"Two\\ fields\\ example.\"\n"
        );
    }

    #[test]
    fn test_annotations_cumulative() {
        let m = metric(MetricBuilder::new("m").description("d").cumulative());
        assert_eq!(
            render_annotations(&m).unwrap(),
            "DESCRIPTION \"d\"\nCUMULATIVE\n"
        );
    }

    #[test]
    fn test_annotations_over_budget_fails() {
        let m = metric(MetricBuilder::new("m").description("x".repeat(2048)));
        assert!(matches!(
            render_annotations(&m),
            Err(HostError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_fields_two_string_fields() {
        let m = metric(MetricBuilder::new("m").field("disk").field("cgroup"));
        assert_eq!(render_fields(&m).unwrap(), "disk cgroup value\nstr str int\n");
    }

    #[test]
    fn test_fields_no_fields_str_value() {
        let m = metric(MetricBuilder::new("m").kind(MetricKind::Str));
        assert_eq!(render_fields(&m).unwrap(), "value\nstr\n");
    }

    #[test]
    fn test_fields_over_budget_fails() {
        let m = metric(
            MetricBuilder::new("m")
                .field("a".repeat(700))
                .field("b".repeat(700)),
        );
        assert!(matches!(render_fields(&m), Err(HostError::OutOfMemory(_))));
    }

    #[test]
    fn test_version_fits_its_budget() {
        assert!(VERSION_CONTENTS.len() <= VERSION_BUF_SIZE);
    }
}
