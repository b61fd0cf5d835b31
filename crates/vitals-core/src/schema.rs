//! Rendering of `.schema` files.

use std::fmt::Write as _;

use crate::source::{Binding, Label};

/// Renders the LABEL/METRIC description of a source's labels and bindings.
///
/// Labels come out leaf-first, then ancestors in link order; one METRIC
/// block per descriptor, bindings in insertion order.
pub(crate) fn render(labels: &[Label], bindings: &[Binding]) -> String {
    let mut out = String::new();
    out.push_str("LABEL\n");
    for label in labels {
        let _ = writeln!(out, "{} {}", label.key, label.value);
    }
    out.push('\n');

    for binding in bindings {
        for value in binding.schema.values() {
            let _ = write!(
                out,
                "METRIC\nNAME {}\nFLAG {}\nTYPE INT\nDESC {}\n\n",
                value.name, value.flag, value.desc
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::value::{AggrKind, StatFlag, ValueDesc, ValueSchema, ValueType};

    fn binding(schema: Arc<ValueSchema>) -> Binding {
        Binding {
            schema,
            base: None,
            files_created: false,
            files: Vec::new(),
        }
    }

    #[test]
    fn test_render_labels_and_metrics() {
        let labels = vec![
            Label {
                key: "vm".to_string(),
                value: "vm_4".to_string(),
            },
            Label {
                key: "subsystem".to_string(),
                value: "kvm".to_string(),
            },
        ];
        let schema = ValueSchema::new(vec![
            ValueDesc::new("exits", 0, ValueType::U64).desc("Number of VM exits"),
            ValueDesc::new("halts", 8, ValueType::U64)
                .aggr(AggrKind::Sum)
                .flag(StatFlag::Gauge),
        ]);
        let bindings = vec![binding(schema)];

        let rendered = render(&labels, &bindings);
        assert_eq!(
            rendered,
            "LABEL\n\
             vm vm_4\n\
             subsystem kvm\n\
             \n\
             METRIC\nNAME exits\nFLAG CUMULATIVE\nTYPE INT\nDESC Number of VM exits\n\n\
             METRIC\nNAME halts\nFLAG GAUGE\nTYPE INT\nDESC \n\n"
        );
    }

    #[test]
    fn test_render_empty_source() {
        let labels = vec![Label {
            key: "dir".to_string(),
            value: "node".to_string(),
        }];
        assert_eq!(render(&labels, &[]), "LABEL\ndir node\n\n");
    }
}
