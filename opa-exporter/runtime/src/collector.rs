use opa_exporter_core::{snapshot::Reader, ConstraintInfo, ViolationRecord};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelValue, EncodeMetric, LabelValueEncoder},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::fmt::{self, Write};

/// Exposes the most recently published snapshot on every scrape.
#[derive(Debug)]
struct Instrumented(Reader);

pub fn register(reg: &mut Registry, reader: Reader) {
    reg.register_collector(Box::new(Instrumented(reader)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), fmt::Error> {
        let up_encoder = encoder.encode_descriptor(
            "up",
            "Was the last OPA exporter query successful.",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(1_i64).encode(up_encoder)?;

        // Nothing else is exported until the first refresh has been published.
        let Some(snapshot) = self.0.read() else {
            return Ok(());
        };

        let mut info_encoder = encoder.encode_descriptor(
            "constraint_information",
            "Some general information of all constraints",
            None,
            MetricType::Gauge,
        )?;
        for constraint in &snapshot.constraints {
            let total = constraint.total_violations_label();
            let labels = constraint_labels(constraint, &total);
            let gauge = ConstGauge::new(constraint.total_violations);
            gauge.encode(info_encoder.encode_family(&labels)?)?;
        }

        let mut violation_encoder = encoder.encode_descriptor(
            "constraint_violations",
            "OPA violations for all constraints",
            None,
            MetricType::Gauge,
        )?;
        for violation in &snapshot.violations {
            let labels = violation_labels(violation);
            ConstGauge::new(1_i64).encode(violation_encoder.encode_family(&labels)?)?;
        }

        Ok(())
    }
}

/// A label value escaped for the text exposition format.
#[derive(Debug)]
struct Escaped<'a>(&'a str);

impl EncodeLabelValue for Escaped<'_> {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> Result<(), fmt::Error> {
        for c in self.0.chars() {
            match c {
                '\\' => encoder.write_str("\\\\")?,
                '"' => encoder.write_str("\\\"")?,
                '\n' => encoder.write_str("\\n")?,
                c => encoder.write_char(c)?,
            }
        }
        Ok(())
    }
}

fn constraint_labels<'a>(
    c: &'a ConstraintInfo,
    total: &'a str,
) -> Vec<(&'static str, Escaped<'a>)> {
    vec![
        ("kind", Escaped(&c.kind)),
        ("name", Escaped(&c.name)),
        ("enforcementAction", Escaped(&c.enforcement_action)),
        ("totalViolations", Escaped(total)),
    ]
}

fn violation_labels(v: &ViolationRecord) -> Vec<(&'static str, Escaped<'_>)> {
    vec![
        ("kind", Escaped(&v.constraint_kind)),
        ("name", Escaped(&v.constraint_name)),
        ("violating_kind", Escaped(&v.violating_kind)),
        ("violating_name", Escaped(&v.violating_name)),
        (
            "violating_namespace",
            Escaped(v.violating_namespace.as_deref().unwrap_or_default()),
        ),
        ("violation_msg", Escaped(&v.message)),
        ("violation_enforcement", Escaped(&v.enforcement_action)),
    ]
}
