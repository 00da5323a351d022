use std::io;

use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use mzsling_align::{AlignedGroup, ChargeConsensus};

use crate::driver::MZSlingerError;

/// The label and sample number of one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleLabel {
    pub sample: usize,
    pub name: String,
}

fn charge_label(charge: &ChargeConsensus) -> String {
    match charge {
        ChargeConsensus::Unique(z) => z.to_string(),
        ChargeConsensus::Ambiguous(modes) => {
            format!("ambiguous:{}", modes.iter().join("/"))
        }
    }
}

fn header(samples: &[SampleLabel]) -> Vec<String> {
    let mut header: Vec<String> = [
        "group",
        "consensus_mz",
        "consensus_rt",
        "charge",
        "members",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    for s in samples {
        header.push(format!("{}_mz", s.name));
        header.push(format!("{}_rt", s.name));
        header.push(format!("{}_intensity", s.name));
    }
    header.extend(["adducts", "fragment_clusters", "fragments"].map(String::from));
    header
}

fn row(index: usize, group: &AlignedGroup, samples: &[SampleLabel]) -> Vec<String> {
    let mut row = vec![
        index.to_string(),
        format!("{:0.5}", group.consensus_mz()),
        format!("{:0.4}", group.consensus_rt()),
        charge_label(group.charge()),
        group.len().to_string(),
    ];
    for s in samples {
        match group.member_for(s.sample) {
            Some(member) => {
                row.push(format!("{:0.5}", member.envelope.anchor_mz()));
                row.push(format!("{:0.4}", member.envelope.anchor_time()));
                row.push(format!("{:0.1}", member.envelope.total_intensity()));
            }
            None => row.extend([String::new(), String::new(), String::new()]),
        }
    }
    row.push(
        group
            .matches()
            .iter()
            .map(|a| format!("{} {}", a.compound_name, a.ion_name))
            .join(";"),
    );
    row.push(group.fragment_clusters().len().to_string());
    row.push(
        group
            .fragment_clusters()
            .iter()
            .map(|c| format!("{:0.4}@{}", c.mz, c.sample_count()))
            .join(";"),
    );
    row
}

/// Write one CSV row per aligned group, with each sample's anchor in its own columns
pub fn write_report<W: io::Write>(
    writer: W,
    groups: &[AlignedGroup],
    samples: &[SampleLabel],
) -> Result<(), MZSlingerError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(header(samples))?;
    for (i, group) in groups.iter().enumerate() {
        writer.write_record(row(i, group, samples))?;
    }
    writer.flush()?;
    debug!("Wrote {} aligned groups", groups.len());
    Ok(())
}

#[derive(Serialize)]
struct Report<'a> {
    samples: &'a [SampleLabel],
    groups: &'a [AlignedGroup],
}

/// Dump every aligned group, including its member envelopes, as JSON
pub fn write_json<W: io::Write>(
    writer: W,
    groups: &[AlignedGroup],
    samples: &[SampleLabel],
) -> Result<(), MZSlingerError> {
    serde_json::to_writer_pretty(writer, &Report { samples, groups })?;
    Ok(())
}
