use rayon::prelude::*;
use sieve_core::psm::{Granularity, SpectralMatch};

use crate::Runner;

fn flag(x: bool) -> &'static [u8] {
    match x {
        true => b"Y",
        false => b"N",
    }
}

impl Runner {
    pub fn serialize_match(&self, m: &SpectralMatch) -> csv::ByteRecord {
        let psm = m.fdr(Granularity::Psm);
        let peptide = m.fdr(Granularity::Peptide);

        let sequences = m
            .hypotheses
            .iter()
            .map(|h| h.full_sequence.as_str())
            .collect::<Vec<_>>()
            .join("|");
        let decoys = m
            .hypotheses
            .iter()
            .map(|h| if h.decoy { "Y" } else { "N" })
            .collect::<Vec<_>>()
            .join("|");

        let mut record = csv::ByteRecord::new();
        record.push_field(m.file.as_bytes());
        record.push_field(itoa::Buffer::new().format(m.scan).as_bytes());
        record.push_field(ryu::Buffer::new().format(m.score).as_bytes());
        record.push_field(ryu::Buffer::new().format(m.delta_score).as_bytes());
        record.push_field(ryu::Buffer::new().format(m.precursor_ppm).as_bytes());
        match m.notch {
            Some(notch) => record.push_field(itoa::Buffer::new().format(notch).as_bytes()),
            None => record.push_field(b""),
        }
        record.push_field(m.digestion_agent.as_bytes());
        record.push_field(sequences.as_bytes());
        record.push_field(decoys.as_bytes());
        record.push_field(flag(m.crosslink));
        record.push_field(itoa::Buffer::new().format(m.psm_count).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.cumulative_target).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.cumulative_decoy).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.q_value).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.q_value_notch).as_bytes());
        match psm.pep {
            Some(pep) => record.push_field(ryu::Buffer::new().format(pep).as_bytes()),
            None => record.push_field(b""),
        }
        record.push_field(ryu::Buffer::new().format(psm.pep_q_value).as_bytes());
        record.push_field(ryu::Buffer::new().format(peptide.q_value).as_bytes());
        record.push_field(ryu::Buffer::new().format(peptide.pep_q_value).as_bytes());
        record
    }

    /// Write matches in the order given, returning the path written to
    pub fn write_matches(&self, matches: &[SpectralMatch]) -> anyhow::Result<String> {
        let path = self.make_path("results.sieve.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let headers = csv::ByteRecord::from(vec![
            "file",
            "scan",
            "score",
            "delta_score",
            "precursor_ppm",
            "notch",
            "digestion_agent",
            "full_sequence",
            "decoy",
            "crosslink",
            "psm_count",
            "cumulative_target",
            "cumulative_decoy",
            "q_value",
            "q_value_notch",
            "pep",
            "pep_q_value",
            "peptide_q_value",
            "peptide_pep_q_value",
        ]);

        wtr.write_byte_record(&headers)?;
        for record in matches
            .par_iter()
            .map(|m| self.serialize_match(m))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}
