
extern crate log;

use bio::io::fasta;
use log::info;
use std::io;

use crate::read_correct::{CorrectionOutcome, LongRead};
use crate::work_pool::PostProcessor;

/// Accumulates run statistics and routes every read to the corrected or
/// discard stream. Fragments are named `<readId>_<fragmentIndex>_<length>`;
/// discarded reads are written verbatim. Lives on the dispatcher thread only.
pub struct CorrectionPostProcess<W: io::Write> {
    corrected_writer: fasta::Writer<W>,
    discard_writer: fasta::Writer<W>,
    total_reads_len: u64,
    corrected_len: u64,
    total_seed_num: u64,
    total_walk_num: u64,
    fm_num: u64,
    consensus_num: u64,
    high_error_num: u64,
    exceed_depth_num: u64,
    exceed_leaf_num: u64,
    seed_dis: u64,
    reads_corrected: u64,
    reads_discarded: u64
}

impl<W: io::Write> CorrectionPostProcess<W> {
    /// # Arguments
    /// * `corrected` - sink for corrected fragments
    /// * `discard` - sink for reads with too few seeds
    pub fn new(corrected: W, discard: W) -> Self {
        CorrectionPostProcess {
            corrected_writer: fasta::Writer::new(corrected),
            discard_writer: fasta::Writer::new(discard),
            total_reads_len: 0,
            corrected_len: 0,
            total_seed_num: 0,
            total_walk_num: 0,
            fm_num: 0,
            consensus_num: 0,
            high_error_num: 0,
            exceed_depth_num: 0,
            exceed_leaf_num: 0,
            seed_dis: 0,
            reads_corrected: 0,
            reads_discarded: 0
        }
    }

    fn write(&mut self, item: &LongRead, outcome: &CorrectionOutcome) -> io::Result<()> {
        if outcome.merged {
            self.reads_corrected += 1;
            self.total_reads_len += outcome.total_read_len as u64;
            self.corrected_len += outcome.corrected_len as u64;
            self.total_seed_num += outcome.seed_num as u64;
            self.total_walk_num += outcome.walk_num as u64;
            self.fm_num += outcome.fm_num as u64;
            self.consensus_num += outcome.consensus_num as u64;
            self.high_error_num += outcome.high_error_num as u64;
            self.exceed_depth_num += outcome.exceed_depth_num as u64;
            self.exceed_leaf_num += outcome.exceed_leaf_num as u64;
            self.seed_dis += outcome.seed_dis as u64;
            for (index, fragment) in outcome.fragments.iter().enumerate() {
                let id = format!("{}_{}_{}", item.label, index, fragment.len());
                self.corrected_writer.write(&id, None, fragment.as_bytes())?;
            }
        } else {
            self.reads_discarded += 1;
            self.discard_writer.write(&item.label, None, item.seq.as_bytes())?;
        }
        Ok(())
    }

    /// Flushes both streams and logs the run summary.
    pub fn finish(&mut self) -> io::Result<()> {
        self.corrected_writer.flush()?;
        self.discard_writer.flush()?;

        info!("Corrected {} reads, discarded {}", self.reads_corrected, self.reads_discarded);
        if self.total_reads_len > 0 {
            info!("totalReadsLen: {}, correctedLen: {}, ratio: {:.3}",
                  self.total_reads_len, self.corrected_len,
                  self.corrected_len as f64 / self.total_reads_len as f64);
        }
        info!("totalSeedNum: {}", self.total_seed_num);
        if self.total_walk_num > 0 {
            info!("totalWalkNum: {}, FMNum: {} ({:.1}%), ConsensusNum: {} ({:.1}%)",
                  self.total_walk_num,
                  self.fm_num, 100.0 * self.fm_num as f64 / self.total_walk_num as f64,
                  self.consensus_num, 100.0 * self.consensus_num as f64 / self.total_walk_num as f64);
            info!("highErrorNum: {} ({:.1}%)",
                  self.high_error_num, 100.0 * self.high_error_num as f64 / self.total_walk_num as f64);
            info!("exceedDepthNum: {} ({:.1}%)",
                  self.exceed_depth_num, 100.0 * self.exceed_depth_num as f64 / self.total_walk_num as f64);
            info!("exceedLeaveNum: {} ({:.1}%)",
                  self.exceed_leaf_num, 100.0 * self.exceed_leaf_num as f64 / self.total_walk_num as f64);
            info!("disBetweenSeeds: {}", self.seed_dis / self.total_walk_num);
        }
        Ok(())
    }
}

impl<W: io::Write> PostProcessor<LongRead, CorrectionOutcome> for CorrectionPostProcess<W> {
    fn process(&mut self, input: LongRead, output: CorrectionOutcome) {
        //an unwritable output path is fatal for the run
        self.write(&input, &output)
            .expect("failed writing to an output stream");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{Builder, NamedTempFile};

    fn make_outcome(fragments: Vec<&str>) -> CorrectionOutcome {
        CorrectionOutcome {
            merged: !fragments.is_empty(),
            fragments: fragments.into_iter().map(|s| s.to_string()).collect(),
            ..CorrectionOutcome::default()
        }
    }

    #[test]
    fn test_fragment_naming_and_discard_routing() {
        let corrected: NamedTempFile = Builder::new().prefix("corr_").suffix(".fa").tempfile().unwrap();
        let discard: NamedTempFile = Builder::new().prefix("disc_").suffix(".fa").tempfile().unwrap();
        let corrected_path = corrected.path().to_str().unwrap().to_string();
        let discard_path = discard.path().to_str().unwrap().to_string();

        {
            let mut sink = CorrectionPostProcess::new(&corrected, &discard);

            let good = LongRead {
                read_index: 0,
                label: "read1".to_string(),
                seq: "ACGTACGTACGT".to_string()
            };
            sink.process(good, make_outcome(vec!["ACGTAC", "GTACGTACG"]));

            let bad = LongRead {
                read_index: 1,
                label: "read2".to_string(),
                seq: "TTTTACGT".to_string()
            };
            sink.process(bad, make_outcome(vec![]));

            sink.finish().unwrap();
        }

        let corrected_out = fs::read_to_string(corrected_path).unwrap();
        assert_eq!(corrected_out, ">read1_0_6\nACGTAC\n>read1_1_9\nGTACGTACG\n");

        let discard_out = fs::read_to_string(discard_path).unwrap();
        assert_eq!(discard_out, ">read2\nTTTTACGT\n");
    }

    #[test]
    fn test_statistics_accumulate() {
        let corrected: NamedTempFile = Builder::new().suffix(".fa").tempfile().unwrap();
        let discard: NamedTempFile = Builder::new().suffix(".fa").tempfile().unwrap();
        let mut sink = CorrectionPostProcess::new(&corrected, &discard);

        for i in 0..3u64 {
            let outcome = CorrectionOutcome {
                merged: true,
                fragments: vec!["ACGT".to_string()],
                total_read_len: 100,
                corrected_len: 90,
                seed_num: 4,
                walk_num: 3,
                fm_num: 2,
                high_error_num: 1,
                seed_dis: 30,
                ..CorrectionOutcome::default()
            };
            let item = LongRead {
                read_index: i,
                label: format!("r{}", i),
                seq: "ACGT".to_string()
            };
            sink.process(item, outcome);
        }

        assert_eq!(sink.reads_corrected, 3);
        assert_eq!(sink.total_reads_len, 300);
        assert_eq!(sink.corrected_len, 270);
        assert_eq!(sink.total_walk_num, 9);
        assert_eq!(sink.fm_num, 6);
        assert_eq!(sink.high_error_num, 3);
        sink.finish().unwrap();
    }
}
