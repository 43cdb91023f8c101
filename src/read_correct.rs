
extern crate log;

use log::debug;

use crate::alphabet;
use crate::consensus::ConsensusEngine;
use crate::fm_index::ReadSetIndex;
use crate::overlap_walk::{OverlapWalker, WalkParams, WalkResult};
use crate::seed_detect::{Seed, SeedDetector, SeedDetectorParams};
use crate::threshold::ThresholdTable;
use crate::work_pool::Processor;

/// both seeds repeat and at least this far apart: walking is hopeless
const REPEAT_PAIR_MIN_DIST: usize = 70;
/// ...when either boundary kmer is this frequent
const REPEAT_PAIR_FREQ: u64 = 40;

/// a generic long read work item
#[derive(Clone, Debug)]
pub struct LongRead {
    pub read_index: u64,
    pub label: String,
    pub seq: String
}

/// Per-read result: corrected fragments plus the statistics the sink
/// aggregates. A read that produced fewer than two seeds has `merged ==
/// false` and goes to the discard stream verbatim.
#[derive(Clone, Debug, Default)]
pub struct CorrectionOutcome {
    pub merged: bool,
    pub fragments: Vec<String>,
    pub total_read_len: usize,
    pub corrected_len: usize,
    pub seed_num: usize,
    pub walk_num: usize,
    pub fm_num: usize,
    pub consensus_num: usize,
    pub high_error_num: usize,
    pub exceed_depth_num: usize,
    pub exceed_leaf_num: usize,
    pub seed_dis: usize
}

/// stores options for running the correction pipeline
#[derive(Clone, Debug)]
pub struct CorrectionParams {
    pub scan_k: usize,
    pub min_k: usize,
    pub max_leaves: usize,
    pub idmer_len: usize,
    pub coverage: usize,
    pub error_rate: f64,
    pub walk_support: u64,
    pub max_seed_interval: usize,
    pub split: bool,
    pub low_complexity_ratio: f64,
    pub contamination_cutoff: u64,
    pub consensus_identity: f64
}

impl Default for CorrectionParams {
    fn default() -> Self {
        CorrectionParams {
            scan_k: 19,
            min_k: 13,
            max_leaves: 32,
            idmer_len: 9,
            coverage: 90,
            error_rate: 0.25,
            walk_support: 3,
            max_seed_interval: 500,
            split: false,
            low_complexity_ratio: 0.9,
            contamination_cutoff: 256,
            consensus_identity: 0.73
        }
    }
}

/// Orchestrates one read: seed detection, then a walk for each consecutive
/// seed pair, assembling the output fragments as it goes. One instance per
/// worker; the index is shared read-only.
pub struct ReadCorrector<'a, C: ConsensusEngine> {
    index: &'a ReadSetIndex,
    thresholds: ThresholdTable,
    params: CorrectionParams,
    consensus: C
}

impl<'a, C: ConsensusEngine> ReadCorrector<'a, C> {
    pub fn new(index: &'a ReadSetIndex, params: CorrectionParams, consensus: C) -> Self {
        let thresholds = ThresholdTable::new(params.min_k, params.coverage);
        ReadCorrector { index, thresholds, params, consensus }
    }

    /// Corrects one read end to end.
    pub fn process(&self, read: &LongRead) -> CorrectionOutcome {
        let seq_i = alphabet::convert_stoi(&read.seq);
        let mut outcome = CorrectionOutcome {
            total_read_len: seq_i.len(),
            ..CorrectionOutcome::default()
        };

        let detector = SeedDetector::new(self.index, &self.thresholds, SeedDetectorParams {
            scan_k: self.params.scan_k,
            low_complexity_ratio: self.params.low_complexity_ratio,
            contamination_cutoff: self.params.contamination_cutoff
        });
        let seeds = detector.detect(&seq_i);
        outcome.seed_num = seeds.len();

        if seeds.len() < 2 {
            //too little anchoring evidence; the sink routes the raw read away
            debug!("read {} discarded with {} seed(s)", read.label, seeds.len());
            return outcome;
        }

        let fragments = self.correct_with_seeds(&seq_i, &seeds, &mut outcome);
        outcome.merged = true;
        outcome.fragments = fragments.iter().map(|f| alphabet::convert_itos(&f.seq)).collect();
        outcome
    }

    /// The seeds-to-bridges state machine. Public mainly so edge behaviors
    /// can be exercised with handcrafted seed lists.
    pub fn correct_with_seeds(&self, read_seq: &[u8], seeds: &[Seed],
                              outcome: &mut CorrectionOutcome) -> Vec<Seed> {
        let mut fragments: Vec<Seed> = vec![seeds[0].clone()];
        outcome.corrected_len += seeds[0].len();

        let walker = OverlapWalker::new(self.index, WalkParams {
            max_leaves: self.params.max_leaves,
            min_k: self.params.min_k,
            idmer_len: self.params.idmer_len,
            min_support: self.params.walk_support,
            error_rate_cap: self.params.error_rate,
            coverage: self.params.coverage,
            ..WalkParams::default()
        });

        for target_idx in 1..seeds.len() {
            let target = &seeds[target_idx];
            let prev = &seeds[target_idx - 1];
            let distance = target.start.saturating_sub(prev.end + 1);
            outcome.walk_num += 1;

            //distant seeds are not worth the search
            if distance >= self.params.max_seed_interval {
                self.gap_skip(&mut fragments, read_seq, prev, target, distance, outcome);
                continue;
            }

            //two distant repeats with heavy boundary kmers walk into the wrong copy
            let source = fragments.last().unwrap();
            if source.is_repeat && target.is_repeat && distance >= REPEAT_PAIR_MIN_DIST
                && (source.end_kmer_freq > REPEAT_PAIR_FREQ || target.start_kmer_freq > REPEAT_PAIR_FREQ) {
                self.gap_skip(&mut fragments, read_seq, prev, target, distance, outcome);
                continue;
            }

            let mut extend_k = source.end_best_k.min(target.start_best_k).saturating_sub(2);
            if source.is_repeat || target.is_repeat {
                extend_k = source.len().min(target.len()).min(self.params.scan_k + 2);
            }

            let between = &read_seq[target.start - distance..target.start];
            let result = walker.walk(&source.seq, between, &target.seq, extend_k);
            match result {
                WalkResult::Merged { seq, .. } => {
                    outcome.corrected_len += seq.len();
                    outcome.fm_num += 1;
                    outcome.seed_dis += distance;
                    Self::apply_bridge(&mut fragments, &seq, target);
                }
                failure => {
                    match failure {
                        WalkResult::TooManyLeaves => outcome.exceed_leaf_num += 1,
                        WalkResult::ExceededDepth => outcome.exceed_depth_num += 1,
                        _ => outcome.high_error_num += 1
                    }

                    let source = fragments.last().unwrap();
                    let tail_len = extend_k.min(source.len());
                    let mut raw_span: Vec<u8> = source.seq[source.len() - tail_len..].to_vec();
                    raw_span.extend_from_slice(between);
                    raw_span.extend_from_slice(&target.seq);
                    let rescue = self.consensus.consensus(
                        &raw_span, extend_k, self.params.consensus_identity,
                        self.params.coverage, self.index
                    );
                    match rescue {
                        Some(cons) if cons.len() > tail_len => {
                            let bridge = cons[tail_len..].to_vec();
                            outcome.corrected_len += bridge.len();
                            outcome.consensus_num += 1;
                            outcome.seed_dis += distance;
                            Self::apply_bridge(&mut fragments, &bridge, target);
                        }
                        _ => self.gap_skip(&mut fragments, read_seq, prev, target, distance, outcome)
                    }
                }
            }
        }
        fragments
    }

    /// appends a successful bridge and promotes the fragment to the next source
    fn apply_bridge(fragments: &mut Vec<Seed>, bridge: &[u8], target: &Seed) {
        let last = fragments.last_mut().unwrap();
        last.append(bridge);
        last.end_best_k = target.end_best_k;
        last.end_kmer_freq = target.end_kmer_freq;
        last.is_repeat = target.is_repeat;
    }

    /// the gap-skip branch: keep the raw read span (non-split) or open a new
    /// fragment at the target (split)
    fn gap_skip(&self, fragments: &mut Vec<Seed>, read_seq: &[u8], prev: &Seed, target: &Seed,
                distance: usize, outcome: &mut CorrectionOutcome) {
        outcome.seed_dis += distance;
        outcome.corrected_len += target.len();
        if !self.params.split {
            let raw = &read_seq[prev.end + 1..=target.end];
            let last = fragments.last_mut().unwrap();
            last.append(raw);
            last.end_best_k = target.end_best_k;
            last.end_kmer_freq = target.end_kmer_freq;
            last.is_repeat = target.is_repeat;
        } else {
            fragments.push(target.clone());
        }
    }
}

impl<'a, C: ConsensusEngine + Sync> Processor<LongRead, CorrectionOutcome> for ReadCorrector<'a, C> {
    fn process(&self, input: &LongRead) -> CorrectionOutcome {
        ReadCorrector::process(self, input)
    }
}
