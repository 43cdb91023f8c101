
extern crate log;

use log::debug;

use crate::alphabet;
use crate::fm_index::{KmerInterval, ReadSetIndex, Strand};
use crate::threshold::{ThresholdTable, KMER_LEN_UPPER_BOUND};

/// breakpoint detection inside repeat seeds
const REPEAT_BREAK_FREQ_DIFF: i64 = 30;
/// frequency at which a kmer is unambiguously repeat-like during refinement
const REPEAT_KMER_PICKUP_FREQ: i64 = 40;
/// frequency gap that marks a neighbor seed as an artifact of a repeat boundary
const NEIGHBOR_FREQ_GAP: i64 = 40;
/// minimum traversal support for each prefix kmer of a repeat seed
const VERIFY_MIN_SUPPORT: u32 = 3;

/// A high-confidence anchor region of one read. Constructed by `SeedDetector`;
/// the corrector later appends bridge sequence to the terminal seed of its
/// output list.
#[derive(Clone, Debug)]
pub struct Seed {
    /// zero-based inclusive positions in the originating read
    pub start: usize,
    pub end: usize,
    /// the read substring [start..=end] in integer form
    pub seq: Vec<u8>,
    pub is_repeat: bool,
    /// kmer sizes chosen at the two ends so the occurrence count falls in the
    /// coverage window
    pub start_best_k: usize,
    pub end_best_k: usize,
    pub start_kmer_freq: u64,
    pub end_kmer_freq: u64,
    /// max over the constituent fixed-length kmers
    pub max_fixed_kmer_freq: u64
}

impl Seed {
    pub fn new(start: usize, seq: Vec<u8>, is_repeat: bool, scan_k: usize, max_fixed_kmer_freq: u64) -> Self {
        let len = seq.len();
        let end = start + len - 1;
        let best = scan_k.min(len);
        Seed {
            start,
            end,
            seq,
            is_repeat,
            start_best_k: best,
            end_best_k: best,
            start_kmer_freq: 0,
            end_kmer_freq: 0,
            max_fixed_kmer_freq
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Extends this seed with a bridge string; used when a walk lands so the
    /// growing fragment becomes the next walk's source.
    pub fn append(&mut self, extension: &[u8]) {
        self.seq.extend_from_slice(extension);
        self.end += extension.len();
    }

    /// Adjusts the end kmer sizes until their occurrence counts land inside
    /// `[freq_lower, freq_upper]`, within `[min_size, len]`.
    pub fn estimate_best_kmer_sizes(&mut self, index: &ReadSetIndex, min_size: usize,
                                    freq_lower: u64, freq_upper: u64) {
        let len = self.len();
        let min_size = min_size.min(len);

        let (k, f) = fit_kmer_size(
            |k| index.count_occurrences(&self.seq[0..k]),
            self.start_best_k.min(len), min_size, len, freq_lower, freq_upper
        );
        self.start_best_k = k;
        self.start_kmer_freq = f;

        let (k, f) = fit_kmer_size(
            |k| index.count_occurrences(&self.seq[len - k..]),
            self.end_best_k.min(len), min_size, len, freq_lower, freq_upper
        );
        self.end_best_k = k;
        self.end_kmer_freq = f;
    }
}

/// grows or shrinks one end kmer toward the target frequency window
fn fit_kmer_size<F: Fn(usize) -> u64>(count: F, init: usize, min_size: usize, max_size: usize,
                                      freq_lower: u64, freq_upper: u64) -> (usize, u64) {
    let mut size = init;
    let mut freq = count(size);
    if freq > freq_upper {
        while freq > freq_upper && size < max_size {
            size += 1;
            freq = count(size);
        }
        if freq < freq_lower && size > min_size {
            size -= 1;
            freq = count(size);
        }
    } else if freq < freq_lower {
        while freq < freq_lower && size > min_size {
            size -= 1;
            freq = count(size);
        }
        if freq > freq_upper && size < max_size {
            size += 1;
            freq = count(size);
        }
    }
    (size, freq)
}

/// Options for the seed scan.
pub struct SeedDetectorParams {
    /// the fixed pre-scan kmer length
    pub scan_k: usize,
    /// single-base dominance ratio that disqualifies a window
    pub low_complexity_ratio: f64,
    /// seeds whose densest kmer exceeds this are contamination and dropped
    pub contamination_cutoff: u64
}

impl Default for SeedDetectorParams {
    fn default() -> Self {
        SeedDetectorParams {
            scan_k: 19,
            low_complexity_ratio: 0.9,
            contamination_cutoff: 256
        }
    }
}

/// Adaptive-length scanner that classifies read positions as unique, repeat,
/// or unusable from FM-index occurrence counts and emits the ordered seed
/// sequence for one read.
pub struct SeedDetector<'a> {
    index: &'a ReadSetIndex,
    thresholds: &'a ThresholdTable,
    params: SeedDetectorParams
}

impl<'a> SeedDetector<'a> {
    pub fn new(index: &'a ReadSetIndex, thresholds: &'a ThresholdTable, params: SeedDetectorParams) -> Self {
        SeedDetector { index, thresholds, params }
    }

    /// Scans one read left to right and returns its seeds in strictly
    /// increasing, non-overlapping order. Never fails; an unusable read
    /// yields an empty list.
    /// # Arguments
    /// * `read` - the read in integer form
    pub fn detect(&self, read: &[u8]) -> Vec<Seed> {
        let k0 = self.params.scan_k;
        if read.len() < k0 {
            return Vec::new();
        }
        let n_kmers = read.len() - k0 + 1;

        //pre-scan every fixed-size kmer once; the intervals are reused for
        //extension floors and repeat refinement
        let fixed: Vec<KmerInterval> = (0..n_kmers)
            .map(|i| self.index.find_interval(&read[i..i + k0]))
            .collect();

        let low_coverage = self.select_coverage_mode(&fixed);
        let fixed_floor = self.thresholds.low_cov(k0);
        let repeat_cutoff = self.thresholds.repeat_cutoff();
        let (freq_lower, freq_upper) = self.thresholds.seed_freq_bounds();
        let best_k_min = k0.saturating_sub(2).max(1);

        let mut seeds: Vec<Seed> = Vec::new();
        let mut i: usize = 0;
        while i < n_kmers {
            let iv = &fixed[i];
            let thr = self.thresholds.select_checked(k0, low_coverage).unwrap_or(f64::MAX);
            if (iv.size() as f64) < thr || !iv.both_strands() {
                i += 1;
                continue;
            }

            if alphabet::is_low_complexity(&read[i..i + k0], self.params.low_complexity_ratio) {
                //error seeds hugging a junk window get dropped with it
                if let Some(prev) = seeds.last() {
                    if !prev.is_repeat && i > prev.end && i - prev.end < k0 && prev.len() - k0 <= 3 {
                        seeds.pop();
                    }
                }
                i += 1;
                continue;
            }

            //grow the seed one base at a time while the dynamic kmer stays solid
            let seed_start = i;
            let mut dyn_iv = *iv;
            let mut dyn_k = k0;
            let mut max_fixed_freq = iv.size();
            i += 1;
            while i < n_kmers {
                let next_k = dyn_k + 1;
                if next_k > KMER_LEN_UPPER_BOUND {
                    break;
                }
                if alphabet::is_low_complexity(&read[seed_start..seed_start + next_k], self.params.low_complexity_ratio) {
                    break;
                }
                let next = self.index.extend_right(&dyn_iv, read[i + k0 - 1]);
                let dyn_thr = self.thresholds.select_checked(next_k, low_coverage).unwrap_or(f64::MAX);
                let fixed_freq = fixed[i].size();
                if (next.size() as f64) >= dyn_thr && next.both_strands() && (fixed_freq as f64) >= fixed_floor {
                    dyn_iv = next;
                    dyn_k = next_k;
                    max_fixed_freq = max_fixed_freq.max(fixed_freq);
                    i += 1;
                } else {
                    break;
                }
            }
            let seed_end = seed_start + dyn_k - 1;

            if max_fixed_freq > self.params.contamination_cutoff {
                i += 1;
                continue;
            }

            if max_fixed_freq > repeat_cutoff {
                let (r_start, r_end, r_start_freq, _r_end_freq) =
                    self.refine_repeat_seed(read, seed_start, seed_end);

                self.cleanup_before_repeat(&mut seeds, r_start, r_start_freq, k0);

                let mut r_end = r_end;
                if !seeds.is_empty() {
                    match self.verify_repeat_seed(read, &seeds, r_start, r_end) {
                        Some(verified_len) => {
                            r_end = r_start + verified_len - 1;
                        }
                        None => {
                            i += 1;
                            continue;
                        }
                    }
                }

                let mut seed = Seed::new(r_start, read[r_start..=r_end].to_vec(), true, k0, max_fixed_freq);
                seed.estimate_best_kmer_sizes(self.index, best_k_min, freq_lower, freq_upper);
                debug!("repeat seed [{}..={}] freq {}", seed.start, seed.end, seed.max_fixed_kmer_freq);
                seeds.push(seed);
                i = r_end + 1;
            } else {
                let hitchhiker = seeds.last()
                    .map(|prev| prev.is_repeat && seed_start - prev.end <= k0)
                    .unwrap_or(false);
                if !hitchhiker {
                    let mut seed = Seed::new(seed_start, read[seed_start..=seed_end].to_vec(), false, k0, max_fixed_freq);
                    seed.estimate_best_kmer_sizes(self.index, best_k_min, freq_lower, freq_upper);
                    debug!("seed [{}..={}] freq {}", seed.start, seed.end, seed.max_fixed_kmer_freq);
                    seeds.push(seed);
                }
                i = seed_end + 1;
            }
        }
        seeds
    }

    /// Compares histogram mass at the two threshold anchors for the scan kmer
    /// length; more mass at the low-coverage anchor marks the read low-coverage.
    fn select_coverage_mode(&self, fixed: &[KmerInterval]) -> bool {
        let mut histogram: Vec<usize> = vec![0; self.thresholds.coverage() * 2];
        for iv in fixed.iter() {
            let freq = iv.size() as usize;
            if freq < histogram.len() {
                histogram[freq] += 1;
            }
        }
        let k0 = self.params.scan_k;
        let normal_anchor = self.thresholds.normal(k0) as usize;
        let low_anchor = self.thresholds.low_cov(k0) as usize;
        let normal_bin = histogram.get(normal_anchor).copied().unwrap_or(0);
        let low_bin = histogram.get(low_anchor).copied().unwrap_or(0);
        low_bin > normal_bin
    }

    /// Error kmers inside repeats still clear the cutoff, e.g. 12 11 15 60 65
    /// 70 20 19; narrow the window to the segment with the highest run of
    /// frequency by locating the breakpoints. Returns the new bounds plus the
    /// boundary kmer frequencies.
    fn refine_repeat_seed(&self, read: &[u8], start: usize, end: usize) -> (usize, usize, u64, u64) {
        let k0 = self.params.scan_k;
        let mut new_start: Option<usize> = None;
        let mut new_end: Option<usize> = None;
        let mut start_freq: u64 = 0;
        let mut end_freq: u64 = 0;

        let init_freq = self.index.count_occurrences(&read[start..start + k0]) as i64;
        let mut prev_freq = init_freq;
        if init_freq > REPEAT_KMER_PICKUP_FREQ {
            new_start = Some(start);
            start_freq = init_freq as u64;
        }

        let mut pos = start + 1;
        while pos + k0 - 1 <= end {
            let curr_freq = self.index.count_occurrences(&read[pos..pos + k0]) as i64;

            let large_freq_diff = curr_freq - prev_freq > REPEAT_BREAK_FREQ_DIFF;
            let is_repeat_kmer = new_start.is_none() && curr_freq >= REPEAT_KMER_PICKUP_FREQ;
            if large_freq_diff || is_repeat_kmer {
                let better = start_freq != 0 && curr_freq as u64 > start_freq;
                if new_start.is_none() || better {
                    new_start = Some(pos);
                    start_freq = curr_freq as u64;
                }
            }

            if prev_freq - curr_freq > REPEAT_BREAK_FREQ_DIFF {
                new_end = Some(pos + k0 - 2);
                end_freq = prev_freq as u64;
                break;
            }
            prev_freq = curr_freq;
            pos += 1;
        }

        let r_start = new_start.unwrap_or(start);
        if new_start.is_none() {
            start_freq = init_freq as u64;
        }
        let mut r_end = new_end.unwrap_or(end);
        if new_end.is_none() {
            end_freq = prev_freq as u64;
        }
        //keep at least one full scan kmer in the window
        if r_end < r_start + k0 - 1 {
            r_end = (r_start + k0 - 1).min(end);
        }
        (r_start, r_end, start_freq, end_freq)
    }

    /// The order-sensitive neighbor cleanup applied when a repeat seed is
    /// about to be emitted.
    fn cleanup_before_repeat(&self, seeds: &mut Vec<Seed>, r_start: usize, r_start_freq: u64, k0: usize) {
        //a non-repeat seed right before the repeat with a large frequency gap
        //is an error seed riding the repeat boundary
        let close_with_gap = seeds.last()
            .map(|prev| !prev.is_repeat
                 && r_start > prev.end && r_start - prev.end < k0
                 && (prev.end_kmer_freq as i64 - r_start_freq as i64).abs() > NEIGHBOR_FREQ_GAP)
            .unwrap_or(false);
        if close_with_gap {
            seeds.pop();
        }

        //a non-repeat seed sandwiched between this repeat and an earlier one
        let n = seeds.len();
        let sandwiched = n >= 2 && !seeds[n - 1].is_repeat
            && seeds[n - 2].is_repeat
            && r_start > seeds[n - 2].end && r_start - seeds[n - 2].end < 80;
        let within_large_repeat = n >= 3 && !seeds[n - 1].is_repeat
            && seeds[n - 2].is_repeat && seeds[n - 3].is_repeat
            && r_start > seeds[n - 2].end && r_start - seeds[n - 2].end < 200;
        if sandwiched || within_large_repeat {
            seeds.pop();
        }

        //two short non-repeat seeds inside a larger repeat context
        let n = seeds.len();
        let two_within_repeat = n >= 4
            && !seeds[n - 1].is_repeat && !seeds[n - 2].is_repeat
            && seeds[n - 3].is_repeat
            && r_start > seeds[n - 3].end && r_start - seeds[n - 3].end < 200
            && (seeds[n - 1].len() - k0 <= 3 || seeds[n - 2].len() - k0 <= 3);
        if two_within_repeat {
            seeds.pop();
            seeds.pop();
        }
    }

    /// Verifies a repeat seed's prefix kmers by bounded traversals from the
    /// previous seed(s). Each traversal slides a scan-size kmer rightward
    /// through the index and counts how many reach each prefix position.
    /// Returns the supported length, or `None` when even the first prefix
    /// kmer lacks support.
    fn verify_repeat_seed(&self, read: &[u8], seeds: &[Seed], seed_start: usize, seed_end: usize) -> Option<usize> {
        let k0 = self.params.scan_k;
        let candidate = &read[seed_start..=seed_end];
        if candidate.len() < k0 {
            return Some(candidate.len());
        }
        let num_prefix = candidate.len() - k0 + 1;
        let mut support: Vec<u32> = vec![0; num_prefix];

        //walk from the previous seed; when it is not a repeat, also from the
        //one before it
        let sources = if seeds.len() >= 2 && !seeds[seeds.len() - 1].is_repeat { 2 } else { 1 };
        for back in 1..=sources {
            let prev = &seeds[seeds.len() - back];
            if prev.len() < k0 {
                continue;
            }
            let init_kmer = &prev.seq[prev.len() - k0..];
            let iv = self.index.find_interval(init_kmer);
            let extend_len = seed_end + 1 - prev.start + 1 + prev.len();
            let max_steps = (1.5 * extend_len as f64) as usize;

            //forward copies of the region
            for root in iv.fwd.lo..iv.fwd.hi {
                let mut kmer: Vec<u8> = init_kmer.to_vec();
                let mut pos = root;
                let mut matched: usize = 0;
                for _ in k0..=max_steps {
                    let (b, next) = self.index.lf_step(Strand::Reversed, pos);
                    if b == 0 || k0 + matched > candidate.len() {
                        break;
                    }
                    kmer.rotate_left(1);
                    kmer[k0 - 1] = b;
                    if kmer[..] == candidate[matched..matched + k0] {
                        support[matched] += 1;
                        matched += 1;
                    }
                    pos = next;
                }
            }

            //reverse-complement copies
            for root in iv.rvc.lo..iv.rvc.hi {
                let mut kmer: Vec<u8> = alphabet::reverse_complement_i(init_kmer);
                let mut pos = root;
                let mut matched: usize = 0;
                for _ in k0..=max_steps {
                    let (b, next) = self.index.lf_step(Strand::Forward, pos);
                    if b == 0 || k0 + matched > candidate.len() {
                        break;
                    }
                    kmer.rotate_right(1);
                    kmer[0] = b;
                    if kmer == alphabet::reverse_complement_i(&candidate[matched..matched + k0]) {
                        support[matched] += 1;
                        matched += 1;
                    }
                    pos = next;
                }
            }
        }

        for (j, &count) in support.iter().enumerate() {
            if count < VERIFY_MIN_SUPPORT {
                if j == 0 {
                    return None;
                }
                return Some(k0 + j - 1);
            }
        }
        Some(candidate.len())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::alphabet::{convert_stoi, reverse_complement_i};
    use crate::fm_index::ReadSetIndex;

    /// deterministic pseudo-random DNA in integer form
    pub fn synth_seq(mut state: u64, len: usize) -> Vec<u8> {
        let mut ret: Vec<u8> = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let base = ((state >> 33) & 0x3) as u8;
            //map 0..=3 onto A C G T
            ret.push(if base == 3 { 5 } else { base + 1 });
        }
        ret
    }

    /// builds an index over `copies` forward and `copies` reverse-complement
    /// copies of each template, so every kmer is seen on both strands
    pub fn stranded_index(templates: &[Vec<u8>], copies: usize) -> ReadSetIndex {
        let mut reads: Vec<Vec<u8>> = Vec::new();
        for template in templates {
            for _ in 0..copies {
                reads.push(template.clone());
                reads.push(reverse_complement_i(template));
            }
        }
        ReadSetIndex::from_collection(&reads)
    }

    fn default_detector_parts() -> ThresholdTable {
        ThresholdTable::new(13, 60)
    }

    #[test]
    fn test_short_read_yields_nothing() {
        let template = synth_seq(11, 60);
        let index = stranded_index(&[template.clone()], 5);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());
        assert!(detector.detect(&template[0..18]).is_empty());
    }

    #[test]
    fn test_clean_read_produces_ordered_solid_seeds() {
        let template = synth_seq(12, 120);
        let index = stranded_index(&[template.clone()], 5);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());

        let seeds = detector.detect(&template);
        assert!(!seeds.is_empty());
        for window in seeds.windows(2) {
            assert!(window[0].end < window[1].start, "seeds must not overlap");
        }
        for seed in seeds.iter() {
            assert_eq!(&template[seed.start..=seed.end], &seed.seq[..]);
            assert!(!seed.is_repeat);
            //solidity at the chosen end kmer sizes
            let start_kmer = &seed.seq[0..seed.start_best_k];
            assert!(index.count_occurrences(start_kmer) >= 5);
            let end_kmer = &seed.seq[seed.len() - seed.end_best_k..];
            assert!(index.count_occurrences(end_kmer) >= 5);
        }
    }

    #[test]
    fn test_homopolymer_read_discarded() {
        let template = synth_seq(13, 80);
        let index = stranded_index(&[template.clone(), vec![1; 100]], 5);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());

        //the all-A read is fully low complexity, so no seed may start
        let seeds = detector.detect(&vec![1; 100]);
        assert!(seeds.is_empty());
    }

    #[test]
    fn test_error_gap_splits_seeds() {
        let template = synth_seq(14, 140);
        let index = stranded_index(&[template.clone()], 5);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());

        //corrupt a window in the middle of the read; kmers crossing it vanish
        let mut noisy = template.clone();
        for pos in 65..70 {
            noisy[pos] = if noisy[pos] == 1 { 2 } else { 1 };
        }
        let seeds = detector.detect(&noisy);
        assert!(seeds.len() >= 2, "expected the error window to split the seeds");
        //no seed may span the corrupted window
        for seed in seeds.iter() {
            assert!(seed.end < 65 || seed.start > 69);
        }
    }

    #[test]
    fn test_repeat_classification() {
        //a shared core between two distinct contexts gets double frequency
        let core = synth_seq(15, 40);
        let mut left = synth_seq(16, 50);
        let mut right = synth_seq(17, 50);
        let mut t1 = synth_seq(18, 50);
        let mut t2 = synth_seq(19, 50);
        left.extend_from_slice(&core);
        left.extend_from_slice(&t1);
        right.extend_from_slice(&core);
        right.extend_from_slice(&t2);
        t1 = left;
        t2 = right;

        let index = stranded_index(&[t1.clone(), t2.clone()], 8);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());

        //unique flanks have frequency 16, the shared core 32 > cutoff 17
        let seeds = detector.detect(&t1);
        assert!(seeds.iter().any(|s| s.is_repeat), "shared core should be classified repeat");
        assert!(seeds.iter().any(|s| !s.is_repeat), "unique flank should stay non-repeat");
        for seed in seeds.iter().filter(|s| s.is_repeat) {
            assert!(seed.max_fixed_kmer_freq > thresholds.repeat_cutoff());
        }
    }

    #[test]
    fn test_reverse_complement_symmetry() {
        //three 40-base blocks separated by 5-base windows; the read carries
        //junk in the windows so seed boundaries come from the evidence and
        //the layout is its own mirror image
        let template = synth_seq(20, 130);
        let index = stranded_index(&[template.clone()], 5);
        let thresholds = default_detector_parts();
        let detector = SeedDetector::new(&index, &thresholds, SeedDetectorParams::default());

        let mut read = template.clone();
        for &pos in &[40usize, 41, 42, 43, 44, 85, 86, 87, 88, 89] {
            read[pos] = if read[pos] == 1 { 2 } else { 1 };
        }

        let fwd_seeds = detector.detect(&read);
        assert!(fwd_seeds.len() >= 2);
        let rvc_read = reverse_complement_i(&read);
        let rvc_seeds = detector.detect(&rvc_read);
        assert_eq!(fwd_seeds.len(), rvc_seeds.len());

        let n = read.len();
        for (fwd, rvc) in fwd_seeds.iter().zip(rvc_seeds.iter().rev()) {
            assert_eq!(fwd.start, n - 1 - rvc.end);
            assert_eq!(fwd.end, n - 1 - rvc.start);
            assert_eq!(fwd.seq, reverse_complement_i(&rvc.seq));
            assert_eq!(fwd.start_best_k, rvc.end_best_k);
            assert_eq!(fwd.end_best_k, rvc.start_best_k);
        }
    }
}
