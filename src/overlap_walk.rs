
use triple_accel::levenshtein;

use crate::fm_index::{KmerInterval, ReadSetIndex};

/// extension alphabet, A C G T in integer form
const EXT_CHARS: [u8; 4] = [1, 2, 3, 5];
/// how far a leaf length may drift from a support entry's expected length
const MAX_INDEL_DRIFT: i64 = 9;

/// Budgets and filters for one walker instance.
#[derive(Clone, Debug)]
pub struct WalkParams {
    /// frontier size bound
    pub max_leaves: usize,
    /// floor for dynamic kmer reduction
    pub min_k: usize,
    /// length of the target kmers used for mid-walk support tests
    pub idmer_len: usize,
    /// occurrence floor for accepting an extension
    pub min_support: u64,
    /// homopolymer cap on the extension tail
    pub max_tail_run: usize,
    /// leaves whose approximate error rate exceeds this are dropped
    pub error_rate_cap: f64,
    /// coverage estimate; scales the extension support floor
    pub coverage: usize
}

impl Default for WalkParams {
    fn default() -> Self {
        WalkParams {
            max_leaves: 32,
            min_k: 13,
            idmer_len: 9,
            min_support: 3,
            max_tail_run: 9,
            error_rate_cap: 0.25,
            coverage: 90
        }
    }
}

impl WalkParams {
    /// the extension floor, anchored at coverage 60
    #[inline]
    fn support_floor(&self) -> u64 {
        ((self.min_support as f64 * self.coverage as f64 / 60.0) as u64).max(self.min_support)
    }
}

/// Outcome of one source-to-target walk. Everything that is not `Merged` is a
/// typed failure the corrector tallies and recovers from; nothing here is an
/// error in the propagation sense.
#[derive(Clone, Debug, PartialEq)]
pub enum WalkResult {
    /// the reconstructed span from just after the source tail through the
    /// whole target seed
    Merged {
        seq: Vec<u8>,
        /// edit distance between the reconstruction and the raw query
        aln_score: u32,
        /// mean occurrence count along the winning path
        kmer_freq: f64
    },
    /// the walk could not start (empty source-tail interval)
    NoPath,
    /// the frontier outgrew the leaf budget
    TooManyLeaves,
    /// every live path outgrew the length budget without completing
    ExceededDepth,
    /// the frontier died before reaching half the minimum length
    LowEarlyFreq,
    /// the frontier died in the later half of the walk
    LowLateFreq
}

impl WalkResult {
    #[inline]
    pub fn is_merged(&self) -> bool {
        matches!(self, WalkResult::Merged { .. })
    }
}

/// One frontier node. Leaves live in a per-walk arena and refer to their
/// predecessor by index; the arena dies with the walk.
struct Leaf {
    #[allow(dead_code)]
    parent: usize,
    interval: KmerInterval,
    /// source tail plus every extension character
    label: Vec<u8>,
    /// last extension character and its run length
    tail_char: u8,
    tail_run: usize,
    /// interval size when this leaf was created
    #[allow(dead_code)]
    kmer_freq: u64,
    /// summed interval sizes along the path
    acc_freq: u64,
    /// latest error-rate estimate against the raw query
    error_accum: f64
}

/// A support entry: the paired ranges of one target idmer and the label
/// length a matching leaf is expected to have.
struct TargetEntry {
    interval: KmerInterval,
    expected_len: usize
}

/// Best-first bounded walk over the FM-index from a source seed tail toward a
/// target seed. The frontier extends one base per round on every live leaf;
/// children are filtered by occurrence support, homopolymer runs, target
/// support, and error rate, and the kmer size degrades when the whole
/// frontier runs out of frequency.
pub struct OverlapWalker<'a> {
    index: &'a ReadSetIndex,
    params: WalkParams
}

impl<'a> OverlapWalker<'a> {
    pub fn new(index: &'a ReadSetIndex, params: WalkParams) -> Self {
        OverlapWalker { index, params }
    }

    /// Walks from the tail of `source` to (the whole of) `target`.
    /// # Arguments
    /// * `source` - the source seed sequence, integer form
    /// * `between` - the raw read substring between the two seeds
    /// * `target` - the target seed sequence, integer form
    /// * `init_k` - the extension kmer size selected by the corrector
    pub fn walk(&self, source: &[u8], between: &[u8], target: &[u8], init_k: usize) -> WalkResult {
        let k = init_k.min(source.len()).min(target.len()).max(self.params.min_k.min(target.len()));
        let s_tail = &source[source.len() - k..];
        let root_iv = self.index.find_interval(s_tail);
        if root_iv.is_empty() {
            return WalkResult::NoPath;
        }

        let m_len = between.len();
        let max_len: usize = (1.1 * (m_len as f64 + 30.0)) as usize + k + k;
        let min_len: usize = (0.9 * (m_len as f64 - 30.0) + (k + k) as f64).max(0.0) as usize;

        //the target's idmers let a leaf cheaply prove it is converging on the
        //target without walking the FM-index all the way through it
        let idmer = self.params.idmer_len.min(target.len());
        let entries: Vec<TargetEntry> = (0..=target.len() - idmer)
            .map(|d| TargetEntry {
                interval: self.index.find_interval(&target[d..d + idmer]),
                expected_len: k + m_len + d + idmer
            })
            .collect();
        //below this length no idmer entry can witness a leaf even at maximal
        //indel drift, so an unsupported verdict there would be vacuous
        let support_horizon = k + m_len + idmer + MAX_INDEL_DRIFT as usize;
        let terminal = self.index.find_interval(&target[..k]);

        //the raw query the error gate compares against
        let query: Vec<u8> = between.iter().chain(target.iter()).cloned().collect();

        let support_floor = self.params.support_floor();
        let mut arena: Vec<Leaf> = Vec::new();
        arena.push(Leaf {
            parent: 0,
            interval: root_iv,
            label: s_tail.to_vec(),
            tail_char: *s_tail.last().unwrap(),
            tail_run: trailing_run(s_tail),
            kmer_freq: root_iv.size(),
            acc_freq: root_iv.size(),
            error_accum: 0.0
        });
        let mut live: Vec<usize> = vec![0];
        let mut completed: Vec<usize> = Vec::new();

        let mut cur_k = k;
        let mut cur_len = k;
        let mut overflow = false;
        let mut exceeded_depth = false;

        while !live.is_empty() {
            if !completed.is_empty() && cur_len > min_len {
                break;
            }
            if cur_len + 1 > max_len {
                exceeded_depth = true;
                break;
            }

            //gather candidate extensions, degrading the kmer size while the
            //whole frontier is below the support floor
            let extensions = loop {
                let extensions = self.collect_extensions(&arena, &live);
                let any_usable = extensions.iter().any(|(_, _, iv)| iv.size() >= support_floor);
                if any_usable {
                    break extensions;
                }
                if cur_k <= self.params.min_k {
                    break Vec::new();
                }
                cur_k = (cur_k - 2).max(self.params.min_k);
                self.refresh_intervals(&mut arena, &live, cur_k);
            };
            if extensions.is_empty() {
                live.clear();
                break;
            }

            cur_len += 1;
            let mut next_live: Vec<usize> = Vec::new();
            for (leaf_id, c, iv) in extensions {
                if iv.size() < support_floor {
                    continue;
                }
                let parent = &arena[leaf_id];
                let tail_run = if c == parent.tail_char { parent.tail_run + 1 } else { 1 };
                if tail_run > self.params.max_tail_run {
                    continue;
                }

                let mut label = parent.label.clone();
                label.push(c);

                if cur_len > min_len && cur_len > support_horizon
                    && !self.is_supported(&entries, &iv, cur_len) {
                    continue;
                }

                let reached_target = (min_len..=max_len).contains(&cur_len)
                    && (terminal.fwd.contains(&iv.fwd) || terminal.rvc.contains(&iv.rvc));

                let ext_len = cur_len - k;
                let error_accum = if ext_len >= idmer {
                    let cmp_len = ext_len.min(query.len());
                    levenshtein(&label[k..], &query[..cmp_len]) as f64 / ext_len as f64
                } else {
                    parent.error_accum
                };
                //a child landing on the target is banked regardless of how
                //noisy the raw gap reads; its error rate only feeds the final
                //path scoring
                if !reached_target && error_accum > self.params.error_rate_cap {
                    continue;
                }

                let acc_freq = parent.acc_freq + iv.size();
                arena.push(Leaf {
                    parent: leaf_id,
                    interval: iv,
                    label,
                    tail_char: c,
                    tail_run,
                    kmer_freq: iv.size(),
                    acc_freq,
                    error_accum
                });
                let child_id = arena.len() - 1;
                if reached_target {
                    completed.push(child_id);
                } else {
                    next_live.push(child_id);
                }
            }

            live = next_live;
            if live.len() > self.params.max_leaves {
                overflow = true;
                break;
            }
        }

        if !completed.is_empty() {
            return self.best_path(&arena, &completed, target, k, m_len, &query);
        }
        if overflow {
            return WalkResult::TooManyLeaves;
        }
        if exceeded_depth {
            return WalkResult::ExceededDepth;
        }
        if (cur_len as f64) < 0.5 * min_len as f64 {
            WalkResult::LowEarlyFreq
        } else {
            WalkResult::LowLateFreq
        }
    }

    /// queries the four extensions of every live leaf; empty results are
    /// dropped here, all other filtering happens in the main loop
    fn collect_extensions(&self, arena: &[Leaf], live: &[usize]) -> Vec<(usize, u8, KmerInterval)> {
        let mut extensions: Vec<(usize, u8, KmerInterval)> = Vec::with_capacity(live.len() * 2);
        for &leaf_id in live {
            let leaf = &arena[leaf_id];
            for &c in EXT_CHARS.iter() {
                let iv = self.index.extend_right(&leaf.interval, c);
                if !iv.is_empty() {
                    extensions.push((leaf_id, c, iv));
                }
            }
        }
        extensions
    }

    /// re-walks the last `new_k` label characters of every live leaf; this is
    /// the only way previously unreachable frequency can re-enter the search,
    /// and it never replays history
    fn refresh_intervals(&self, arena: &mut Vec<Leaf>, live: &[usize], new_k: usize) {
        for &leaf_id in live {
            let label = &arena[leaf_id].label;
            let refreshed = self.index.find_interval(&label[label.len() - new_k..]);
            arena[leaf_id].interval = refreshed;
        }
    }

    /// a leaf deep enough to be inside the target must overlap a target idmer
    /// range at a position consistent with its length
    fn is_supported(&self, entries: &[TargetEntry], iv: &KmerInterval, len: usize) -> bool {
        let mut applicable = false;
        for entry in entries {
            if (len as i64 - entry.expected_len as i64).abs() > MAX_INDEL_DRIFT {
                continue;
            }
            applicable = true;
            if entry.interval.fwd.contains(&iv.fwd) || entry.interval.rvc.contains(&iv.rvc) {
                return true;
            }
        }
        !applicable
    }

    /// scores the completed paths: closest to the expected span length, then
    /// highest aggregate frequency, then lowest error rate
    fn best_path(&self, arena: &[Leaf], completed: &[usize], target: &[u8],
                 k: usize, m_len: usize, query: &[u8]) -> WalkResult {
        let expected_total = k + m_len + target.len();
        let mut best: Option<(usize, usize, u64, f64)> = None;
        for &id in completed {
            let leaf = &arena[id];
            let merged_len = leaf.label.len() + target.len() - k;
            let len_delta = (merged_len as i64 - expected_total as i64).unsigned_abs() as usize;
            let candidate = (id, len_delta, leaf.acc_freq, leaf.error_accum);
            best = match best {
                None => Some(candidate),
                Some(prev) => {
                    let better = candidate.1 < prev.1
                        || (candidate.1 == prev.1 && candidate.2 > prev.2)
                        || (candidate.1 == prev.1 && candidate.2 == prev.2 && candidate.3 < prev.3);
                    if better { Some(candidate) } else { Some(prev) }
                }
            };
        }

        let (id, _, acc_freq, _) = best.unwrap();
        let leaf = &arena[id];
        let mut seq: Vec<u8> = leaf.label[k..].to_vec();
        seq.extend_from_slice(&target[k..]);
        let aln_score = levenshtein(&seq, query);
        let path_nodes = (leaf.label.len() - k + 1) as f64;
        WalkResult::Merged {
            seq,
            aln_score,
            kmer_freq: acc_freq as f64 / path_nodes
        }
    }
}

/// length of the trailing run of identical characters
fn trailing_run(seq: &[u8]) -> usize {
    let last = match seq.last() {
        Some(&c) => c,
        None => return 0
    };
    seq.iter().rev().take_while(|&&c| c == last).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::convert_stoi;
    use crate::seed_detect::tests::{stranded_index, synth_seq};

    fn test_params() -> WalkParams {
        WalkParams { coverage: 60, ..WalkParams::default() }
    }

    #[test]
    fn test_trailing_run() {
        assert_eq!(trailing_run(&convert_stoi("ACGTT")), 2);
        assert_eq!(trailing_run(&convert_stoi("AAAAA")), 5);
        assert_eq!(trailing_run(&convert_stoi("ACGTA")), 1);
        assert_eq!(trailing_run(&[]), 0);
    }

    #[test]
    fn test_bridge_recovers_true_sequence() {
        let template = synth_seq(31, 160);
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let source = &template[20..50];
        let between = &template[50..80];
        let target = &template[80..110];
        match walker.walk(source, between, target, 15) {
            WalkResult::Merged { seq, aln_score, kmer_freq } => {
                assert_eq!(&seq[..], &template[50..110]);
                assert_eq!(aln_score, 0);
                assert!(kmer_freq >= 3.0);
            }
            other => panic!("expected Merged, got {:?}", other)
        }
    }

    #[test]
    fn test_bridge_corrects_noisy_gap() {
        let template = synth_seq(32, 160);
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        //the raw read carries two substitution errors in the gap; the index
        //evidence still reconstructs the true sequence
        let mut noisy_between = template[50..80].to_vec();
        noisy_between[10] = if noisy_between[10] == 1 { 2 } else { 1 };
        noisy_between[20] = if noisy_between[20] == 3 { 5 } else { 3 };

        match walker.walk(&template[20..50], &noisy_between, &template[80..110], 15) {
            WalkResult::Merged { seq, aln_score, .. } => {
                assert_eq!(&seq[..], &template[50..110]);
                assert_eq!(aln_score, 2);
            }
            other => panic!("expected Merged, got {:?}", other)
        }
    }

    #[test]
    fn test_zero_distance_bridge_is_target() {
        let template = synth_seq(33, 120);
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let source = &template[20..50];
        let target = &template[50..80];
        match walker.walk(source, &[], target, 15) {
            WalkResult::Merged { seq, .. } => assert_eq!(&seq[..], target),
            other => panic!("expected Merged, got {:?}", other)
        }
    }

    #[test]
    fn test_landing_leaf_bypasses_error_gate() {
        //source and target sit back to back in the template, but the raw read
        //filled the gap with eight junk bases; with the short target the gate
        //first activates on the landing step itself, where the reconstruction
        //is compared against pure junk and the error rate blows past the cap.
        //the target 8-mer is unbordered so no shifted window can land early
        let mut template = synth_seq(52, 30);
        template.extend_from_slice(&convert_stoi("AACCGGTT"));
        template.extend_from_slice(&synth_seq(53, 20));
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let source = &template[0..30];
        let target = &template[30..38];
        //lev("AACCGGTT", "TTTTGGGG") >= 6, so the landing error rate is >= 0.75
        let junk_between = convert_stoi("TTTTGGGG");
        match walker.walk(source, &junk_between, target, 15) {
            WalkResult::Merged { seq, .. } => assert_eq!(&seq[..], target),
            other => panic!("expected Merged, got {:?}", other)
        }
    }

    #[test]
    fn test_walk_soundness_and_length_bounds() {
        let template = synth_seq(34, 200);
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let k = 15;
        let source = &template[10..40];
        let between = &template[40..95];
        let target = &template[95..125];
        let m_len = between.len();
        match walker.walk(source, between, target, k) {
            WalkResult::Merged { seq, .. } => {
                //every bridge kmer must be index-backed
                let mut span = source[source.len() - k..].to_vec();
                span.extend_from_slice(&seq);
                for window in span.windows(k) {
                    assert!(index.count_occurrences(window) > 0);
                }
                //and the total label length must respect the walk budget
                let max_len = (1.1 * (m_len as f64 + 30.0)) as usize + 2 * k;
                let min_len = (0.9 * (m_len as f64 - 30.0) + 2.0 * k as f64).max(0.0) as usize;
                let label_len = seq.len() + k - (target.len() - k);
                assert!(label_len >= min_len && label_len <= max_len);
            }
            other => panic!("expected Merged, got {:?}", other)
        }
    }

    #[test]
    fn test_branching_repeat_exceeds_leaf_budget() {
        //one shared 25-base prefix with four distinct continuations
        let prefix = synth_seq(35, 25);
        let mut templates: Vec<Vec<u8>> = Vec::new();
        for (i, &b) in [1u8, 2, 3, 5].iter().enumerate() {
            let mut t = prefix.clone();
            t.push(b);
            t.extend_from_slice(&synth_seq(36 + i as u64, 60));
            templates.push(t);
        }
        let far = synth_seq(40, 60);
        templates.push(far.clone());
        let index = stranded_index(&templates, 5);

        let params = WalkParams { max_leaves: 2, coverage: 60, ..WalkParams::default() };
        let walker = OverlapWalker::new(&index, params);
        let junk = synth_seq(41, 30);
        let result = walker.walk(&prefix, &junk, &far[10..40], 15);
        assert_eq!(result, WalkResult::TooManyLeaves);
    }

    #[test]
    fn test_dead_end_is_early_failure() {
        //the source sits at the very end of its template, so there is nothing
        //to extend into
        let template = synth_seq(42, 50);
        let other = synth_seq(43, 60);
        let index = stranded_index(&[template.clone(), other.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let junk = synth_seq(44, 40);
        let result = walker.walk(&template[20..50], &junk, &other[10..40], 15);
        assert_eq!(result, WalkResult::LowEarlyFreq);
    }

    #[test]
    fn test_evidence_dies_late() {
        //the template is truncated mid-gap, so the frontier starves after
        //covering most of the distance
        let full = synth_seq(45, 100);
        let truncated = full[..85].to_vec();
        let other = synth_seq(46, 60);
        let index = stranded_index(&[truncated, other.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let source = &full[0..30];
        let between = &full[30..70];
        let result = walker.walk(source, between, &other[10..40], 15);
        assert_eq!(result, WalkResult::LowLateFreq);
    }

    #[test]
    fn test_no_path_without_source_evidence() {
        let template = synth_seq(47, 80);
        let index = stranded_index(&[template.clone()], 5);
        let walker = OverlapWalker::new(&index, test_params());

        let absent_source = synth_seq(48, 30);
        let result = walker.walk(&absent_source, &template[30..50], &template[50..80], 15);
        assert_eq!(result, WalkResult::NoPath);
    }

    #[test]
    fn test_tandem_walk_exceeds_depth() {
        //a 9-periodic repeat keeps the frontier supported while the target's
        //unique junction sits beyond the length budget
        let unit = convert_stoi("ACGTTGACC");
        let mut template = synth_seq(49, 30);
        for _ in 0..12 {
            template.extend_from_slice(&unit);
        }
        //a second locus: junction followed by the same repeat
        let mut locus2 = synth_seq(50, 20);
        let junction = convert_stoi("TATCGA");
        locus2.extend_from_slice(&junction);
        for _ in 0..5 {
            locus2.extend_from_slice(&unit);
        }
        locus2.extend_from_slice(&synth_seq(51, 20));
        let index = stranded_index(&[template.clone(), locus2.clone()], 5);

        let params = WalkParams { error_rate_cap: 1.0, coverage: 60, ..WalkParams::default() };
        let walker = OverlapWalker::new(&index, params);

        let source = &template[0..30];
        let between = &template[30..35];
        let target = &locus2[20..65]; //junction + repeat
        let result = walker.walk(source, between, target, 15);
        assert_eq!(result, WalkResult::ExceededDepth);
    }
}
