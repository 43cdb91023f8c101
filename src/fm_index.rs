
extern crate log;

use log::info;

use crate::alphabet;
use crate::msbwt;
use crate::msbwt::{VC_LEN, LETTER_BITS, NUM_POWER, MASK};
use crate::rank_vector::RankBitVector;

/// Identifies one of the two BWTs backing the index: the BWT of the read
/// collection or the BWT of the reversed collection. Rightward extension of a
/// kmer is a backward extension on `Reversed`; leftward is backward on `Forward`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Strand {
    Forward,
    Reversed
}

/// Basic struct for containing a half-open range in one BWT
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BwtInterval {
    /// the lower bound, inclusive
    pub lo: u64,
    /// the upper bound, exclusive
    pub hi: u64
}

impl BwtInterval {
    #[inline]
    pub fn len(&self) -> u64 {
        self.hi.saturating_sub(self.lo)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }

    /// Returns true if `other` lies entirely within this range. For two
    /// backward-search intervals this is exactly "the longer pattern ends with
    /// the shorter one".
    #[inline]
    pub fn contains(&self, other: &BwtInterval) -> bool {
        !other.is_empty() && other.lo >= self.lo && other.hi <= self.hi
    }
}

/// The paired ranges of one kmer: its range over the reversed-collection BWT
/// (`fwd`) and the range of its reverse complement over the forward BWT
/// (`rvc`). Either may be empty. Produced only by `ReadSetIndex` primitives
/// and immutable afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct KmerInterval {
    pub fwd: BwtInterval,
    pub rvc: BwtInterval
}

impl KmerInterval {
    /// Total occurrence count of the kmer across both strands.
    #[inline]
    pub fn size(&self) -> u64 {
        self.fwd.len() + self.rvc.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fwd.is_empty() && self.rvc.is_empty()
    }

    /// True when the kmer was seen on both strands at least once.
    #[inline]
    pub fn both_strands(&self) -> bool {
        !self.fwd.is_empty() && !self.rvc.is_empty()
    }
}

/// One BWT plus its per-symbol rank vectors.
struct StrandIndex {
    vectors: Vec<RankBitVector>,
    start_index: [u64; VC_LEN],
    total_counts: [u64; VC_LEN],
    total_size: u64
}

impl StrandIndex {
    /// Expands a run-length compressed BWT into the per-symbol rank vectors.
    fn from_rle(rle_bwt: &[u8]) -> Self {
        //first pass gets symbol totals so the vectors can be sized
        let runs = decode_runs(rle_bwt);
        let mut total_counts: [u64; VC_LEN] = [0; VC_LEN];
        for &(sym, count) in runs.iter() {
            total_counts[sym as usize] += count;
        }

        let mut start_index: [u64; VC_LEN] = [0; VC_LEN];
        let mut sum_offset: u64 = 0;
        for i in 0..VC_LEN {
            start_index[i] = sum_offset;
            sum_offset += total_counts[i];
        }
        let total_size: u64 = sum_offset;

        //second pass populates the binary vectors
        let mut vectors: Vec<RankBitVector> = (0..VC_LEN)
            .map(|_| RankBitVector::with_capacity(total_size as usize))
            .collect();
        let mut bwt_index: u64 = 0;
        for &(sym, count) in runs.iter() {
            for pos in bwt_index..bwt_index + count {
                vectors[sym as usize].set_bit(pos as usize);
            }
            bwt_index += count;
        }

        for (sym, vector) in vectors.iter_mut().enumerate() {
            vector.build_index(start_index[sym]);
        }

        Self {
            vectors,
            start_index,
            total_counts,
            total_size
        }
    }

    /// Performs a range constraint, implicitly prepending `sym` to the pattern
    /// this range represents.
    #[inline]
    fn constrain(&self, sym: u8, range: &BwtInterval) -> BwtInterval {
        BwtInterval {
            lo: self.vectors[sym as usize].rank(range.lo as usize),
            hi: self.vectors[sym as usize].rank(range.hi as usize)
        }
    }

    #[inline]
    fn full_range(&self) -> BwtInterval {
        BwtInterval { lo: 0, hi: self.total_size }
    }

    /// BWT symbol at a suffix-array position.
    #[inline]
    fn char_at(&self, pos: u64) -> u8 {
        for sym in 0..VC_LEN as u8 {
            if self.vectors[sym as usize].get_bit(pos as usize) {
                return sym;
            }
        }
        unreachable!("suffix-array position {} out of bounds", pos);
    }

    /// One last-to-first step: returns the symbol at `pos` and the position of
    /// the suffix it prefixes.
    #[inline]
    fn lf_step(&self, pos: u64) -> (u8, u64) {
        let sym = self.char_at(pos);
        (sym, self.vectors[sym as usize].rank(pos as usize))
    }
}

/// decodes the RLE bytes into (symbol, run length) pairs
fn decode_runs(rle_bwt: &[u8]) -> Vec<(u8, u64)> {
    let mut runs: Vec<(u8, u64)> = Vec::new();
    let mut prev_char: u8 = 255;
    let mut power_multiple: u64 = 1;
    for &value in rle_bwt.iter() {
        let current_char: u8 = value & MASK;
        if current_char == prev_char {
            power_multiple *= NUM_POWER as u64;
            if let Some(last) = runs.last_mut() {
                last.1 += (value >> LETTER_BITS) as u64 * power_multiple;
            }
        } else {
            power_multiple = 1;
            runs.push((current_char, (value >> LETTER_BITS) as u64));
        }
        prev_char = current_char;
    }
    runs
}

/// FM-index over a read collection and its reversed twin. All kmer evidence
/// used by the corrector comes from here: paired interval lookup, incremental
/// extension, occurrence counting, and suffix-array traversal for seed
/// verification.
pub struct ReadSetIndex {
    forward: StrandIndex,
    reversed: StrandIndex
}

impl ReadSetIndex {
    /// Initializes the index from the two run-length compressed BWTs.
    /// # Arguments
    /// * `fwd_rle` - compressed BWT of the read collection
    /// * `rev_rle` - compressed BWT of the reversed read collection
    pub fn from_rle_pair(fwd_rle: &[u8], rev_rle: &[u8]) -> Self {
        let forward = StrandIndex::from_rle(fwd_rle);
        let reversed = StrandIndex::from_rle(rev_rle);
        assert_eq!(
            forward.total_size, reversed.total_size,
            "forward and reversed BWTs disagree on total symbol count"
        );
        info!("Loaded index over {} symbols, per-symbol counts: {:?}",
              forward.total_size, forward.total_counts);
        Self { forward, reversed }
    }

    /// Builds the index directly from an integer-encoded read collection.
    /// This constructs both BWTs in memory; intended for tests and for the
    /// `fmlrsc-index` binary, not for very large collections.
    /// # Examples
    /// ```rust
    /// use fmlrsc::alphabet::convert_stoi;
    /// use fmlrsc::fm_index::ReadSetIndex;
    /// let reads: Vec<Vec<u8>> = vec![convert_stoi("ACGT"), convert_stoi("CCGG")];
    /// let index = ReadSetIndex::from_collection(&reads);
    /// assert_eq!(index.count_occurrences(&convert_stoi("ACGT")), 2); //fwd + rvc
    /// ```
    pub fn from_collection(reads: &[Vec<u8>]) -> Self {
        let fwd_rle = msbwt::build_rle_bwt(reads);
        let rev_reads: Vec<Vec<u8>> = reads.iter()
            .map(|r| r.iter().rev().cloned().collect())
            .collect();
        let rev_rle = msbwt::build_rle_bwt(&rev_reads);
        Self::from_rle_pair(&fwd_rle, &rev_rle)
    }

    /// Loads the index from two numpy BWT files (see `fmlrsc-index`).
    pub fn load_numpy(fwd_path: &str, rev_path: &str) -> std::io::Result<Self> {
        let fwd_rle = msbwt::load_bwt_numpy(fwd_path)?;
        let rev_rle = msbwt::load_bwt_numpy(rev_path)?;
        Ok(Self::from_rle_pair(&fwd_rle, &rev_rle))
    }

    #[inline]
    fn strand(&self, strand: Strand) -> &StrandIndex {
        match strand {
            Strand::Forward => &self.forward,
            Strand::Reversed => &self.reversed
        }
    }

    /// The number of symbols in either BWT.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.forward.total_size
    }

    /// Backward-extension primitive: given the range of a pattern on one
    /// strand, returns the range of `sym` prepended to that pattern.
    /// # Arguments
    /// * `strand` - which BWT the range lives in
    /// * `range` - the current pattern range
    /// * `sym` - the symbol to prepend, integer form
    #[inline]
    pub fn extend_left(&self, strand: Strand, range: &BwtInterval, sym: u8) -> BwtInterval {
        self.strand(strand).constrain(sym, range)
    }

    /// Returns the paired ranges of a kmer over both strands.
    /// # Arguments
    /// * `kmer` - the integer-encoded kmer
    pub fn find_interval(&self, kmer: &[u8]) -> KmerInterval {
        let mut fwd = self.reversed.full_range();
        let mut rvc = self.forward.full_range();
        for &c in kmer.iter() {
            debug_assert!(c >= 1 && c < VC_LEN as u8);
            if !fwd.is_empty() {
                fwd = self.reversed.constrain(c, &fwd);
            }
            if !rvc.is_empty() {
                rvc = self.forward.constrain(alphabet::COMPLEMENT_INT[c as usize], &rvc);
            }
            if fwd.is_empty() && rvc.is_empty() {
                return KmerInterval::default();
            }
        }
        KmerInterval { fwd, rvc }
    }

    /// Extends a kmer's paired ranges rightward by one symbol.
    /// # Arguments
    /// * `interval` - the current paired ranges
    /// * `sym` - the symbol appended to the underlying kmer
    #[inline]
    pub fn extend_right(&self, interval: &KmerInterval, sym: u8) -> KmerInterval {
        KmerInterval {
            fwd: self.reversed.constrain(sym, &interval.fwd),
            rvc: self.forward.constrain(alphabet::COMPLEMENT_INT[sym as usize], &interval.rvc)
        }
    }

    /// Total number of occurrences of a kmer across both strands.
    #[inline]
    pub fn count_occurrences(&self, kmer: &[u8]) -> u64 {
        self.find_interval(kmer).size()
    }

    /// BWT symbol at a suffix-array position of the chosen strand. During a
    /// traversal over `Reversed` this is the next base to the right in the
    /// original text; the sentinel (0) marks the end of a read.
    #[inline]
    pub fn char_at(&self, strand: Strand, pos: u64) -> u8 {
        self.strand(strand).char_at(pos)
    }

    /// One traversal step at a suffix-array position: the symbol there and the
    /// position to continue from.
    #[inline]
    pub fn lf_step(&self, strand: Strand, pos: u64) -> (u8, u64) {
        self.strand(strand).lf_step(pos)
    }
}
