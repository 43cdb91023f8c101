
use crate::fm_index::ReadSetIndex;

/// Contract for the multiple-alignment consensus engine the corrector falls
/// back on when a walk fails. The engine receives the raw span (source tail,
/// between-seed substring, and target seed concatenated) and may return a
/// consensus covering the same span; a non-empty return is trusted
/// unconditionally. The engine itself is an external collaborator.
pub trait ConsensusEngine {
    /// # Arguments
    /// * `raw_span` - the raw subsequence `source_tail + between + target`
    /// * `min_overlap` - minimum overlap length for recruiting reads
    /// * `identity_floor` - alignment identity below which a recruit is
    ///   treated as a false-positive repeat (0.73 at the call site)
    /// * `coverage` - the run's coverage estimate
    /// * `index` - the FM-index evidence
    fn consensus(&self, raw_span: &[u8], min_overlap: usize, identity_floor: f64,
                 coverage: usize, index: &ReadSetIndex) -> Option<Vec<u8>>;
}

/// The null engine: never produces a consensus, so the corrector always takes
/// its gap-skip branch after a failed walk.
pub struct NoConsensus;

impl ConsensusEngine for NoConsensus {
    fn consensus(&self, _raw_span: &[u8], _min_overlap: usize, _identity_floor: f64,
                 _coverage: usize, _index: &ReadSetIndex) -> Option<Vec<u8>> {
        None
    }
}
