
/*!
# FM-index Long Read Self-Corrector
This library provides the functionality used by FMLRSC to self-correct noisy long reads using only an
FM-index over the read collection as evidence. Reads are anchored at high-confidence seed regions and
the error-dense sequence between consecutive seeds is reconstructed by a bounded best-first walk over
the index, with a consensus hook as the fallback when the walk fails.

## Example
```rust
use fmlrsc::alphabet::convert_stoi;
use fmlrsc::fm_index::ReadSetIndex;

//build an in-memory index over a tiny read collection
let reads: Vec<Vec<u8>> = vec![convert_stoi("ACGT"), convert_stoi("CCGG")];
let index = ReadSetIndex::from_collection(&reads);

//count a kmer across both strands
let kmer_count = index.count_occurrences(&convert_stoi("ACGT"));
assert_eq!(kmer_count, 2);
```
*/

/// Contains the integer alphabet, reverse complementing, and sequence guards
pub mod alphabet;
/// Contains the contract for the multiple-alignment consensus fallback
pub mod consensus;
/// Contains the FM-index over the read collection and its reversed twin
pub mod fm_index;
/// Contains the in-memory multi-string BWT builder and its disk format
pub mod msbwt;
/// Contains the bounded best-first walk that bridges consecutive seeds
pub mod overlap_walk;
/// Contains the result sink: output routing and run statistics
pub mod post_process;
/// Contains a bit vector with rank support backing the BWT symbol queries
pub mod rank_vector;
/// Contains the per-read correction pipeline from seeds to fragments
pub mod read_correct;
/// Contains the adaptive-length seed scanner
pub mod seed_detect;
/// Contains the coverage-dependent solid-kmer threshold curves
pub mod threshold;
/// Contains the generic serial, buffer-swap, and batch work pools
pub mod work_pool;
