
extern crate log;

use log::info;
use std::fs;
use std::io::prelude::*;
use std::io::BufWriter;

use crate::alphabet;

pub const VC_LEN: usize = 6;      //$ A C G N T
pub const LETTER_BITS: usize = 3; //defined
pub const NUMBER_BITS: usize = 5; //8-letterBits
pub const NUM_POWER: usize = 32;  //2**numberBits
pub const MASK: u8 = 0x07;        //255 >> numberBits
pub const COUNT_MASK: u8 = 0x1F;

/// Builds the multi-string BWT of a read collection entirely in memory and
/// returns it in the run-length byte encoding used on disk.
/// Each string gets its own sentinel; sentinels sort below all bases and
/// among themselves by collection order after an initial lexicographic sort
/// of the strings, which reproduces what `ropebwt2 -LR` emits for the same
/// collection.
/// # Arguments
/// * `strings` - the integer-encoded read collection (no sentinels)
/// # Examples
/// ```rust
/// use fmlrsc::alphabet::convert_stoi;
/// use fmlrsc::msbwt::{build_rle_bwt, decompress_to_string};
/// let data: Vec<Vec<u8>> = vec![convert_stoi("ACGT"), convert_stoi("CCGG")];
/// let rle = build_rle_bwt(&data);
/// assert_eq!(decompress_to_string(&rle), "TG$$CAGCCG");
/// ```
pub fn build_rle_bwt(strings: &[Vec<u8>]) -> Vec<u8> {
    let mut sorted_strings: Vec<&Vec<u8>> = strings.iter().collect();
    sorted_strings.sort();

    //one entry per suffix: (string id, suffix start)
    let mut suffixes: Vec<(usize, usize)> = Vec::new();
    for (sid, s) in sorted_strings.iter().enumerate() {
        for j in 0..=s.len() {
            suffixes.push((sid, j));
        }
    }

    suffixes.sort_by(|&(sa, ja), &(sb, jb)| {
        let s1 = sorted_strings[sa];
        let s2 = sorted_strings[sb];
        let mut t = 0;
        loop {
            match (s1.get(ja + t), s2.get(jb + t)) {
                (Some(c1), Some(c2)) => {
                    if c1 != c2 {
                        return c1.cmp(c2);
                    }
                    t += 1;
                }
                //sentinel sorts below every base
                (None, Some(_)) => return std::cmp::Ordering::Less,
                (Some(_), None) => return std::cmp::Ordering::Greater,
                //two sentinels order by string rank
                (None, None) => return sa.cmp(&sb)
            }
        }
    });

    //the BWT is the character preceding each suffix
    let mut bwt: Vec<u8> = Vec::with_capacity(suffixes.len());
    for &(sid, j) in suffixes.iter() {
        if j == 0 {
            bwt.push(0);
        } else {
            bwt.push(sorted_strings[sid][j - 1]);
        }
    }

    compress_bwt(&bwt)
}

/// Run-length compresses a plain integer-encoded BWT into the on-disk byte
/// encoding: 3 low bits of symbol, 5 high bits of run count, with longer runs
/// spilling into successive bytes in base-32 digits.
/// # Arguments
/// * `bwt` - the plain BWT in integer form
pub fn compress_bwt(bwt: &[u8]) -> Vec<u8> {
    let mut ret: Vec<u8> = Vec::new();
    if bwt.is_empty() {
        return ret;
    }

    let mut curr: u8 = bwt[0];
    let mut count: u64 = 0;
    for &sym in bwt.iter() {
        assert!(sym < VC_LEN as u8, "unexpected symbol in BWT: {}", sym);
        if sym == curr {
            count += 1;
        } else {
            push_run(&mut ret, curr, count);
            curr = sym;
            count = 1;
        }
    }
    push_run(&mut ret, curr, count);
    ret
}

#[inline]
fn push_run(out: &mut Vec<u8>, sym: u8, mut count: u64) {
    while count > 0 {
        out.push(sym | ((count as u8 & COUNT_MASK) << LETTER_BITS));
        count >>= NUMBER_BITS;
    }
}

/// Expands a run-length compressed BWT back to its ASCII string form.
/// Mostly useful for tests and debugging.
/// # Arguments
/// * `rle_bwt` - the compressed BWT bytes
pub fn decompress_to_string(rle_bwt: &[u8]) -> String {
    let mut ret: String = String::new();
    let mut prev_char: u8 = 255;
    let mut power_multiple: u64 = 1;
    for &value in rle_bwt.iter() {
        let current_char: u8 = value & MASK;
        if current_char == prev_char {
            power_multiple *= NUM_POWER as u64;
        } else {
            power_multiple = 1;
        }
        prev_char = current_char;
        let count: u64 = (value >> LETTER_BITS) as u64 * power_multiple;
        let symbol = alphabet::convert_itos(&[current_char]);
        for _ in 0..count {
            ret.push_str(&symbol);
        }
    }
    ret
}

/// Saves a compressed BWT to the numpy file format for compatibility with the
/// other msbwt tooling.
/// # Arguments
/// * `rle_bwt` - the compressed BWT bytes
/// * `filename` - the path to write
pub fn save_bwt_numpy(rle_bwt: &[u8], filename: &str) -> std::io::Result<()> {
    let file = fs::File::create(filename)?;
    let mut writer = BufWriter::new(file);

    //numpy v1.0 header with the total length padded out to a 16-byte boundary
    let dict = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': ({},), }}", rle_bwt.len());
    let mut header_len = dict.len() + 1;
    while (10 + header_len) % 16 != 0 {
        header_len += 1;
    }
    writer.write_all(b"\x93NUMPY\x01\x00")?;
    writer.write_all(&[(header_len & 0xFF) as u8, (header_len >> 8) as u8])?;
    writer.write_all(dict.as_bytes())?;
    for _ in 0..(header_len - dict.len() - 1) {
        writer.write_all(b" ")?;
    }
    writer.write_all(b"\n")?;

    writer.write_all(rle_bwt)?;
    writer.flush()?;
    Ok(())
}

/// Loads a compressed BWT from the numpy file format.
/// # Arguments
/// * `filename` - the path to load
pub fn load_bwt_numpy(filename: &str) -> std::io::Result<Vec<u8>> {
    //read the numpy header: http://docs.scipy.org/doc/numpy-1.10.1/neps/npy-format.html
    let full_file_size: u64 = fs::metadata(&filename)?.len();

    let mut file = fs::File::open(&filename)?;
    let mut init_header: Vec<u8> = vec![0; 16];
    file.read_exact(&mut init_header[..])?;

    let header_len: usize = init_header[8] as usize + 256 * init_header[9] as usize;
    let mut skip_bytes: usize = 10 + header_len;
    if skip_bytes % 16 != 0 {
        skip_bytes = ((skip_bytes / 16) + 1) * 16;
    }
    let mut skip_header: Vec<u8> = vec![0; skip_bytes - 16];
    file.read_exact(&mut skip_header[..])?;

    let bwt_disk_size: u64 = full_file_size - skip_bytes as u64;
    let mut rle_bwt: Vec<u8> = vec![0; bwt_disk_size as usize];
    file.read_exact(&mut rle_bwt[..])?;
    info!("Loaded BWT with {:?} compressed values", bwt_disk_size);
    Ok(rle_bwt)
}
