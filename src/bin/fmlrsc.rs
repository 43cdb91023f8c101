
extern crate clap;
extern crate env_logger;
extern crate exitcode;
extern crate log;
extern crate needletail;

use clap::{Arg, App, value_t};
use log::{info, error};
use needletail::parse_fastx_file;
use std::fs::File;

use fmlrsc::alphabet;
use fmlrsc::consensus::NoConsensus;
use fmlrsc::fm_index::ReadSetIndex;
use fmlrsc::post_process::CorrectionPostProcess;
use fmlrsc::read_correct::{CorrectionParams, LongRead, ReadCorrector};
use fmlrsc::work_pool;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn main() {
    //initialize logging for our benefit later
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    //this is the CLI block, params that get populated appear before
    let bwt_fn: String;
    let rbwt_fn: String;
    let long_read_fn: String;
    let out_prefix: String;
    let mut threads: usize = 1;
    let mut kmer_size: usize = 19;
    let mut min_kmer_size: usize = 13;
    let mut max_leaves: usize = 32;
    let mut idmer_length: usize = 9;
    let mut coverage: usize = 90;
    let mut error_rate: f64 = 0.25;
    let mut kmer_threshold: u64 = 3;
    let mut max_seed_interval: usize = 500;

    let matches = App::new("FMLRSC")
        .version(VERSION.unwrap_or("?"))
        .about("FM-index Long Read Self-Corrector - correct noisy long reads from their own FM-index")
        .arg(Arg::with_name("threads")
            .short("t")
            .long("threads")
            .takes_value(true)
            .help("number of correction threads (default: 1)"))
        .arg(Arg::with_name("kmer_size")
            .short("k")
            .long("kmer-size")
            .takes_value(true)
            .help("the seed scan k-mer length (default: 19)"))
        .arg(Arg::with_name("min_kmer_size")
            .short("s")
            .long("min-kmer-size")
            .takes_value(true)
            .help("the minimum k-mer length during walk degradation (default: 13)"))
        .arg(Arg::with_name("max_leaves")
            .short("L")
            .long("max-leaves")
            .takes_value(true)
            .help("maximum number of leaves in the walk frontier (default: 32)"))
        .arg(Arg::with_name("idmer_length")
            .short("i")
            .long("idmer-length")
            .takes_value(true)
            .help("the k-mer length used to identify the target mid-walk (default: 9)"))
        .arg(Arg::with_name("coverage")
            .short("C")
            .long("coverage")
            .takes_value(true)
            .help("expected read coverage used to scale thresholds (default: 90)"))
        .arg(Arg::with_name("error_rate")
            .short("e")
            .long("error-rate")
            .takes_value(true)
            .help("error rate cap for walk paths (default: 0.25)"))
        .arg(Arg::with_name("kmer_threshold")
            .short("x")
            .long("kmer-threshold")
            .takes_value(true)
            .help("minimum k-mer count for walk extensions (default: 3)"))
        .arg(Arg::with_name("max_seed_interval")
            .short("d")
            .long("max-seed-interval")
            .takes_value(true)
            .help("seed pairs farther apart than this are not walked (default: 500)"))
        .arg(Arg::with_name("split")
            .long("split")
            .help("split output at uncorrected regions instead of keeping the raw sequence"))
        .arg(Arg::with_name("batch_mode")
            .long("batch-mode")
            .help("use the data-parallel batch scheduler instead of the buffer-swap pool"))
        .arg(Arg::with_name("COMP_MSBWT.NPY")
            .help("The compressed BWT of the read collection")
            .required(true)
            .index(1))
        .arg(Arg::with_name("COMP_MSRBWT.NPY")
            .help("The compressed BWT of the reversed read collection")
            .required(true)
            .index(2))
        .arg(Arg::with_name("LONG_READS.FA")
            .help("The FASTX file with reads to correct")
            .required(true)
            .index(3))
        .arg(Arg::with_name("OUT_PREFIX")
            .help("Prefix for the <prefix>.correct.fa and <prefix>.discard.fa outputs")
            .required(true)
            .index(4))
        .get_matches();

    //pull out required values
    bwt_fn = matches.value_of("COMP_MSBWT.NPY").unwrap().to_string();
    rbwt_fn = matches.value_of("COMP_MSRBWT.NPY").unwrap().to_string();
    long_read_fn = matches.value_of("LONG_READS.FA").unwrap().to_string();
    out_prefix = matches.value_of("OUT_PREFIX").unwrap().to_string();

    //now check options
    let split_mode = matches.is_present("split");
    let batch_mode = matches.is_present("batch_mode");
    threads = value_t!(matches.value_of("threads"), usize).unwrap_or(threads);
    kmer_size = value_t!(matches.value_of("kmer_size"), usize).unwrap_or(kmer_size);
    min_kmer_size = value_t!(matches.value_of("min_kmer_size"), usize).unwrap_or(min_kmer_size);
    max_leaves = value_t!(matches.value_of("max_leaves"), usize).unwrap_or(max_leaves);
    idmer_length = value_t!(matches.value_of("idmer_length"), usize).unwrap_or(idmer_length);
    coverage = value_t!(matches.value_of("coverage"), usize).unwrap_or(coverage);
    error_rate = value_t!(matches.value_of("error_rate"), f64).unwrap_or(error_rate);
    kmer_threshold = value_t!(matches.value_of("kmer_threshold"), u64).unwrap_or(kmer_threshold);
    max_seed_interval = value_t!(matches.value_of("max_seed_interval"), usize).unwrap_or(max_seed_interval);

    info!("Input parameters (required):");
    info!("\tBWT: \"{}\"", bwt_fn);
    info!("\tReverse BWT: \"{}\"", rbwt_fn);
    for fn_check in [bwt_fn.as_str(), rbwt_fn.as_str(), long_read_fn.as_str()].iter() {
        match File::open(*fn_check) {
            Ok(_) => {},
            Err(e) => {
                error!("Failed to open input file \"{}\": {:?}", fn_check, e);
                std::process::exit(exitcode::NOINPUT);
            }
        };
    }

    info!("\tInput reads: \"{}\"", long_read_fn);
    info!("\tOutput prefix: \"{}\"", out_prefix);
    let corrected_fn = format!("{}.correct.fa", out_prefix);
    let discard_fn = format!("{}.discard.fa", out_prefix);
    let corrected_file: File = match File::create(&corrected_fn) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to create corrected read file: {:?}", e);
            std::process::exit(exitcode::CANTCREAT);
        }
    };
    let discard_file: File = match File::create(&discard_fn) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to create discard read file: {:?}", e);
            std::process::exit(exitcode::CANTCREAT);
        }
    };

    info!("Execution Parameters:");
    info!("\tthreads: {}", threads);
    info!("\tscheduler: {}", if threads <= 1 { "serial" } else if batch_mode { "batch" } else { "buffer-swap" });
    info!("Correction Parameters:");
    info!("\tk-mer sizes: [{}, {}]", min_kmer_size, kmer_size);
    info!("\tcoverage: {}", coverage);
    info!("\tmax leaves: {}", max_leaves);
    info!("\tidmer length: {}", idmer_length);
    info!("\terror rate cap: {}", error_rate);
    info!("\tmax seed interval: {}", max_seed_interval);
    info!("\tsplit mode: {}", split_mode);
    if threads == 0 {
        error!("--threads must be greater than 0");
        std::process::exit(exitcode::DATAERR);
    }
    if !(0.0..=1.0).contains(&error_rate) {
        error!("--error-rate must be within the range [0, 1]");
        std::process::exit(exitcode::DATAERR);
    }
    if min_kmer_size < 2 || min_kmer_size > kmer_size {
        error!("--min-kmer-size must be within the range [2, kmer-size]");
        std::process::exit(exitcode::DATAERR);
    }
    if max_leaves == 0 {
        error!("--max-leaves must be greater than 0");
        std::process::exit(exitcode::DATAERR);
    }

    //load both BWTs into memory
    let index: ReadSetIndex = match ReadSetIndex::load_numpy(&bwt_fn, &rbwt_fn) {
        Ok(index) => index,
        Err(e) => {
            error!("Failed to load BWT files: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    let params = CorrectionParams {
        scan_k: kmer_size,
        min_k: min_kmer_size,
        max_leaves,
        idmer_len: idmer_length,
        coverage,
        error_rate,
        walk_support: kmer_threshold,
        max_seed_interval,
        split: split_mode,
        ..CorrectionParams::default()
    };

    let mut sink = CorrectionPostProcess::new(corrected_file, discard_file);

    //stream the reads; any malformed record or non-ACGT base is fatal here,
    //before the core ever sees it
    let mut fastx_reader = match parse_fastx_file(&long_read_fn) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Failed to open long read file: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    let mut read_index: u64 = 0;
    let generator = std::iter::from_fn(move || {
        match fastx_reader.next() {
            Some(Ok(record)) => {
                let seq = record.seq();
                if !alphabet::is_valid_dna(&seq) {
                    error!("Read {} contains a non-ACGT base", read_index);
                    std::process::exit(exitcode::DATAERR);
                }
                let read = LongRead {
                    read_index,
                    label: String::from_utf8_lossy(record.id()).into_owned(),
                    seq: String::from_utf8_lossy(&seq).into_owned()
                };
                read_index += 1;
                Some(read)
            }
            Some(Err(e)) => {
                error!("Invalid record while parsing long read file: {:?}", e);
                std::process::exit(exitcode::IOERR);
            }
            None => None
        }
    });

    info!("Starting read correction processes...");
    let consumed = if threads <= 1 {
        let corrector = ReadCorrector::new(&index, params, NoConsensus);
        work_pool::process_serial(generator, &corrector, &mut sink)
    } else {
        let correctors: Vec<ReadCorrector<NoConsensus>> = (0..threads)
            .map(|_| ReadCorrector::new(&index, params.clone(), NoConsensus))
            .collect();
        if batch_mode {
            work_pool::process_batch(generator, &correctors, &mut sink)
        } else {
            work_pool::process_swap(generator, &correctors, &mut sink)
        }
    };

    match sink.finish() {
        Ok(()) => {},
        Err(e) => {
            error!("Failed while flushing output streams: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
    info!("Finished processing {} total reads", consumed);
}
