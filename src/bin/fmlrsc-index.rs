
extern crate clap;
extern crate env_logger;
extern crate exitcode;
extern crate log;
extern crate needletail;

use clap::{Arg, App};
use log::{info, error};
use needletail::parse_fastx_file;

use fmlrsc::alphabet;
use fmlrsc::msbwt;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new("FMLRSC index builder")
        .version(VERSION.unwrap_or("?"))
        .about("Builds the forward and reversed multi-string BWT pair for fmlrsc")
        .arg(Arg::with_name("READS.FA")
            .help("The FASTX file with the read collection")
            .required(true)
            .index(1))
        .arg(Arg::with_name("OUT_PREFIX")
            .help("Prefix for the <prefix>.bwt.npy and <prefix>.rbwt.npy outputs")
            .required(true)
            .index(2))
        .get_matches();

    let reads_fn = matches.value_of("READS.FA").unwrap().to_string();
    let out_prefix = matches.value_of("OUT_PREFIX").unwrap().to_string();

    info!("Input reads: \"{}\"", reads_fn);
    let mut fastx_reader = match parse_fastx_file(&reads_fn) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Failed to open read file: {:?}", e);
            std::process::exit(exitcode::NOINPUT);
        }
    };

    //this builder holds the whole collection in memory; it is intended for
    //read sets that fit comfortably, not reference-scale data
    let mut reads: Vec<Vec<u8>> = Vec::new();
    let mut total_bases: usize = 0;
    while let Some(raw_record) = fastx_reader.next() {
        let record = match raw_record {
            Ok(record) => record,
            Err(e) => {
                error!("Invalid record while parsing read file: {:?}", e);
                std::process::exit(exitcode::DATAERR);
            }
        };
        let seq = record.seq();
        let converted = alphabet::convert_stoi(&String::from_utf8_lossy(&seq));
        total_bases += converted.len();
        reads.push(converted);
    }
    info!("Read {} sequences, {} bases", reads.len(), total_bases);

    info!("Building forward BWT...");
    let fwd_rle = msbwt::build_rle_bwt(&reads);
    let bwt_fn = format!("{}.bwt.npy", out_prefix);
    match msbwt::save_bwt_numpy(&fwd_rle, &bwt_fn) {
        Ok(()) => info!("Wrote \"{}\" ({} compressed values)", bwt_fn, fwd_rle.len()),
        Err(e) => {
            error!("Failed to write BWT file: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    info!("Building reversed BWT...");
    for read in reads.iter_mut() {
        read.reverse();
    }
    let rev_rle = msbwt::build_rle_bwt(&reads);
    let rbwt_fn = format!("{}.rbwt.npy", out_prefix);
    match msbwt::save_bwt_numpy(&rev_rle, &rbwt_fn) {
        Ok(()) => info!("Wrote \"{}\" ({} compressed values)", rbwt_fn, rev_rle.len()),
        Err(e) => {
            error!("Failed to write reversed BWT file: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };
}
