
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fmlrsc::alphabet::{convert_itos, convert_stoi, reverse_complement_i};
use fmlrsc::fm_index::ReadSetIndex;
use fmlrsc::overlap_walk::{OverlapWalker, WalkParams};

/// deterministic pseudo-random DNA
fn synth_seq(mut state: u64, len: usize) -> Vec<u8> {
    let mut ret: Vec<u8> = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let base = ((state >> 33) & 0x3) as u8;
        ret.push(if base == 3 { 5 } else { base + 1 });
    }
    ret
}

fn get_constant_index() -> (Vec<u8>, ReadSetIndex) {
    //both strands of thirty copies of one synthetic template
    let template = synth_seq(7, 200);
    let mut reads: Vec<Vec<u8>> = Vec::new();
    for _ in 0..15 {
        reads.push(template.clone());
        reads.push(reverse_complement_i(&template));
    }
    (template.clone(), ReadSetIndex::from_collection(&reads))
}

pub fn bench_alphabet(c: &mut Criterion) {
    let template = synth_seq(7, 200);
    let ascii = convert_itos(&template);

    c.bench_function("convert_stoi", |b| b.iter(|| {
        black_box(convert_stoi(&ascii));
    }));

    c.bench_function("reverse_complement_i", |b| b.iter(|| {
        black_box(reverse_complement_i(&template));
    }));
}

pub fn bench_interval_queries(c: &mut Criterion) {
    let (template, index) = get_constant_index();
    let present = &template[50..80];
    let mut absent = present.to_vec();
    absent[15] = if absent[15] == 1 { 2 } else { 1 };

    c.bench_function("count_occurrences", |b| b.iter(|| {
        black_box(index.count_occurrences(present));
    }));

    c.bench_function("absent_count_occurrences", |b| b.iter(|| {
        black_box(index.count_occurrences(&absent));
    }));

    let base = index.find_interval(&present[..19]);
    c.bench_function("extend_right", |b| b.iter(|| {
        black_box(index.extend_right(&base, present[19]));
    }));
}

pub fn bench_overlap_walk(c: &mut Criterion) {
    let (template, index) = get_constant_index();
    let params = WalkParams { coverage: 60, ..WalkParams::default() };
    let walker = OverlapWalker::new(&index, params);

    let source = &template[20..50];
    let between = &template[50..90];
    let target = &template[90..120];
    c.bench_function("overlap_walk", |b| b.iter(|| {
        black_box(walker.walk(source, between, target, 15));
    }));
}

criterion_group!(benches, bench_alphabet, bench_interval_queries, bench_overlap_walk);
criterion_main!(benches);
