
extern crate log;

use crossbeam_channel::bounded;
use log::info;
use rayon::prelude::*;

/// per-worker batch capacity in the swap model
pub const BUFFER_SIZE: usize = 500;
/// the batch model accumulates this many items per worker before dispatch
const BATCH_FACTOR: usize = 64;
/// dynamic chunk size handed to each task in the batch model
const BATCH_CHUNK: usize = 8;
/// serial progress cadence
const SERIAL_LOG_INTERVAL: usize = 50_000;

/// One worker's computation. Implementations are shared read-only across the
/// pool, so `process` borrows its input and `&self`.
pub trait Processor<I, O>: Sync {
    fn process(&self, input: &I) -> O;
}

/// The single-threaded aggregation stage. Receives every (input, output) pair
/// exactly once, on the dispatcher thread.
pub trait PostProcessor<I, O> {
    fn process(&mut self, input: I, output: O);
}

/// Runs every generated item through one processor on the calling thread.
/// Returns the number of items consumed.
pub fn process_serial<I, O, G, P, S>(generator: G, processor: &P, post: &mut S) -> usize
where
    G: Iterator<Item = I>,
    P: Processor<I, O>,
    S: PostProcessor<I, O>
{
    let mut consumed: usize = 0;
    for item in generator {
        let output = processor.process(&item);
        post.process(item, output);
        consumed += 1;
        if consumed % SERIAL_LOG_INTERVAL == 0 {
            info!("Processed {} sequences", consumed);
        }
    }
    info!("Processed {} sequences total", consumed);
    consumed
}

/// The buffer-swap pool: one worker thread per processor, each with an input
/// and an output batch of at most `BUFFER_SIZE` items. The dispatcher fills
/// the input batches round-robin; when all are full (or input is exhausted)
/// it waits for each worker in order, swaps batches, and drains the finished
/// outputs through the post-processor. Workers never block on each other and
/// per-worker FIFO order is preserved.
pub fn process_swap<I, O, G, P, S>(mut generator: G, processors: &[P], post: &mut S) -> usize
where
    I: Send,
    O: Send,
    G: Iterator<Item = I>,
    P: Processor<I, O>,
    S: PostProcessor<I, O>
{
    let num_threads = processors.len();
    assert!(num_threads > 0, "swap pool needs at least one processor");

    let mut consumed: usize = 0;
    let mut written: usize = 0;

    std::thread::scope(|scope| {
        let mut to_worker = Vec::with_capacity(num_threads);
        let mut from_worker = Vec::with_capacity(num_threads);
        for processor in processors.iter() {
            let (tx_in, rx_in) = bounded::<Vec<I>>(1);
            let (tx_out, rx_out) = bounded::<(Vec<I>, Vec<O>)>(1);
            to_worker.push(tx_in);
            from_worker.push(rx_out);
            scope.spawn(move || {
                //each received batch is processed in order and handed back
                //whole; sending the result is the readiness signal
                while let Ok(batch) = rx_in.recv() {
                    let outputs: Vec<O> = batch.iter().map(|item| processor.process(item)).collect();
                    if tx_out.send((batch, outputs)).is_err() {
                        break;
                    }
                }
            });
        }

        let mut input_buffers: Vec<Vec<I>> = (0..num_threads)
            .map(|_| Vec::with_capacity(BUFFER_SIZE))
            .collect();
        let mut in_flight: Vec<bool> = vec![false; num_threads];
        let mut next_thread: usize = 0;
        let mut done = false;

        while !done {
            match generator.next() {
                Some(item) => {
                    input_buffers[next_thread].push(item);
                    consumed += 1;
                    next_thread = (next_thread + 1) % num_threads;
                }
                None => {
                    done = true;
                }
            }

            //under strict round-robin every buffer reaches capacity together,
            //so checking the last one suffices
            let buffers_full = input_buffers[num_threads - 1].len() == BUFFER_SIZE;
            if buffers_full || done {
                let mut num_loops = 0;
                loop {
                    let mut drained: Vec<(Vec<I>, Vec<O>)> = Vec::with_capacity(num_threads);
                    for i in 0..num_threads {
                        if in_flight[i] {
                            let result = from_worker[i].recv().expect("worker terminated unexpectedly");
                            in_flight[i] = false;
                            drained.push(result);
                        }
                        if !input_buffers[i].is_empty() {
                            let batch = std::mem::replace(&mut input_buffers[i], Vec::with_capacity(BUFFER_SIZE));
                            to_worker[i].send(batch).expect("worker terminated unexpectedly");
                            in_flight[i] = true;
                        }
                    }
                    next_thread = 0;

                    for (inputs, outputs) in drained {
                        assert_eq!(inputs.len(), outputs.len(), "post-swap buffer length mismatch");
                        for (item, output) in inputs.into_iter().zip(outputs.into_iter()) {
                            post.process(item, output);
                            written += 1;
                        }
                    }

                    if consumed % (10 * BUFFER_SIZE * num_threads) == 0 && consumed > 0 {
                        info!("Processed {} sequences", consumed);
                    }

                    if !(done && written < consumed) {
                        break;
                    }
                    assert!(num_loops < 2, "dispatcher looped more than twice draining in-flight work");
                    num_loops += 1;
                }
            }
        }

        drop(to_worker);
    });

    assert_eq!(written, consumed, "work items were lost in the pool");
    info!("Processed {} sequences total", consumed);
    consumed
}

/// The parallel-for-batch pool: accumulates `64 * N` items, processes them in
/// a data-parallel loop with dynamic chunks of 8 (workers keyed by the rayon
/// thread index), then post-processes serially in input order.
pub fn process_batch<I, O, G, P, S>(mut generator: G, processors: &[P], post: &mut S) -> usize
where
    I: Send + Sync,
    O: Send,
    G: Iterator<Item = I>,
    P: Processor<I, O>,
    S: PostProcessor<I, O>
{
    let num_threads = processors.len();
    assert!(num_threads > 0, "batch pool needs at least one processor");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .expect("failed to build the batch thread pool");

    let mut consumed: usize = 0;
    let mut input_buffer: Vec<I> = Vec::with_capacity(num_threads * BATCH_FACTOR);
    let mut done = false;

    while !done {
        match generator.next() {
            Some(item) => {
                input_buffer.push(item);
                consumed += 1;
            }
            None => {
                done = true;
            }
        }

        if input_buffer.len() == num_threads * BATCH_FACTOR || done {
            let inputs = std::mem::take(&mut input_buffer);
            let outputs: Vec<O> = pool.install(|| {
                inputs
                    .par_iter()
                    .with_min_len(BATCH_CHUNK)
                    .with_max_len(BATCH_CHUNK)
                    .map(|item| {
                        let tid = rayon::current_thread_index().unwrap_or(0);
                        processors[tid % num_threads].process(item)
                    })
                    .collect()
            });
            for (item, output) in inputs.into_iter().zip(outputs.into_iter()) {
                post.process(item, output);
            }
            if consumed % (num_threads * BATCH_FACTOR * 10) == 0 && consumed > 0 {
                info!("Processed {} sequences", consumed);
            }
        }
    }

    info!("Processed {} sequences total", consumed);
    consumed
}
