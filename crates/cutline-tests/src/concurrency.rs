//! Concurrency tests: index readers racing the background indexing pass,
//! and conform deduplication under parallel requests.

use cutline_core::{
    AudioParams, ChannelLayout, RationalTime, SampleFormat, StreamId, TimeRange, Timebase,
};
use cutline_index::{FrameIndex, IndexQuery, END_TIMESTAMP};
use cutline_render::{ConformCoordinator, ConformDispatcher, ConformKey, ConformWaitInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn readers_see_monotonic_index_growth() {
    let index = Arc::new(FrameIndex::new(Timebase::new(1, 1000), 0));

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 0..500 {
                index.append(i * 10);
                if i % 50 == 0 {
                    thread::sleep(Duration::from_micros(100));
                }
            }
            index.append_end_marker();
        })
    };

    // Readers poll a query past the data until indexing finishes. They must
    // only ever see "not indexed yet" or a final answer, never "no data"
    // after the first entry lands and never an out-of-range error.
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || loop {
                match index.closest_timestamp(100_000) {
                    IndexQuery::Found(ts) => {
                        assert_eq!(ts, END_TIMESTAMP);
                        break;
                    }
                    IndexQuery::NotIndexedYet | IndexQuery::NoData => {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(index.is_complete());
    assert_eq!(index.len(), 501);
}

#[test]
fn mid_index_queries_answer_from_indexed_prefix() {
    let index = Arc::new(FrameIndex::new(Timebase::new(1, 1000), 0));

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 0..200 {
                index.append(i * 10);
            }
            index.append_end_marker();
        })
    };

    // A query inside the eventually-indexed region either answers correctly
    // or reports in-progress, depending on how far the writer has come.
    let index_reader = Arc::clone(&index);
    let reader = thread::spawn(move || {
        for _ in 0..1000 {
            match index_reader.closest_timestamp(995) {
                IndexQuery::Found(ts) => assert_eq!(ts, 990),
                IndexQuery::NotIndexedYet | IndexQuery::NoData => {}
            }
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();

    assert_eq!(index.closest_timestamp(995), IndexQuery::Found(990));
}

struct SlowDispatcher {
    dispatched: AtomicUsize,
}

impl ConformDispatcher for SlowDispatcher {
    fn dispatch(&self, _key: &ConformKey) -> cutline_core::Result<()> {
        // Widen the race window between state transition and completion
        thread::sleep(Duration::from_millis(2));
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn parallel_conform_requests_share_one_job() {
    let coordinator = Arc::new(ConformCoordinator::new());
    let dispatcher = Arc::new(SlowDispatcher {
        dispatched: AtomicUsize::new(0),
    });
    let stream = StreamId::new();
    let params = AudioParams::new(48000, ChannelLayout::Stereo, SampleFormat::F32);

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let waiter = ConformWaitInfo {
                    stream,
                    params,
                    affected_range: TimeRange::new(
                        RationalTime::new(i, 1),
                        RationalTime::new(1, 1),
                    ),
                    stream_time: RationalTime::new(i, 1),
                };
                coordinator
                    .request_conform(waiter, dispatcher.as_ref())
                    .unwrap();
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 1);

    let key = ConformKey { stream, params };
    let released = coordinator.on_conform_complete(&key);
    assert_eq!(released.len(), 16);

    // A single completion satisfied everyone; nothing is left waiting
    assert_eq!(coordinator.waiter_count(&key), 0);
}
