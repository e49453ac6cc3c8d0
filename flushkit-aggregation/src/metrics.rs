//! Unit-of-work metrics emitted by the flush worker

use metrique::{
    timers::Timer,
    unit::{Byte, Count, Millisecond},
    unit_of_work::metrics,
    writer::BoxEntrySink,
};

use crate::{entry::AggregateEntry, store::FlushReason};

/// Emitted once per aggregate handed to a flush sink
#[metrics(rename_all = "PascalCase")]
pub(crate) struct AggregateFlush {
    stream: String,
    reason: &'static str,
    records: u64,
    #[metrics(unit = Byte)]
    estimated_bytes: u64,
    #[metrics(unit = Count)]
    partitions: usize,
    // runs until the entry is appended, i.e. for the duration of the sink call
    #[metrics(unit = Millisecond)]
    flush_time: Timer,
}

impl AggregateFlush {
    pub(crate) fn start<A>(
        reason: FlushReason,
        entry: &AggregateEntry<A>,
        sink: BoxEntrySink,
    ) -> AggregateFlushGuard {
        AggregateFlush {
            stream: entry.key().to_string(),
            reason: reason.as_str(),
            records: entry.record_count_trigger().watermark(),
            estimated_bytes: entry.estimated_bytes_trigger().watermark(),
            partitions: entry.partition_counts().len(),
            flush_time: Timer::start_now(),
        }
        .append_on_drop(sink)
    }
}
