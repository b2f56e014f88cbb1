use crate::sample::SampleKind;
use crate::snapshot::SamplesSnapshot;
use crate::thread::ThreadId;
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::io;

/// Renders a snapshot in the Chrome trace-event JSON format
/// (`chrome://tracing`, Perfetto).
///
/// A span whose exit sample immediately follows its matching enter sample on
/// the same thread becomes one complete `"X"` event with a duration;
/// interleaved or unpaired samples become `"B"`/`"E"` events. Each named
/// thread gets a `"M"` (metadata) `thread_name` event.
pub struct ChromeTraceEventWriter<W> {
    out: W,
}

#[derive(Serialize)]
struct TraceDocument<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TraceEvent<'a>>,
}

#[derive(Serialize)]
struct TraceEvent<'a> {
    ph: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cat: Option<&'a str>,
    name: &'a str,
    pid: u32,
    tid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<ThreadNameArgs<'a>>,
}

#[derive(Serialize)]
struct ThreadNameArgs<'a> {
    name: &'a str,
}

impl<W: io::Write> ChromeTraceEventWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_snapshot(&mut self, snapshot: &SamplesSnapshot) -> io::Result<()> {
        let pid = std::process::id();
        let mut events: Vec<TraceEvent<'_>> = Vec::with_capacity(snapshot.len());

        // Index of the next sample from the same thread, for each sample.
        let count = snapshot.len();
        let mut next_same_thread: Vec<Option<usize>> = vec![None; count];
        let mut later_index_by_thread: HashMap<ThreadId, usize> = HashMap::new();
        for index in (0..count).rev() {
            let thread_id = snapshot.at(index).thread_id();
            next_same_thread[index] = later_index_by_thread.insert(thread_id, index);
        }

        let mut exit_consumed = vec![false; count];
        for index in 0..count {
            let sample = snapshot.at(index);
            let ts_nanoseconds = sample.time_point().nanoseconds_since_reference();
            match sample.kind() {
                SampleKind::Enter => {
                    if let Some(exit_index) = next_same_thread[index] {
                        let exit = snapshot.at(exit_index);
                        if exit.site().is_matching_exit_for(sample.site()) {
                            exit_consumed[exit_index] = true;
                            let duration_nanoseconds = exit
                                .time_point()
                                .nanoseconds_since_reference()
                                .saturating_sub(ts_nanoseconds);
                            events.push(TraceEvent {
                                ph: "X",
                                cat: Some(sample.category()),
                                name: sample.name(),
                                pid,
                                tid: sample.thread_id().as_u64(),
                                ts: Some(raw_microseconds(ts_nanoseconds)?),
                                dur: Some(raw_microseconds(duration_nanoseconds)?),
                                args: None,
                            });
                            continue;
                        }
                    }
                    events.push(TraceEvent {
                        ph: "B",
                        cat: Some(sample.category()),
                        name: sample.name(),
                        pid,
                        tid: sample.thread_id().as_u64(),
                        ts: Some(raw_microseconds(ts_nanoseconds)?),
                        dur: None,
                        args: None,
                    });
                }
                SampleKind::Exit => {
                    if exit_consumed[index] {
                        continue;
                    }
                    events.push(TraceEvent {
                        ph: "E",
                        cat: Some(sample.category()),
                        name: sample.name(),
                        pid,
                        tid: sample.thread_id().as_u64(),
                        ts: Some(raw_microseconds(ts_nanoseconds)?),
                        dur: None,
                        args: None,
                    });
                }
            }
        }

        let mut named_threads: Vec<ThreadId> = snapshot.named_thread_ids().collect();
        named_threads.sort_unstable();
        for thread_id in named_threads {
            if let Some(thread_name) = snapshot.thread_name(thread_id) {
                events.push(TraceEvent {
                    ph: "M",
                    cat: None,
                    name: "thread_name",
                    pid,
                    tid: thread_id.as_u64(),
                    ts: None,
                    dur: None,
                    args: Some(ThreadNameArgs { name: thread_name }),
                });
            }
        }

        serde_json::to_writer(
            &mut self.out,
            &TraceDocument {
                trace_events: events,
            },
        )?;
        self.out.flush()
    }

    /// Unwraps the writer, e.g. to recover an owned buffer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Formats nanoseconds as a decimal number of microseconds with up to three
/// fractional digits, emitted as a raw JSON number token.
///
/// Writing the digits ourselves (instead of going through `f64`) keeps
/// nanosecond resolution for arbitrarily large timestamps and guarantees no
/// leading zeros, thousands separators, or locale dependence.
fn raw_microseconds(nanoseconds: u64) -> io::Result<Box<RawValue>> {
    let text = microseconds_decimal(nanoseconds);
    RawValue::from_string(text).map_err(io::Error::from)
}

fn microseconds_decimal(nanoseconds: u64) -> String {
    let whole_microseconds = nanoseconds / 1000;
    let fractional_nanoseconds = nanoseconds % 1000;
    if fractional_nanoseconds == 0 {
        return whole_microseconds.to_string();
    }
    let mut text = format!("{whole_microseconds}.{fractional_nanoseconds:03}");
    while text.ends_with('0') {
        text.pop();
    }
    text
}
