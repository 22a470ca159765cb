use crate::data::Sample;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Bits per second for `bytes` transferred over `span_ns`.
///
/// A span of zero (or less) carries no usable timing and yields 0.
pub fn bits_per_second(bytes: i64, span_ns: i64) -> f64 {
    if span_ns <= 0 {
        return 0.0;
    }
    (8.0 * bytes as f64) / (span_ns as f64 / NANOS_PER_SEC)
}

/// Average throughput of one worker inside `[window_start_ns, window_end_ns]`.
///
/// Bounds are relative to the worker's own start. Bytes of every sample in
/// the window are summed; the divisor is the span between the first and the
/// last included sample, not the requested bounds.
///
/// # Examples
///
/// ```
/// use bwmeter_measure::core::average_throughput;
/// use bwmeter_measure::Sample;
///
/// let samples = [
///     Sample::from_millis(0, 1000),
///     Sample::from_millis(500, 1000),
///     Sample::from_millis(1000, 1000),
/// ];
/// assert_eq!(average_throughput(&samples, 0, 1_000_000_000), 24_000.0);
/// ```
pub fn average_throughput(samples: &[Sample], window_start_ns: i64, window_end_ns: i64) -> f64 {
    let mut first: Option<usize> = None;
    let mut last: Option<usize> = None;
    let mut bytes = 0i64;

    for (i, sample) in samples.iter().enumerate() {
        if sample.elapsed_ns < window_start_ns {
            continue;
        }

        first.get_or_insert(i);

        if sample.elapsed_ns > window_end_ns {
            break;
        }

        last = Some(i);
        bytes += sample.bytes;
    }

    match (first, last) {
        (Some(first), Some(last)) => bits_per_second(bytes, samples[last].elapsed_ns - samples[first].elapsed_ns),
        _ => 0.0,
    }
}

/// Split a worker's samples into consecutive slots of nominal `slot_length_ms`.
///
/// A slot closes when a sample lands past the current boundary. The closed
/// slot is divided by the span up to the previous sample, and the next slot's
/// span starts at that previous sample as well. The boundary then moves one
/// slot length further, or straight to the new sample if it is already past
/// that too, so slots stretch across gaps instead of producing empty ones.
/// Whatever remains after the last boundary is flushed as a final, possibly
/// short, slot.
pub fn time_slices(samples: &[Sample], slot_length_ms: u64) -> Vec<f64> {
    let mut slots = Vec::new();
    if samples.is_empty() {
        return slots;
    }

    let slot_length_ns = i64::try_from(slot_length_ms)
        .unwrap_or(i64::MAX / NANOS_PER_MILLI)
        .saturating_mul(NANOS_PER_MILLI);
    let mut boundary = slot_length_ns;
    let mut slot_start = 0usize;
    let mut bytes = 0i64;

    for (i, sample) in samples.iter().enumerate() {
        if i != 0 && sample.elapsed_ns > boundary {
            let span = samples[i - 1].elapsed_ns - samples[slot_start].elapsed_ns;
            slots.push(bits_per_second(bytes, span));

            bytes = sample.bytes;
            boundary = boundary.saturating_add(slot_length_ns);
            if sample.elapsed_ns > boundary {
                boundary = sample.elapsed_ns;
            }
            slot_start = i - 1;
        } else {
            bytes += sample.bytes;
        }
    }

    let span = samples[samples.len() - 1].elapsed_ns - samples[slot_start].elapsed_ns;
    slots.push(bits_per_second(bytes, span));

    slots
}

/// Total bytes a worker received, used for traffic accounting.
pub fn total_bytes(samples: &[Sample]) -> u64 { samples.iter().map(|s| s.bytes.max(0) as u64).sum() }
