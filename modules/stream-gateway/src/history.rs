//! Bounded replay of past summaries for the REST surface

use event_bus::{BusResult, Subscriber, SummaryRecord};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_MAX_POLLS: u32 = 20;

/// Once something was collected, an empty poll after this many attempts ends the read
const SETTLE_AFTER_POLLS: u32 = 5;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Read up to `limit` summaries, polling at most `max_polls` times
///
/// Each record is tagged with `_offset` and `_partition`. Undecodable
/// records are skipped. A broker error before the subscriber ever connected
/// is returned; later per-message errors only use up a poll.
pub async fn fetch_summaries(
    subscriber: &mut Subscriber,
    limit: usize,
    max_polls: u32,
    poll_timeout: Duration,
) -> BusResult<Vec<SummaryRecord>> {
    let mut summaries = Vec::new();
    let mut polls = 0;

    while summaries.len() < limit && polls < max_polls {
        let polled = subscriber.poll(poll_timeout).await;
        polls += 1;

        let msg = match polled {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                if !summaries.is_empty() && polls > SETTLE_AFTER_POLLS {
                    break;
                }
                continue;
            }
            Err(e) if !subscriber.is_connected() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Consumer error");
                continue;
            }
        };

        if let Some(mut record) = subscriber.decode(&msg).await {
            record.insert("_offset", Value::from(msg.offset));
            record.insert("_partition", Value::from(msg.partition));
            summaries.push(record);
            tracing::debug!(count = summaries.len(), offset = msg.offset, "Got summary");
        }
    }

    Ok(summaries)
}
