//! Per-account usage aggregation.
//!
//! Turns one destructive traffic read into the batch the panel expects.
//! Idle samples are dropped, and so are principals whose login key is not
//! an account id (the reserved operator principal among them).

use tracing::trace;

use crate::protocol::UsageBatch;
use crate::provision::TrafficSample;

/// Build a usage batch from raw samples.
///
/// Samples that share an account id are summed.
pub fn collect<'a, I>(samples: I) -> UsageBatch
where
    I: IntoIterator<Item = &'a TrafficSample>,
{
    let mut batch = UsageBatch::new();
    for sample in samples {
        if sample.up == 0 && sample.down == 0 {
            continue;
        }
        let Ok(id) = sample.key.parse::<u64>() else {
            trace!(key = %sample.key, "skipping traffic for non-account principal");
            continue;
        };
        batch.add(id, sample.up, sample.down);
    }
    batch
}
