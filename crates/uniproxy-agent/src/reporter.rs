//! Traffic reporter.
//!
//! Reads per-principal counters from the proxy (the read resets them),
//! reshapes them into a usage batch and pushes it to the panel. A failed
//! push is logged and the batch is dropped: counters are never re-queued.

use std::sync::Arc;

use tracing::{debug, info};
use uniproxy_metrics::{record_error, record_traffic_push, record_traffic_reported};

use crate::client::UsageSink;
use crate::collector;
use crate::error::AgentError;
use crate::provision::{ProvisionSession, ProvisioningPort};

/// Pushes per-account usage to the panel.
pub struct TrafficReporter {
    port: Arc<dyn ProvisioningPort>,
    sink: Arc<dyn UsageSink>,
}

impl TrafficReporter {
    pub fn new(port: Arc<dyn ProvisioningPort>, sink: Arc<dyn UsageSink>) -> Self {
        Self { port, sink }
    }

    /// Run one report.
    ///
    /// Returns the number of accounts pushed; `0` means nothing was sent.
    pub async fn report(&self) -> Result<usize, AgentError> {
        let snapshot = {
            let session = ProvisionSession::open(self.port.clone()).await?;
            session.read_traffic(true).await?
        };

        let batch = collector::collect(&snapshot.principals);
        if batch.is_empty() {
            debug!(samples = snapshot.principals.len(), "no traffic to report");
            return Ok(0);
        }

        if let Err(e) = self.sink.push_usage(&batch).await {
            record_traffic_push("failed");
            record_error(e.kind());
            return Err(e);
        }

        let (up, down) = batch.totals();
        record_traffic_push("ok");
        record_traffic_reported(up, down);
        info!(accounts = batch.len(), up, down, "traffic reported");
        Ok(batch.len())
    }
}

// Cannot derive Debug due to dyn collaborators
impl std::fmt::Debug for TrafficReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficReporter").finish_non_exhaustive()
    }
}
