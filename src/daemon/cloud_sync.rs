//! Cloud-sync stage: forward applied messages to an upstream daemon
//!
//! Buffers are enqueued in arrival order and flushed once per drained
//! batch. A buffer the upstream refuses is dropped and counted.

use super::context::{DaemonContext, DaemonStats};
use crate::transport::{FlushOutcome, Transport};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FORWARD_BATCH_MAX: usize = 256;

pub(crate) fn run_cloud_sync(ctx: Arc<DaemonContext>, mut transport: Box<dyn Transport>) {
    let Some(pipe) = ctx.cloud_pipe.as_ref() else {
        return;
    };

    loop {
        let batch = pipe.pop_batch(FORWARD_BATCH_MAX);
        if batch.is_empty() {
            break;
        }
        for buf in batch {
            if let Err(e) = transport.enqueue(buf) {
                DaemonStats::bump(&ctx.stats.forward_dropped);
                warn!(error = %e, "forward enqueue failed");
            }
        }
        record(&ctx, transport.flush());
    }

    match transport.finalize() {
        Ok(outcome) => {
            record(&ctx, outcome);
            info!("cloud-sync finalized");
        }
        Err(e) => warn!(error = %e, "cloud-sync finalize failed"),
    }
}

fn record(ctx: &DaemonContext, outcome: FlushOutcome) {
    DaemonStats::add(&ctx.stats.forwarded, outcome.delivered as u64);
    DaemonStats::add(&ctx.stats.forward_dropped, outcome.dropped as u64);
    if outcome.delivered + outcome.dropped > 0 {
        debug!(
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "forward flush"
        );
    }
}
