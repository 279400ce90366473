//! Conduits between the source and the orchestrator
//!
//! - header: oneshot, dropped unsent when no header could be read
//! - rows: capacity 1, so the source stays in lockstep with the consumer
//! - errors: small buffer so a burst of bad lines does not stall parsing

use tokio::sync::{mpsc, oneshot};

use crate::document::{Header, SourceRow};
use crate::source::SourceError;

pub const ROW_CHANNEL_CAPACITY: usize = 1;
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Sending ends, owned by the source for its whole run
pub struct SourceChannels {
    pub header: oneshot::Sender<Header>,
    pub rows: mpsc::Sender<SourceRow>,
    pub errors: mpsc::Sender<SourceError>,
}

/// Receiving ends, owned by the orchestrator
pub struct PipelineReceivers {
    pub header: oneshot::Receiver<Header>,
    pub rows: mpsc::Receiver<SourceRow>,
    pub errors: mpsc::Receiver<SourceError>,
}

pub fn pipeline_channels() -> (SourceChannels, PipelineReceivers) {
    let (header_tx, header_rx) = oneshot::channel();
    let (row_tx, row_rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

    (
        SourceChannels {
            header: header_tx,
            rows: row_tx,
            errors: error_tx,
        },
        PipelineReceivers {
            header: header_rx,
            rows: row_rx,
            errors: error_rx,
        },
    )
}
