//! The receive loop run on the capture thread.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, Wake, CHANNEL_CAPACITY};
use crate::message::DebugMessage;
use crate::session::CaptureStats;
use crate::sink::LogSink;

/// Drain the channel into `sink` until stop is signalled.
///
/// Returns the sink unflushed so the session can close it after the channel
/// has been released.
pub(crate) fn run_capture_loop(channel: Arc<dyn Channel>, mut sink: LogSink) -> (LogSink, CaptureStats) {
    let mut stats = CaptureStats::default();
    let mut snapshot = [0u8; CHANNEL_CAPACITY];

    debug!(log = %sink.path().display(), "capture loop started");

    loop {
        // A failed arm is not fatal: stop still wakes the wait below.
        if let Err(e) = channel.signal_buffer_ready() {
            warn!(error = %e, "failed to signal buffer-ready");
        }

        match channel.wait() {
            Ok(Wake::Data) => {
                channel.read_snapshot(&mut snapshot);
                record(&snapshot, &mut sink, &mut stats);
            }
            Ok(Wake::Stop) => {
                debug!("capture loop observed stop");
                break;
            }
            Err(e) => {
                // Retrying a broken wait would spin, so give up on capture.
                // The session can still be stopped and its log closed.
                error!(error = %e, "waiting on the debug channel failed, capture halted");
                break;
            }
        }
    }

    debug!(
        messages = stats.messages,
        anomalies = stats.decode_anomalies,
        "capture loop exited"
    );
    (sink, stats)
}

fn record(snapshot: &[u8], sink: &mut LogSink, stats: &mut CaptureStats) {
    let message = match DebugMessage::decode(snapshot) {
        Ok(message) => message,
        Err(anomaly) => {
            warn!(%anomaly, "undecodable debug message");
            stats.decode_anomalies += 1;
            DebugMessage::new(0, "<undecodable debug message>")
        }
    };

    if let Err(anomaly) = message.check_text() {
        warn!(pid = message.pid, %anomaly, "debug message logged with replacement characters");
        stats.decode_anomalies += 1;
    }

    trace!(target: "dbwin::capture", pid = message.pid, text = %message.text_lossy());

    match sink.write_message(&message) {
        Ok(()) => stats.messages += 1,
        Err(e) => {
            warn!(pid = message.pid, error = %e, "failed to write debug message to log");
            stats.write_failures += 1;
        }
    }
}
