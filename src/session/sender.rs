//! Background task that writes queued commands in order.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::encode_frame;
use crate::session::{Shared, disconnected};
use crate::transport::LineWriter;

/// A command waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandRequest {
    pub sequence_id: u16,
    pub payload: String,
    /// Hold back later commands until this one's response arrives.
    pub wait: bool,
}

/// Items on the outbound queue.
#[derive(Debug)]
pub(crate) enum Outbound {
    Command(CommandRequest),
    Shutdown,
}

/// Writes commands until shutdown, disconnect or a write failure.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut writer: LineWriter,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut state = shared.watch_state();
    let timeout = shared.config.timeout;

    loop {
        let outbound = tokio::select! {
            biased;
            () = disconnected(&mut state) => break,
            outbound = queue.recv() => outbound,
        };

        let request = match outbound {
            Some(Outbound::Command(request)) => request,
            Some(Outbound::Shutdown) | None => break,
        };

        let frame = encode_frame(request.sequence_id, &request.payload);
        if let Err(e) = writer.write_frame(&frame).await {
            tracing::error!("write of #{} failed: {}", request.sequence_id, e);
            shared.degrade();
            break;
        }
        tracing::debug!("-> #{} {}", request.sequence_id, request.payload);

        if request.wait {
            let arrived = tokio::select! {
                () = disconnected(&mut state) => break,
                arrived = shared.correlations.wait_arrived(request.sequence_id, timeout) => arrived,
            };
            if !arrived {
                tracing::debug!("#{} unanswered after {:?}", request.sequence_id, timeout);
            }
        }
    }

    writer.shutdown().await;
    tracing::debug!("sender stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncBufReadExt;

    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{ConnectionState, SessionHandle};

    #[tokio::test]
    async fn test_frames_written_in_enqueue_order() {
        let session = SessionHandle::new(SessionConfig::default());
        let queue = session.begin();

        let (host, device) = tokio::io::duplex(1024);
        let (_read, write) = tokio::io::split(host);
        let task = tokio::spawn(run(
            session.shared(),
            LineWriter::new(Box::new(write)),
            queue,
        ));

        session.send_only("G0 X1").unwrap();
        session.send_only("G0 X2").unwrap();
        session.send_only("G0 X3").unwrap();

        let mut lines = tokio::io::BufReader::new(device).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "#1 G0 X1");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "#2 G0 X2");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "#3 G0 X3");

        session.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_degrades_session() {
        let session = SessionHandle::new(SessionConfig::default());
        let queue = session.begin();

        let (host, device) = tokio::io::duplex(64);
        drop(device);
        let (_read, write) = tokio::io::split(host);
        let task = tokio::spawn(run(
            session.shared(),
            LineWriter::new(Box::new(write)),
            queue,
        ));

        session.send_only("P2203").unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
