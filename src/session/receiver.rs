//! Background task that reads device lines and routes them.

use std::sync::Arc;
use std::time::Duration;

use crate::event::Event;
use crate::protocol::{Inbound, parse_line};
use crate::session::{ConnectionState, Shared, disconnected};
use crate::transport::LineReader;

/// Bound on a single read so the loop notices shutdown promptly.
pub(crate) const READ_SLICE: Duration = Duration::from_millis(100);

/// Reads lines until the session disconnects or the link fails.
pub(crate) async fn run(shared: Arc<Shared>, mut reader: LineReader) {
    let mut state = shared.watch_state();

    loop {
        if *state.borrow() == ConnectionState::Disconnected {
            break;
        }

        let result = tokio::select! {
            biased;
            () = disconnected(&mut state) => break,
            result = reader.read_line(READ_SLICE) => result,
        };

        match result {
            Ok(Some(line)) => route(&shared, &line),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("read failed: {}", e);
                shared.degrade();
                break;
            }
        }
    }

    shared.close_reports();
    tracing::debug!("receiver stopped");
}

fn route(shared: &Shared, line: &str) {
    tracing::trace!("<- {}", line);

    match parse_line(line) {
        Ok(Inbound::Response(response)) => {
            tracing::debug!("response for #{}: {:?}", response.sequence_id, response.fields);
            shared
                .correlations
                .insert(response.sequence_id, response.fields);
        }
        Ok(Inbound::Ready) => {
            if shared.set_device_ready() {
                tracing::info!("device ready");
                shared.dispatcher.dispatch(Event::Ready);
            }
        }
        Ok(Inbound::Position(position)) => {
            shared.positions.push(position);
            shared.dispatcher.dispatch(Event::Position(position));
        }
        Ok(Inbound::Button(report)) => {
            shared.button_queue(report.button).push(report);
            shared.dispatcher.dispatch(Event::Button(report));
        }
        Ok(Inbound::Unknown(line)) => {
            tracing::debug!("ignoring line: {}", line);
        }
        Err(e) => {
            tracing::debug!("dropping malformed line {:?}: {}", line, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocol::Button;
    use crate::session::SessionHandle;
    use crate::types::Position;

    #[test]
    fn test_route_classifies_lines() {
        let session = SessionHandle::new(SessionConfig::default());
        let _queue = session.begin();
        let shared = session.shared();

        route(&shared, "$3 OK V1");
        route(&shared, "@1");
        route(&shared, "^ X1.0 Y2.0 Z3.0 R4.0");
        route(&shared, "@4 B1 V2");
        route(&shared, "echo: hello");
        route(&shared, "$ nonsense");

        assert_eq!(
            shared.correlations.take(3),
            Some(vec!["OK".to_string(), "V1".to_string()])
        );
        assert!(session.device_ready());
        assert_eq!(
            shared.positions.try_pop(),
            Some(Position::new(1.0, 2.0, 3.0).with_r(4.0))
        );
        let report = shared.button_queue(Button::Play).try_pop().unwrap();
        assert_eq!(report.state, 2);
        assert!(shared.button_queue(Button::Menu).is_empty());
        assert_eq!(shared.correlations.len(), 1);
    }

    #[tokio::test]
    async fn test_ready_is_dispatched_once() {
        let session = SessionHandle::new(SessionConfig::default());
        let _queue = session.begin();
        let shared = session.shared();
        let mut events = session.subscribe();

        route(&shared, "@1");
        route(&shared, "@1");
        shared.dispatcher.dispatch(Event::Disconnected);

        assert_eq!(events.recv().await, Some(Event::Ready));
        assert_eq!(events.recv().await, Some(Event::Disconnected));
    }
}
