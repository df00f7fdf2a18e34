//! Per-connection lifecycle: reader loop, writer loop and teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Frame};
use super::{Hub, Publisher};
use crate::error::{HubError, Result};
use crate::models::Message;

/// Drive one upgraded socket until either direction fails.
///
/// The connection is registered before any frame is read and unregistered
/// exactly once on the way out, whichever side ended the session.
pub async fn run<S, E, SE>(socket: S, hub: Hub)
where
    S: Stream<Item = std::result::Result<WsMessage, E>>
        + Sink<WsMessage, Error = SE>
        + Send
        + 'static,
    E: Into<HubError> + Send + 'static,
    SE: Into<HubError> + Send + 'static,
{
    let (connection, outbound) = match hub.open_connection() {
        Ok(opened) => opened,
        Err(e) => {
            warn!(error = %e, "failed to register connection");
            return;
        }
    };
    let id = connection.id();

    info!(
        conn_id = %id,
        connections = hub.registry().len(),
        "WebSocket client connected"
    );

    let (sink, stream) = socket.split();

    let writer = Arc::clone(&connection);
    let writer_hub = hub.clone();
    let write_timeout = hub.config().write_timeout();
    let write_task = tokio::spawn(async move {
        let result = write_loop(sink, outbound, &writer, write_timeout).await;
        // Unregister right away; the reader may be parked on a full channel
        writer_hub.disconnect(&writer);
        result
    });

    let read_result = read_loop(stream, &connection, &hub.publisher()).await;
    if let Err(e) = &read_result {
        if e.is_connection_scoped() {
            debug!(conn_id = %id, error = %e, "read loop ended");
        } else {
            warn!(conn_id = %id, error = %e, "read loop failed");
        }
    }

    hub.disconnect(&connection);

    match write_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn_id = %id, error = %e, "write loop ended"),
        Err(e) => warn!(conn_id = %id, error = %e, "write task aborted"),
    }

    let session_secs = (Utc::now() - connection.connected_at()).num_seconds();
    info!(
        conn_id = %id,
        session_secs,
        connections = hub.registry().len(),
        "WebSocket client disconnected"
    );
}

/// Decode inbound frames and publish them until the peer goes away, a frame
/// fails to decode, or the connection is closed from the write side.
///
/// Returns `Ok(())` for an orderly close.
pub async fn read_loop<St, E>(
    mut stream: St,
    connection: &ClientConnection,
    publisher: &Publisher,
) -> Result<()>
where
    St: Stream<Item = std::result::Result<WsMessage, E>> + Unpin,
    E: Into<HubError>,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = connection.closed() => return Ok(()),
            frame = stream.next() => frame,
        };

        let message = match frame {
            Some(Ok(WsMessage::Text(text))) => Message::decode(&text)?,
            Some(Ok(WsMessage::Binary(bytes))) => Message::decode_bytes(&bytes)?,
            Some(Ok(WsMessage::Close(_))) => {
                debug!(conn_id = %connection.id(), "peer sent close");
                return Ok(());
            }
            // Pong replies are handled by axum
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(HubError::ConnectionClosed { id: connection.id() }),
        };

        debug!(conn_id = %connection.id(), kind = message.kind(), "inbound message");
        tokio::select! {
            biased;
            _ = connection.closed() => return Ok(()),
            published = publisher.publish(message) => published?,
        }
    }
}

/// Forward queued frames to the socket until the connection is closed.
///
/// A failed or stalled socket write closes the connection, which also ends
/// the reader loop. Unregistering is left to the caller.
pub async fn write_loop<Si, SE>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<Frame>,
    connection: &ClientConnection,
    write_timeout: Duration,
) -> Result<()>
where
    Si: Sink<WsMessage, Error = SE> + Unpin,
    SE: Into<HubError>,
{
    let result = loop {
        let frame = tokio::select! {
            biased;
            _ = connection.closed() => break Ok(()),
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
        };

        match tokio::time::timeout(write_timeout, sink.send(WsMessage::Text(frame.to_string())))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break Err(e.into()),
            Err(_) => {
                break Err(HubError::WriteTimeout {
                    id: connection.id(),
                    timeout_ms: write_timeout.as_millis() as u64,
                })
            }
        }
    };

    connection.close();

    if result.is_ok() {
        // Best effort; the peer may already be gone
        let _ = tokio::time::timeout(write_timeout, sink.send(WsMessage::Close(None))).await;
    }
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use futures::channel::mpsc as fmpsc;
    use futures::stream::{self, BoxStream};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    type Inbound = std::result::Result<WsMessage, axum::Error>;

    fn text(s: &str) -> Inbound {
        Ok(WsMessage::Text(s.to_string()))
    }

    fn io_error() -> Inbound {
        Err(axum::Error::new(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )))
    }

    /// Socket whose reads come from a fixed stream and whose writes all fail
    struct BrokenPipe {
        inbound: BoxStream<'static, Inbound>,
    }

    impl Stream for BrokenPipe {
        type Item = Inbound;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Inbound>> {
            self.inbound.as_mut().poll_next(cx)
        }
    }

    impl Sink<WsMessage> for BrokenPipe {
        type Error = HubError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> Result<()> {
            Err(HubError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "broken pipe",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_read_loop_publishes_and_stops_on_close_frame() {
        let (hub, mut dispatcher) = Hub::new(HubConfig::default());
        let (conn, mut rx) = hub.open_connection().unwrap();

        let frames = stream::iter(vec![
            text(r#"{"type":"graph","data":[1,2,3]}"#),
            Ok(WsMessage::Ping(vec![1])),
            Ok(WsMessage::Binary(br#"{"type":"map","data":{"lat":1.5}}"#.to_vec())),
            Ok(WsMessage::Close(None)),
            text(r#"{"type":"never","data":[]}"#),
        ]);

        read_loop(frames, &conn, &hub.publisher()).await.unwrap();

        assert_eq!(hub.stats().snapshot().messages_published, 2);
        dispatcher.dispatch_next().await.unwrap();
        dispatcher.dispatch_next().await.unwrap();

        // The sender gets its own messages back
        assert!(rx.recv().await.unwrap().contains("\"graph\""));
        assert!(rx.recv().await.unwrap().contains("\"map\""));
    }

    #[tokio::test]
    async fn test_read_loop_fails_on_malformed_frame() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        let (conn, _rx) = hub.open_connection().unwrap();

        let frames = stream::iter(vec![text("{not json"), text(r#"{"type":"x","data":1}"#)]);
        let err = read_loop(frames, &conn, &hub.publisher())
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::Decode(_)));
        assert_eq!(hub.stats().snapshot().messages_published, 0);
    }

    #[tokio::test]
    async fn test_read_loop_reports_transport_error() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        let (conn, _rx) = hub.open_connection().unwrap();

        let err = read_loop(stream::iter(vec![io_error()]), &conn, &hub.publisher())
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::Io(_)));
    }

    #[tokio::test]
    async fn test_read_loop_treats_end_of_stream_as_closed() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        let (conn, _rx) = hub.open_connection().unwrap();

        let err = read_loop(stream::iter(Vec::<Inbound>::new()), &conn, &hub.publisher())
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_read_loop_stops_when_connection_closed_elsewhere() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        let (conn, _rx) = hub.open_connection().unwrap();

        // A stream that never yields
        let pending = stream::pending::<Inbound>();
        let publisher = hub.publisher();
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { read_loop(pending, &conn, &publisher).await })
        };

        hub.disconnect(&conn);

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_read_loop_gives_up_blocked_publish_when_closed() {
        let (hub, _dispatcher) = Hub::new(HubConfig {
            channel_capacity: 1,
            ..HubConfig::default()
        });
        let (conn, _rx) = hub.open_connection().unwrap();

        // The second publish parks: nobody drains the channel
        let frames = stream::iter(vec![
            text(r#"{"type":"graph","data":[1]}"#),
            text(r#"{"type":"graph","data":[2]}"#),
        ])
        .chain(stream::pending());
        let publisher = hub.publisher();
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { read_loop(frames, &conn, &publisher).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());
        conn.close();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader stayed parked on publish")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(hub.stats().snapshot().messages_published, 1);
    }

    #[tokio::test]
    async fn test_run_unregisters_on_write_failure_while_reader_is_blocked() {
        let (hub, _dispatcher) = Hub::new(HubConfig {
            channel_capacity: 1,
            write_timeout_ms: 100,
            ..HubConfig::default()
        });
        let socket = BrokenPipe {
            inbound: stream::iter(vec![
                text(r#"{"type":"graph","data":[1]}"#),
                text(r#"{"type":"graph","data":[2]}"#),
            ])
            .chain(stream::pending())
            .boxed(),
        };

        let session = tokio::spawn(run(socket, hub.clone()));

        let conn = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(conn) = hub.registry().snapshot().pop() {
                    return conn;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session never registered");

        // Let the reader fill the channel and park on the second publish
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.stats().snapshot().messages_published, 1);

        conn.send(Arc::from("doomed"), Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .expect("session did not end after write failure")
            .unwrap();
        assert!(conn.is_closed());
        assert!(!hub.registry().contains(&conn.id()));
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_write_loop_forwards_frames_then_closes() {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(tx));
        let (sink_tx, mut sink_rx) = fmpsc::unbounded::<WsMessage>();
        let sink = sink_tx.sink_map_err(|_| HubError::Internal("sink closed".into()));

        conn.send(Arc::from("one"), Duration::from_millis(50))
            .await
            .unwrap();
        conn.send(Arc::from("two"), Duration::from_millis(50))
            .await
            .unwrap();

        let writer = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                write_loop(sink, rx, &conn, Duration::from_millis(100)).await
            })
        };

        assert!(matches!(sink_rx.next().await, Some(WsMessage::Text(t)) if t == "one"));
        assert!(matches!(sink_rx.next().await, Some(WsMessage::Text(t)) if t == "two"));

        conn.close();
        writer.await.unwrap().unwrap();
        assert!(matches!(sink_rx.next().await, Some(WsMessage::Close(None))));
    }

    #[tokio::test]
    async fn test_write_loop_closes_connection_on_sink_error() {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(tx);
        let (sink_tx, sink_rx) = fmpsc::unbounded::<WsMessage>();
        drop(sink_rx);
        let sink = sink_tx.sink_map_err(|_| HubError::Internal("sink closed".into()));

        conn.send(Arc::from("lost"), Duration::from_millis(50))
            .await
            .unwrap();

        let err = write_loop(sink, rx, &conn, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::Internal(_)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_write_loop_times_out_on_stalled_sink() {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(tx);
        // Bounded sink with nobody reading: the second send parks forever
        let (sink_tx, _sink_rx) = fmpsc::channel::<WsMessage>(0);
        let sink = sink_tx.sink_map_err(|_| HubError::Internal("sink closed".into()));

        for frame in ["a", "b", "c"] {
            conn.send(Arc::from(frame), Duration::from_millis(50))
                .await
                .unwrap();
        }

        let err = write_loop(sink, rx, &conn, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, HubError::WriteTimeout { .. }));
        assert!(conn.is_closed());
    }
}
