//! Message stream task tests, driven through a scripted stream transport.

mod support;

use std::sync::Arc;

use bytes::Bytes;
use netsession_core::{
    CloseCode, InboundMessage, Message, MessageStreamTask, Request, Session, StreamTransport,
    TaskError, TaskState, TransportError,
};
use support::{Collector, ScriptedStreamTransport, ScriptedTransport, Sent, inline_builder};

fn stream_session(streams: &Arc<ScriptedStreamTransport>) -> Session {
    let transport = Arc::new(ScriptedTransport::default());
    inline_builder(&transport)
        .stream_transport(Arc::clone(streams) as Arc<dyn StreamTransport>)
        .build()
        .unwrap()
}

fn open_stream(session: &Session, streams: &ScriptedStreamTransport) -> MessageStreamTask {
    let task = session
        .message_stream_task(Request::get("wss://example.com/chat").unwrap())
        .unwrap();
    task.resume();
    streams.observer(0).on_open();
    task
}

#[test]
fn test_send_before_open_fails_without_touching_transport() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = session
        .message_stream_task(Request::get("wss://example.com/chat").unwrap())
        .unwrap();
    let outcomes: Collector<Option<TaskError>> = Collector::new();

    task.send(Message::Text("too early".into()), outcomes.sink());
    task.resume();
    assert!(!task.is_open());
    task.send(Message::Text("still early".into()), outcomes.sink());

    let outcomes = outcomes.take();
    assert!(matches!(outcomes[0], Some(TaskError::NotOpen)));
    assert!(matches!(outcomes[1], Some(TaskError::NotOpen)));
    assert!(streams.connection(0).sent().is_empty());
}

#[test]
fn test_send_after_open_forwards_messages() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let outcomes: Collector<Option<TaskError>> = Collector::new();

    assert!(task.is_open());
    assert_eq!(task.state(), TaskState::Running);
    task.send(Message::Text("hi".into()), outcomes.sink());
    task.send(Message::Binary(Bytes::from_static(&[1, 2])), outcomes.sink());

    assert!(outcomes.take().iter().all(Option::is_none));
    assert_eq!(
        streams.connection(0).sent(),
        vec![
            Sent::Text("hi".into()),
            Sent::Binary(Bytes::from_static(&[1, 2]))
        ]
    );
}

#[test]
fn test_receive_resolves_with_next_message_only() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let first: Collector<Result<Message, TaskError>> = Collector::new();
    let second: Collector<Result<Message, TaskError>> = Collector::new();
    let observer = streams.observer(0);

    task.receive(first.sink());
    observer.on_message(InboundMessage::Text("hello".into()));
    assert_eq!(first.take().remove(0).unwrap(), Message::Text("hello".into()));

    task.receive(second.sink());
    assert_eq!(second.len(), 0, "Second receive waits for the next message");
    observer.on_message(InboundMessage::Binary(Bytes::from_static(b"\x00\x01")));
    assert_eq!(
        second.take().remove(0).unwrap(),
        Message::Binary(Bytes::from_static(b"\x00\x01"))
    );
}

#[test]
fn test_second_pending_receive_fails_fast() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let first: Collector<Result<Message, TaskError>> = Collector::new();
    let second: Collector<Result<Message, TaskError>> = Collector::new();

    task.receive(first.sink());
    task.receive(second.sink());
    assert!(matches!(second.take()[0], Err(TaskError::ReceivePending)));

    streams.observer(0).on_message(InboundMessage::Text("one".into()));
    assert_eq!(first.take().remove(0).unwrap(), Message::Text("one".into()));
}

#[test]
fn test_message_without_pending_receive_is_dropped() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let received: Collector<Result<Message, TaskError>> = Collector::new();
    let observer = streams.observer(0);

    observer.on_message(InboundMessage::Text("lost".into()));
    task.receive(received.sink());
    assert_eq!(received.len(), 0);
    observer.on_message(InboundMessage::Text("kept".into()));
    assert_eq!(received.take().remove(0).unwrap(), Message::Text("kept".into()));
}

#[test]
fn test_unsupported_message_type_resolves_receive_with_error() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let received: Collector<Result<Message, TaskError>> = Collector::new();

    task.receive(received.sink());
    streams.observer(0).on_message(InboundMessage::Unsupported {
        kind: "continuation".into(),
    });

    match received.take().remove(0) {
        Err(TaskError::UnsupportedMessageType { kind }) => assert_eq!(kind, "continuation"),
        other => panic!("Expected UnsupportedMessageType, got: {other:?}"),
    }
    assert!(task.is_open(), "An odd message does not end the stream");
}

#[test]
fn test_ping_resolves_on_next_pong_once() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let pongs: Collector<Result<(), TaskError>> = Collector::new();
    let observer = streams.observer(0);

    task.send_ping(pongs.sink());
    assert_eq!(streams.connection(0).sent(), vec![Sent::Ping]);
    observer.on_pong(Bytes::new());
    observer.on_pong(Bytes::new());

    let pongs = pongs.take();
    assert_eq!(pongs.len(), 1);
    assert!(pongs[0].is_ok());
}

#[test]
fn test_newer_ping_replaces_pending_pong_handler() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let older: Collector<Result<(), TaskError>> = Collector::new();
    let newer: Collector<Result<(), TaskError>> = Collector::new();

    task.send_ping(older.sink());
    task.send_ping(newer.sink());
    streams.observer(0).on_pong(Bytes::new());

    assert_eq!(older.len(), 0);
    assert_eq!(newer.len(), 1);
}

#[test]
fn test_ping_before_open_is_not_open() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = session
        .message_stream_task(Request::get("ws://example.com/chat").unwrap())
        .unwrap();
    let pongs: Collector<Result<(), TaskError>> = Collector::new();

    task.send_ping(pongs.sink());
    assert!(matches!(pongs.take()[0], Err(TaskError::NotOpen)));
}

#[test]
fn test_cancel_closes_with_code_and_resolves_pending_receive() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let received: Collector<Result<Message, TaskError>> = Collector::new();

    task.receive(received.sink());
    task.cancel(CloseCode::GoingAway, Some(b"bye".as_slice()));

    assert_eq!(task.state(), TaskState::Completed);
    assert!(!task.is_open());
    assert_eq!(task.close_code(), Some(CloseCode::GoingAway));
    assert_eq!(task.close_reason().as_deref(), Some("bye"));
    assert_eq!(
        streams.connection(0).sent(),
        vec![Sent::Close(CloseCode::GoingAway, Some("bye".into()))]
    );
    assert!(received.take()[0].as_ref().unwrap_err().is_cancelled());

    // Completed streams reject further work.
    let outcomes: Collector<Option<TaskError>> = Collector::new();
    task.send(Message::Text("late".into()), outcomes.sink());
    assert!(matches!(outcomes.take()[0], Some(TaskError::NotOpen)));
}

#[test]
fn test_cancel_drops_invalid_utf8_reason() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);

    task.cancel(CloseCode::NormalClosure, Some(&[0xff_u8, 0xfe][..]));

    assert_eq!(task.close_reason(), None);
    assert_eq!(
        streams.connection(0).sent(),
        vec![Sent::Close(CloseCode::NormalClosure, None)]
    );
}

#[test]
fn test_peer_close_resolves_pending_receive_with_closed() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let received: Collector<Result<Message, TaskError>> = Collector::new();

    task.receive(received.sink());
    streams
        .observer(0)
        .on_closed(1001, Some("server restart".into()), true);

    match received.take().remove(0) {
        Err(TaskError::Closed { code, reason }) => {
            assert_eq!(code, CloseCode::GoingAway);
            assert_eq!(reason, "server restart");
        }
        other => panic!("Expected Closed, got: {other:?}"),
    }
    assert_eq!(task.state(), TaskState::Completed);
    assert!(!task.is_open());
    assert_eq!(task.close_code(), Some(CloseCode::GoingAway));

    // A receive after completion gets the terminal error.
    let late: Collector<Result<Message, TaskError>> = Collector::new();
    task.receive(late.sink());
    assert!(matches!(late.take()[0], Err(TaskError::Closed { .. })));
}

#[test]
fn test_transport_failure_ends_stream() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);
    let received: Collector<Result<Message, TaskError>> = Collector::new();

    task.receive(received.sink());
    streams
        .observer(0)
        .on_failed(TransportError::Other("socket reset".into()));

    let result = received.take().remove(0);
    assert!(matches!(result, Err(TaskError::TransportFailure { .. })));
    assert!(matches!(task.error(), Some(TaskError::TransportFailure { .. })));
    assert!(!task.is_open());
}

#[test]
fn test_unknown_close_code_maps_to_unknown() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);

    streams.observer(0).on_closed(4000, None, false);

    assert_eq!(task.close_code(), Some(CloseCode::Unknown));
    match task.error() {
        Some(TaskError::Closed { reason, .. }) => assert_eq!(reason, "closed"),
        other => panic!("Expected Closed, got: {other:?}"),
    }
}

#[test]
fn test_resume_connects_once() {
    let streams = Arc::new(ScriptedStreamTransport::default());
    let session = stream_session(&streams);
    let task = open_stream(&session, &streams);

    task.suspend();
    assert_eq!(task.state(), TaskState::Suspended);
    task.resume();
    assert_eq!(task.state(), TaskState::Running);
    assert_eq!(streams.connected(), 1);
}
