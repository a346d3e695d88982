mod support;

use iotlink::network::application::mqtt::session::{MAX_MESSAGE_LEN, RX_BUFFER_SIZE};
use iotlink::network::application::mqtt::{Event, Options, QoS, Session};
use iotlink::network::error::Error;
use support::*;

fn options(keep_alive_seconds: u16) -> Options<'static> {
    Options {
        client_id: DEVICE_ID,
        keep_alive_seconds,
        clean_session: true,
    }
}

fn connected(harness: &Harness, keep_alive_seconds: u16) -> Session<MockConnection> {
    let mut session =
        Session::open(MockConnection::open(harness), &options(keep_alive_seconds), 0).unwrap();
    session.poll().unwrap();
    assert_eq!(
        session.next_event(0).unwrap(),
        Some(Event::Connected {
            session_present: false
        })
    );
    session
}

#[test]
fn connack_arrives_as_an_event() {
    let harness = Harness::new();
    let mut session = Session::open(MockConnection::open(&harness), &options(60), 0).unwrap();
    assert!(!session.is_connected());
    assert_eq!(
        harness.sent(0),
        [Sent::Connect {
            client_id: DEVICE_ID.into(),
            keep_alive: 60,
        }]
    );
    assert_eq!(
        session.publish(DATA_TOPIC, b"{}", QoS::AtMostOnce, 0),
        Err(Error::NotOpen)
    );

    assert_eq!(session.next_event(0).unwrap(), None);
    assert_eq!(session.poll().unwrap(), 4);
    assert_eq!(
        session.next_event(0).unwrap(),
        Some(Event::Connected {
            session_present: false
        })
    );
    assert!(session.is_connected());
    assert_eq!(session.poll().unwrap(), 0);
    assert_eq!(session.next_event(0).unwrap(), None);
}

#[test]
fn partial_packets_wait_for_the_rest() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    harness.world().read_chunk = Some(3);
    harness.send_publish(COMMAND_TOPIC, br#"{"earthquake":"on"}"#);

    let mut polls = 0;
    let message = loop {
        assert!(polls < 100);
        session.poll().unwrap();
        polls += 1;
        if let Some(event) = session.next_event(0).unwrap() {
            break event;
        }
    };
    assert!(polls > 5);
    match message {
        Event::Message(message) => {
            assert_eq!(message.topic.as_str(), COMMAND_TOPIC);
            assert_eq!(&message.payload[..], br#"{"earthquake":"on"}"#);
            assert_eq!(message.qos, QoS::AtMostOnce);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn one_poll_drains_every_buffered_packet() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    for n in 0..3u8 {
        harness.send_publish(COMMAND_TOPIC, &[b'0' + n]);
    }

    assert!(session.poll().unwrap() > 0);
    let mut payloads = Vec::new();
    while let Some(event) = session.next_event(0).unwrap() {
        if let Event::Message(message) = event {
            payloads.push(message.payload[0]);
        }
    }
    assert_eq!(payloads, b"012");
}

#[test]
fn inbound_qos1_is_acknowledged() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    harness.push_to_device(&publish_packet(COMMAND_TOPIC, b"{}", Some(42)));

    session.poll().unwrap();
    let event = session.next_event(5).unwrap();
    assert!(matches!(
        event,
        Some(Event::Message(ref m)) if m.qos == QoS::AtLeastOnce
    ));
    assert_eq!(harness.sent(0).last(), Some(&Sent::PubAck { packet_id: 42 }));
}

#[test]
fn oversized_messages_are_acknowledged_and_reported() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    let huge = vec![b'a'; MAX_MESSAGE_LEN + 32];
    harness.push_to_device(&publish_packet(COMMAND_TOPIC, &huge, Some(9)));
    harness.send_publish(COMMAND_TOPIC, b"small");

    session.poll().unwrap();
    match session.next_event(0).unwrap() {
        Some(Event::Discarded { topic, len }) => {
            assert_eq!(topic.as_str(), COMMAND_TOPIC);
            assert_eq!(len, MAX_MESSAGE_LEN + 32);
        }
        other => panic!("unexpected {other:?}"),
    }
    match session.next_event(0).unwrap() {
        Some(Event::Message(message)) => assert_eq!(&message.payload[..], b"small"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(harness.sent(0).contains(&Sent::PubAck { packet_id: 9 }));
}

#[test]
fn packets_larger_than_the_buffer_are_skipped_across_polls() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    harness.world().read_chunk = Some(300);
    let huge = vec![b' '; RX_BUFFER_SIZE + 500];
    harness.push_to_device(&publish_packet(COMMAND_TOPIC, &huge, Some(12)));
    harness.send_publish(COMMAND_TOPIC, br#"{"earthquake":"on"}"#);

    let mut events = Vec::new();
    for _ in 0..50 {
        session.poll().unwrap();
        while let Some(event) = session.next_event(0).unwrap() {
            events.push(event);
        }
    }

    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(
        &events[0],
        Event::Discarded { topic, len } if topic.as_str() == COMMAND_TOPIC && *len > RX_BUFFER_SIZE
    ));
    assert!(matches!(
        &events[1],
        Event::Message(message) if &message.payload[..] == br#"{"earthquake":"on"}"#
    ));
    assert!(harness.sent(0).contains(&Sent::PubAck { packet_id: 12 }));
    session.publish(DATA_TOPIC, b"{}", QoS::AtMostOnce, 0).unwrap();
}

#[test]
fn packet_ids_are_allocated_in_order() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);

    assert_eq!(
        session.publish(DATA_TOPIC, b"a", QoS::AtMostOnce, 0),
        Ok(None)
    );
    assert_eq!(
        session.publish(DATA_TOPIC, b"b", QoS::AtLeastOnce, 0),
        Ok(Some(1))
    );
    assert_eq!(session.subscribe(COMMAND_TOPIC, QoS::AtLeastOnce, 0), Ok(2));

    session.poll().unwrap();
    assert_eq!(
        session.next_event(0).unwrap(),
        Some(Event::Subscribed {
            packet_id: 2,
            granted: Some(QoS::AtLeastOnce)
        })
    );
    assert_eq!(harness.publish_payloads(), [b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn wildcard_topics_are_refused() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    assert_eq!(
        session.publish("devices/+/data", b"{}", QoS::AtMostOnce, 0),
        Err(Error::ProtocolError)
    );
    assert!(harness.publishes().is_empty());
    session.publish(DATA_TOPIC, b"{}", QoS::AtMostOnce, 0).unwrap();
}

#[test]
fn keepalive_pings_when_idle_and_times_out_without_pong() {
    let harness = Harness::new();
    let mut session = connected(&harness, 1);

    session.service_keepalive(999).unwrap();
    assert!(!session.ping_outstanding());
    session.service_keepalive(1000).unwrap();
    assert!(session.ping_outstanding());
    session.poll().unwrap();
    assert_eq!(session.next_event(1001).unwrap(), Some(Event::Pong));
    assert!(!session.ping_outstanding());

    // outbound traffic counts as activity
    session.publish(DATA_TOPIC, b"{}", QoS::AtMostOnce, 1500).unwrap();
    session.service_keepalive(2200).unwrap();
    assert!(!session.ping_outstanding());

    harness.world().answer_pings = false;
    session.service_keepalive(2500).unwrap();
    assert!(session.ping_outstanding());
    session.service_keepalive(3499).unwrap();
    assert_eq!(
        session.service_keepalive(3500),
        Err(Error::KeepaliveTimeout)
    );
}

#[test]
fn broken_connection_surfaces_as_errors() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    harness.break_connections();
    assert_eq!(session.poll(), Err(Error::ReadError));
    assert_eq!(
        session.publish(DATA_TOPIC, b"{}", QoS::AtMostOnce, 0),
        Err(Error::WriteError)
    );
}

#[test]
fn malformed_packets_are_protocol_errors() {
    let harness = Harness::new();
    let mut session = connected(&harness, 60);
    harness.push_to_device(&[0x20, 0x03, 0x00, 0x00, 0x00]);
    session.poll().unwrap();
    assert_eq!(session.next_event(0), Err(Error::ProtocolError));
}

#[test]
fn disconnect_says_goodbye_and_closes() {
    let harness = Harness::new();
    let session = connected(&harness, 60);
    session.disconnect(0).unwrap();
    assert_eq!(harness.sent(0).last(), Some(&Sent::Disconnect));
    assert!(harness.world().wires[0].closed);
}
