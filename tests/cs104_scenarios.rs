//! Integration scenarios for the CS104 client/server pair, covering the
//! concrete walkthroughs in spec.md §8 that span more than one module.

use std::time::Duration;

use iec60870::apci::{Apci, ConnectionEvent, U_STARTDT_ACT, U_STARTDT_CON};
use iec60870::asdu::Asdu;
use iec60870::common::{ApplicationLayerParameters, CauseOfTransmission, QualityDescriptor};
use iec60870::iec104::{Client, ClientConfig, Server, ServerConfig};
use iec60870::object::{InformationObject, IoBody, TypeId};
use iec60870::time::CP56Time2a;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn server_on_loopback() -> Server {
    let config = ServerConfig::default()
        .with_bind_address("127.0.0.1:0".parse().unwrap());
    Server::bind(config).await.expect("server bind")
}

/// Scenario 1: clock sync round trip. The wire bytes for the CP56Time2a
/// payload are pinned independently in `time::tests::clock_sync_scenario_bytes`;
/// here we check the whole client -> server path delivers the same ASDU.
#[tokio::test]
async fn clock_sync_round_trip() {
    let server = server_on_loopback().await;
    let addr = server.local_addr();

    let client_config = ClientConfig::default().with_address(addr.ip().to_string(), addr.port());
    let client = Client::connect(client_config).await.expect("client connect");
    client.start_dt().await.unwrap();
    assert_eq!(client.next_event().await, Some(ConnectionEvent::Connected));
    assert_eq!(client.next_event().await, Some(ConnectionEvent::StartDtConfirmed));

    let cp56 = CP56Time2a {
        milliseconds: 0x1886,
        minute: 0x04,
        invalid: false,
        hour: 0x03,
        summer_time: false,
        day_of_month: 0x43 & 0x1F,
        day_of_week: (0x43 >> 5) & 0x07,
        month: 0x02,
        year: 0x17,
    };
    client.send_clock_sync(1, cp56).await.unwrap();

    let (_, asdu) = tokio::time::timeout(Duration::from_secs(2), server.receive())
        .await
        .expect("server receive timed out")
        .expect("server channel closed");

    assert_eq!(asdu.type_id, TypeId::CCsNa1);
    assert_eq!(asdu.cause, CauseOfTransmission::Activation);
    assert_eq!(asdu.common_address, 1);
    match &asdu.elements()[0].body {
        IoBody::ClockSynchronizationCommand { time } => assert_eq!(*time, cp56),
        other => panic!("unexpected IO body: {other:?}"),
    }
}

/// Scenario 2: a slave receiving an I-frame with a bad N(S) closes the
/// connection and reports it through `ConnectionEvent::Closed` rather
/// than accepting any further frames.
#[tokio::test]
async fn sequence_error_closes_connection() {
    let server = server_on_loopback().await;
    let addr = server.local_addr();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&Apci::U { function: U_STARTDT_ACT }.encode()).await.unwrap();

    let con = read_apci(&mut stream).await;
    assert_eq!(con, Apci::U { function: U_STARTDT_CON });
    let client_addr = stream.local_addr().unwrap();
    assert_eq!(server.next_event().await, Some((client_addr, ConnectionEvent::Connected)));
    assert_eq!(
        server.next_event().await,
        Some((client_addr, ConnectionEvent::StartDtConfirmed))
    );

    // receive_count on the server is still 0; sending N(S)=1 violates
    // the expected-next-sequence invariant.
    let bad_frame = Apci::I { send_seq: 1, recv_seq: 0, asdu: vec![] };
    stream.write_all(&bad_frame.encode()).await.unwrap();

    let mut probe = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut probe))
        .await
        .expect("server did not close in time");
    assert_eq!(closed.unwrap(), 0, "expected EOF after sequence error");

    let (_, event) = tokio::time::timeout(Duration::from_secs(2), server.next_event())
        .await
        .expect("missing close event")
        .expect("event channel closed");
    assert!(matches!(event, ConnectionEvent::Closed(_)));
}

/// Scenario 4: redundancy failover. `A` connects but never activates
/// and is dropped before `E` is forwarded; when `B` activates in the
/// same `single_redundancy_group`, the still-queued `E` is delivered
/// to `B` instead.
#[tokio::test]
async fn redundancy_failover_delivers_to_next_active_peer() {
    let server = server_on_loopback().await;
    let addr = server.local_addr();
    let alp = ApplicationLayerParameters::default();

    let a = TcpStream::connect(addr).await.unwrap();
    assert_eq!(server.next_event().await.map(|(_, e)| e), Some(ConnectionEvent::Connected));

    let mut asdu = Asdu::new(TypeId::MSpNa1, false, CauseOfTransmission::Spontaneous, false, false, None, 1);
    asdu.add_io(
        InformationObject { ioa: 1, body: IoBody::SinglePoint { value: true, quality: QualityDescriptor::GOOD, time: None } },
        &alp,
    )
    .unwrap();
    server.send_to_group("default", &asdu, &alp).await.unwrap();

    // A never sends STARTDT_ACT, so it never goes active and never
    // dequeues `E`; dropping it now simulates the mid-transfer failure.
    drop(a);

    let mut b = TcpStream::connect(addr).await.unwrap();
    b.write_all(&Apci::U { function: U_STARTDT_ACT }.encode()).await.unwrap();
    let con = read_apci(&mut b).await;
    assert_eq!(con, Apci::U { function: U_STARTDT_CON });

    let delivered = tokio::time::timeout(Duration::from_secs(2), read_apci(&mut b))
        .await
        .expect("B never received the queued ASDU");
    match delivered {
        Apci::I { asdu: bytes, .. } => {
            let decoded = Asdu::decode(&bytes, &alp).unwrap();
            assert_eq!(decoded.common_address, 1);
            assert_eq!(decoded.type_id, TypeId::MSpNa1);
        }
        other => panic!("expected an I-frame, got {other:?}"),
    }
}

/// Scenario 6: a general interrogation is answered ACT_CON, then data,
/// then ACT_TERM — the ordering a caller's own dispatch code builds on
/// top of `Server::receive`/`Server::send_to_group`.
#[tokio::test]
async fn interrogation_response_sequence() {
    let server = server_on_loopback().await;
    let addr = server.local_addr();
    let alp = ApplicationLayerParameters::default();

    let client_config = ClientConfig::default().with_address(addr.ip().to_string(), addr.port());
    let client = Client::connect(client_config).await.expect("client connect");
    client.start_dt().await.unwrap();
    client.next_event().await;
    client.next_event().await;

    client.send_interrogation(CauseOfTransmission::Activation, 1, 20).await.unwrap();

    let (peer, request) = tokio::time::timeout(Duration::from_secs(2), server.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.type_id, TypeId::CIcNa1);
    let _ = peer;

    let act_con = Asdu::new(TypeId::CIcNa1, false, CauseOfTransmission::ActivationConfirmation, false, false, None, 1);
    server.send_to_group("default", &act_con, &alp).await.unwrap();

    let mut data = Asdu::new(TypeId::MSpNa1, false, CauseOfTransmission::StationInterrogation, false, false, None, 1);
    data.add_io(
        InformationObject { ioa: 1, body: IoBody::SinglePoint { value: true, quality: QualityDescriptor::GOOD, time: None } },
        &alp,
    )
    .unwrap();
    server.send_to_group("default", &data, &alp).await.unwrap();

    let act_term = Asdu::new(TypeId::CIcNa1, false, CauseOfTransmission::ActivationTermination, false, false, None, 1);
    server.send_to_group("default", &act_term, &alp).await.unwrap();

    let first = client.receive().await.unwrap().unwrap();
    assert_eq!(first.cause, CauseOfTransmission::ActivationConfirmation);

    let second = client.receive().await.unwrap().unwrap();
    assert_eq!(second.cause, CauseOfTransmission::StationInterrogation);
    assert_eq!(second.type_id, TypeId::MSpNa1);

    let third = client.receive().await.unwrap().unwrap();
    assert_eq!(third.cause, CauseOfTransmission::ActivationTermination);
}

async fn read_apci(stream: &mut TcpStream) -> Apci {
    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).await.unwrap();
    let len = prefix[1] as usize;
    let mut rest = vec![0u8; len];
    stream.read_exact(&mut rest).await.unwrap();
    let mut whole = Vec::with_capacity(2 + len);
    whole.extend_from_slice(&prefix);
    whole.extend_from_slice(&rest);
    Apci::decode(&whole).unwrap()
}
