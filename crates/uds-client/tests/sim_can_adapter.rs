//! SimCanAdapter against a scripted ISO-TP responder on a simulated bus

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use sim_can::SimBus;
use tokio::task::JoinHandle;
use uds_client::{
    ClientConfig, DidValue, ResponseTiming, SimCanAdapter, TransportAdapter, TransportError,
    UdsClient,
};
use uds_isotp::{IsoTpLink, LinkConfig};

/// A server that answers each reassembled request with the frames `script`
/// returns, sending them `delay` apart
fn spawn_responder<F>(bus: &SimBus, delay: Duration, script: F) -> JoinHandle<()>
where
    F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
{
    let mut port = bus.attach();
    tokio::spawn(async move {
        let mut link = IsoTpLink::new(LinkConfig::new(0x7A8, 0x7A0).with_padding(0x55));
        let started = Instant::now();
        let mut queued: Vec<(Instant, Vec<u8>)> = Vec::new();
        loop {
            let frame = port.receive(Duration::from_millis(1)).await;
            let now_ms = started.elapsed().as_millis() as u64;
            if let Some(frame) = frame {
                if frame.id() == link.rx_id() {
                    let _ = link.on_frame(frame.data(), now_ms);
                }
            }
            while let Some(request) = link.take_received() {
                let mut at = Instant::now();
                for response in script(&request) {
                    at += delay;
                    queued.push((at, response));
                }
            }
            if !link.is_transmitting() {
                if let Some(pos) = queued.iter().position(|(at, _)| *at <= Instant::now()) {
                    let (_, response) = queued.remove(pos);
                    link.send(&response, now_ms).unwrap();
                }
            }
            let _ = link.poll(now_ms);
            for data in link.drain_outbound() {
                port.send_raw(link.tx_id(), &data).unwrap();
            }
        }
    })
}

fn open(bus: &SimBus, timing: ResponseTiming) -> SimCanAdapter {
    SimCanAdapter::new(
        bus,
        ClientConfig::default().link_config().unwrap(),
        timing,
    )
    .unwrap()
}

#[tokio::test]
async fn test_single_frame_exchange() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::ZERO, |req| {
        assert_eq!(req, &[0x22, 0x00, 0x03]);
        vec![vec![0x62, 0x00, 0x03, 0x03, 0x00]]
    });
    let adapter = open(&bus, ResponseTiming::default());

    let response = adapter
        .send_receive(&[0x22, 0x00, 0x03], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(response, vec![0x62, 0x00, 0x03, 0x03, 0x00]);

    adapter.close().await;
    responder.abort();
}

#[tokio::test]
async fn test_segmented_response_is_reassembled() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::ZERO, |_| {
        let mut resp = vec![0x62, 0x00, 0x08];
        resp.extend(1..=20u8);
        vec![resp]
    });
    let adapter = Arc::new(open(&bus, ResponseTiming::default()));
    let client = UdsClient::new(adapter.clone(), ClientConfig::default()).unwrap();

    let value = client.read_did(0x0008).await.unwrap();
    assert_eq!(value, DidValue((1..=20).collect()));

    adapter.close().await;
    responder.abort();
}

#[tokio::test]
async fn test_response_pending_extends_wait() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::from_millis(60), |_| {
        vec![
            vec![0x7F, 0x31, 0x78],
            vec![0x7F, 0x31, 0x78],
            vec![0x71, 0x01, 0xFF, 0x00, 0x00],
        ]
    });
    let adapter = open(
        &bus,
        ResponseTiming {
            p2: Duration::from_millis(100),
            p2_star: Duration::from_millis(500),
        },
    );

    let response = adapter
        .send_receive(&[0x31, 0x01, 0xFF, 0x00], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response[0], 0x71);

    adapter.close().await;
    responder.abort();
}

#[tokio::test]
async fn test_silent_server_times_out_after_p2() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::ZERO, |_| Vec::new());
    let adapter = open(
        &bus,
        ResponseTiming {
            p2: Duration::from_millis(50),
            p2_star: Duration::from_millis(500),
        },
    );

    let started = Instant::now();
    let err = adapter
        .send_receive(&[0x3E, 0x00], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(1));

    adapter.close().await;
    responder.abort();
}

#[tokio::test]
async fn test_unrelated_messages_do_not_complete_request() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::from_millis(10), |req| {
        vec![
            vec![0x7F, 0x10, 0x11],
            vec![0x50, 0x01],
            vec![req[0] + 0x40, 0x00],
        ]
    });
    let adapter = open(&bus, ResponseTiming::default());

    let response = adapter
        .send_receive(&[0x3E, 0x00], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(response, vec![0x7E, 0x00]);

    adapter.close().await;
    responder.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_are_serialized() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::from_millis(5), |req| {
        vec![vec![0x62, req[1], req[2], req[2], 0x00]]
    });
    let adapter = Arc::new(open(&bus, ResponseTiming::default()));

    let mut tasks = Vec::new();
    for did in 0u8..4 {
        let adapter = adapter.clone();
        tasks.push(tokio::spawn(async move {
            adapter
                .send_receive(&[0x22, 0x00, did], Duration::from_secs(2))
                .await
        }));
    }
    for (did, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response, vec![0x62, 0x00, did as u8, did as u8, 0x00]);
    }

    adapter.close().await;
    responder.abort();
}

#[tokio::test]
async fn test_subscribers_see_every_message() {
    let bus = SimBus::new("vcan0");
    let responder = spawn_responder(&bus, Duration::ZERO, |_| vec![vec![0x7E, 0x00]]);
    let adapter = open(&bus, ResponseTiming::default());
    let mut incoming = adapter.subscribe();

    adapter
        .send_receive(&[0x3E, 0x00], Duration::from_secs(1))
        .await
        .unwrap();
    let msg = incoming.recv().await.unwrap();
    assert_eq!(msg.data, vec![0x7E, 0x00]);
    assert_eq!(msg.source.rx_id, 0x7A8);

    adapter.close().await;
    responder.abort();
}
