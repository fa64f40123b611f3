//! Request/response services against the reference ECU

use example_ecu::{EcuConfig, HarnessEcu};
use pretty_assertions::assert_eq;
use uds_client::{NegativeResponseCode, UdsError};
use uds_harness::{init_test_logging, run, HarnessConfig};

fn default_ecu() -> Box<HarnessEcu> {
    Box::new(HarnessEcu::new(EcuConfig::default()).unwrap())
}

fn full_ecu() -> Box<HarnessEcu> {
    Box::new(HarnessEcu::new(EcuConfig::with_all_services()).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ecu_reset_triggers_system_reset() {
    init_test_logging();
    run(HarnessConfig::default(), default_ecu(), |ctx| async move {
        ctx.client.ecu_reset(0x01).await.unwrap();
        ctx.dut.observer.assert_event("mockSystemReset", 2000).await;
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_single_did() {
    init_test_logging();
    run(HarnessConfig::default(), default_ecu(), |ctx| async move {
        let value = ctx.client.read_did(0x0003).await.unwrap();
        assert_eq!(value.to_string(), "(3,)");
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_multiple_dids_in_one_request() {
    init_test_logging();
    run(HarnessConfig::default(), default_ecu(), |ctx| async move {
        let dids: Vec<u16> = (0x0000..=0x0008).collect();
        let values = ctx.client.read_data_by_identifier(&dids).await.unwrap();

        for did in 0x0000..=0x0007u16 {
            assert_eq!(values[&did].scalar(), Some(did as i128), "DID 0x{did:04X}");
        }
        let bytes: Vec<i128> = (1..=20).collect();
        assert_eq!(values[&0x0008].values(), bytes.as_slice());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disabled_service_is_not_supported() {
    init_test_logging();
    run(HarnessConfig::default(), default_ecu(), |ctx| async move {
        let err = ctx.client.change_session(0x03).await.unwrap_err();
        assert_eq!(
            err,
            UdsError::NegativeResponse {
                service_id: 0x10,
                nrc: NegativeResponseCode::ServiceNotSupported,
            }
        );
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_did_is_out_of_range() {
    init_test_logging();
    run(HarnessConfig::default(), default_ecu(), |ctx| async move {
        let err = ctx.client.request(&[0x22, 0x12, 0x34]).await.unwrap_err();
        assert_eq!(
            err,
            UdsError::NegativeResponse {
                service_id: 0x22,
                nrc: NegativeResponseCode::RequestOutOfRange,
            }
        );
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_then_read_back() {
    init_test_logging();
    run(HarnessConfig::default(), full_ecu(), |ctx| async move {
        ctx.client
            .write_data_by_identifier(0x0005, &[-123_456])
            .await
            .unwrap();
        let value = ctx.client.read_did(0x0005).await.unwrap();
        assert_eq!(value.scalar(), Some(-123_456));

        // 20 byte record needs a segmented request
        let record: Vec<i128> = (0..20).rev().collect();
        ctx.client
            .write_data_by_identifier(0x0008, &record)
            .await
            .unwrap();
        let value = ctx.client.read_did(0x0008).await.unwrap();
        assert_eq!(value.values(), record.as_slice());
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tester_present() {
    init_test_logging();
    run(HarnessConfig::default(), full_ecu(), |ctx| async move {
        ctx.client.tester_present(false).await.unwrap();
        ctx.client.tester_present(true).await.unwrap();
        // A suppressed request leaves nothing pending for the next one
        ctx.client.tester_present(false).await.unwrap();
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_communication_control() {
    init_test_logging();
    run(HarnessConfig::default(), full_ecu(), |ctx| async move {
        for (control_type, communication_type) in [(0x00, 0x01), (0x03, 0x03)] {
            ctx.client
                .communication_control(control_type, communication_type)
                .await
                .unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_communication_control_rejects_reserved_type() {
    init_test_logging();
    run(HarnessConfig::default(), full_ecu(), |ctx| async move {
        let err = ctx.client.communication_control(0x00, 0x04).await.unwrap_err();
        assert!(matches!(
            err,
            UdsError::NegativeResponse {
                nrc: NegativeResponseCode::RequestOutOfRange,
                ..
            }
        ));
    })
    .await
    .unwrap();
}
