//! Erase routine and download into the ECU's mock flash

use example_ecu::{EcuConfig, HarnessEcu, MockFlash};
use pretty_assertions::assert_eq;
use uds_client::{MemoryLocation, NegativeResponseCode, UdsError};
use uds_harness::{init_test_logging, run, HarnessConfig};
use uds_tests::{download, firmware_image};

const FLASH_BASE: u32 = 0xF000;

fn programming_ecu() -> (Box<HarnessEcu>, MockFlash) {
    let ecu = HarnessEcu::new(EcuConfig::with_all_services()).unwrap();
    let flash = ecu.flash();
    (Box::new(ecu), flash)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_erase_routine_erases_program_flash() {
    init_test_logging();
    let (ecu, flash) = programming_ecu();
    flash.write(FLASH_BASE, &[0x12, 0x34]).unwrap();

    run(HarnessConfig::default(), ecu, |ctx| async move {
        let result = ctx
            .client
            .routine_control(0x01, 0xFF00, &[0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x60, 0x14])
            .await
            .unwrap();
        assert_eq!(result.routine_id, 0xFF00);
        assert_eq!(result.info, Some(0x00));

        ctx.dut
            .observer
            .assert_event("mockEraseProgramFlash", 2000)
            .await;
    })
    .await
    .unwrap();

    assert!(flash.is_erased());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_into_mock_flash() {
    init_test_logging();
    let (ecu, flash) = programming_ecu();
    let image = firmware_image(20_000);
    let expected = image.clone();

    let blocks = run(HarnessConfig::default(), ecu, |ctx| async move {
        let blocks = download(&ctx.client, FLASH_BASE, &image).await.unwrap();

        let result = ctx.client.routine_control(0x01, 0xFF01, &[]).await.unwrap();
        assert_eq!(result.status_record, vec![0x00]);
        assert_eq!(ctx.dut.counters().get("mockUserApplicationIsValid"), 1);
        blocks
    })
    .await
    .unwrap();

    // 0x0402 byte blocks carry 1024 data bytes
    assert_eq!(blocks, 20);
    assert_eq!(flash.read(FLASH_BASE, expected.len()).unwrap(), expected);
    assert_eq!(
        flash.read(FLASH_BASE + expected.len() as u32, 1).unwrap(),
        vec![MockFlash::ERASED]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_block_counter_aborts_download() {
    init_test_logging();
    let (ecu, _flash) = programming_ecu();

    run(HarnessConfig::default(), ecu, |ctx| async move {
        ctx.client
            .request_download(MemoryLocation::new(FLASH_BASE, 16), 0x00)
            .await
            .unwrap();

        let err = ctx.client.transfer_data(0x02, &[0xAA; 8]).await.unwrap_err();
        assert_eq!(
            err,
            UdsError::NegativeResponse {
                service_id: 0x36,
                nrc: NegativeResponseCode::RequestSequenceError,
            }
        );

        // The aborted download accepts no more data
        let err = ctx.client.transfer_data(0x01, &[0xAA; 8]).await.unwrap_err();
        assert!(matches!(
            err,
            UdsError::NegativeResponse {
                nrc: NegativeResponseCode::RequestSequenceError,
                ..
            }
        ));
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_outside_flash_rejected() {
    init_test_logging();
    let (ecu, _flash) = programming_ecu();

    run(HarnessConfig::default(), ecu, |ctx| async move {
        let err = ctx
            .client
            .request_download(MemoryLocation::new(0x0010_0000, 16), 0x00)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UdsError::NegativeResponse {
                service_id: 0x34,
                nrc: NegativeResponseCode::RequestOutOfRange,
            }
        ));
    })
    .await
    .unwrap();
}
