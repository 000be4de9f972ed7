//! Integration tests: magnetic-alignment workflow against the simulator.

mod common;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use common::{fast_config, rig, rig_with};
use imulink::decode::{FieldKind, decode_field};
use imulink::events::DriverEvent;
use imulink::ops::mag_align::AlignPhase;
use imulink::sim::SimBehavior;

fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached within 2s");
}

fn recv_complete(rx: &mpsc::Receiver<DriverEvent>) -> imulink::decode::CalibrationResult {
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(DriverEvent::AlignmentComplete(cal)) => cal,
        other => panic!("expected completion event, got {other:?}"),
    }
}

#[test]
fn full_workflow_decodes_the_stored_calibration() {
    let behavior = SimBehavior {
        status_polls_until_ready: 2,
        calibration: [0x0400, 0xFC00, 0xFFFF, 0x8000],
        ..SimBehavior::default()
    };
    let (driver, _device, rx) = rig(behavior);

    assert!(driver.mag_align_start().is_success());
    let cal = recv_complete(&rx);

    assert_eq!(cal.hard_iron_x, decode_field(0x0400, FieldKind::Axis)); // +0.25
    assert_eq!(cal.hard_iron_y, decode_field(0xFC00, FieldKind::Axis)); // −0.25
    assert_eq!(cal.soft_iron_ratio, 1.0);
    assert!((cal.soft_iron_angle + std::f64::consts::PI).abs() < 1e-12);

    wait_until(|| !driver.aligner().is_running());
    assert_eq!(driver.aligner().phase(), AlignPhase::Complete);
}

#[test]
fn double_start_leaves_exactly_one_workflow() {
    let behavior = SimBehavior {
        status_polls_until_ready: 5,
        ..SimBehavior::default()
    };
    let (driver, _device, rx) = rig(behavior);

    // Both starts report success; only the first launches a worker.
    assert!(driver.mag_align_start().is_success());
    assert!(driver.mag_align_start().is_success());

    let _cal = recv_complete(&rx);

    // Exactly one workflow ran: no second completion ever arrives.
    match rx.recv_timeout(Duration::from_millis(300)) {
        Err(RecvTimeoutError::Timeout) => {}
        other => panic!("second workflow leaked an event: {other:?}"),
    }
}

#[test]
fn abort_stops_the_workflow_and_suppresses_completion() {
    let behavior = SimBehavior {
        status_polls_until_ready: u32::MAX, // never ready on its own
        ..SimBehavior::default()
    };
    let (driver, _device, rx) = rig(behavior);

    assert!(driver.mag_align_start().is_success());
    wait_until(|| driver.aligner().phase() == AlignPhase::Aligning);

    // The abort sub-command races the in-flight status poll for the
    // operation channel, so only the flag-clearing is asserted here.
    let _ = driver.mag_align_abort();

    wait_until(|| !driver.aligner().is_running());
    assert_eq!(driver.aligner().phase(), AlignPhase::Aborted);

    // No completion (or any other) event after an abort.
    match rx.recv_timeout(Duration::from_millis(300)) {
        Err(RecvTimeoutError::Timeout) => {}
        other => panic!("event published after abort: {other:?}"),
    }
}

#[test]
fn poll_limit_turns_a_stalled_device_into_an_error_event() {
    let behavior = SimBehavior {
        status_polls_until_ready: u32::MAX,
        ..SimBehavior::default()
    };
    let mut config = fast_config();
    config.align_status_poll_limit = Some(3);
    let (driver, _device, rx) = rig_with(behavior, config);

    assert!(driver.mag_align_start().is_success());
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(DriverEvent::AlignmentFailed { reason }) => {
            assert!(reason.contains("status polls"), "got: {reason}");
        }
        other => panic!("expected failure event, got {other:?}"),
    }
    wait_until(|| !driver.aligner().is_running());
    assert_eq!(driver.aligner().phase(), AlignPhase::Error);
}

#[test]
fn short_stored_payload_becomes_a_decode_error_event() {
    let behavior = SimBehavior {
        truncate_stored: true,
        ..SimBehavior::default()
    };
    let (driver, _device, rx) = rig(behavior);

    assert!(driver.mag_align_start().is_success());
    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(DriverEvent::AlignmentFailed { reason }) => {
            assert!(reason.contains("too short"), "got: {reason}");
        }
        other => panic!("expected decode failure event, got {other:?}"),
    }
    assert_eq!(driver.aligner().phase(), AlignPhase::Error);
}

#[test]
fn upgrade_is_rejected_while_alignment_runs() {
    let behavior = SimBehavior {
        status_polls_until_ready: u32::MAX,
        ..SimBehavior::default()
    };
    let (driver, _device, _rx) = rig(behavior);

    assert!(driver.mag_align_start().is_success());
    wait_until(|| driver.aligner().is_running());

    let res = driver.start_upgrade(vec![0u8; 64]);
    assert!(!res.is_success());
    let message = res.data["error"].as_str().unwrap();
    assert!(message.contains("magnetic alignment"), "got: {message}");

    let _ = driver.mag_align_abort();
    wait_until(|| !driver.aligner().is_running());
}

#[test]
fn alignment_is_rejected_while_upgrade_runs() {
    use imulink::ops::upgrade::{FirmwareFlasher, FlashError, FlashMonitor};
    use imulink::ports::NullLogControl;
    use imulink::sim::{SimCodec, SimDevice};
    use std::sync::Arc;

    /// Flasher slow enough to hold the guard while we probe.
    struct SlowFlasher;
    impl FirmwareFlasher for SlowFlasher {
        fn flash(&self, _image: &[u8], monitor: &dyn FlashMonitor) -> Result<(), FlashError> {
            for _ in 0..100 {
                if monitor.aborted() {
                    return Err(FlashError::Aborted);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    let device = SimDevice::new(SimBehavior::default());
    let (tx, _rx) = mpsc::channel();
    let driver = imulink::driver::ImuDriver::new(
        device.transport(),
        Box::new(SimCodec),
        Arc::new(common::ChannelSink(tx)),
        Arc::new(NullLogControl),
        Arc::new(SlowFlasher),
        fast_config(),
    )
    .unwrap();
    device.attach(driver.reply_sink());

    assert!(driver.start_upgrade(vec![0u8; 64]).is_success());
    let res = driver.mag_align_start();
    assert!(!res.is_success());
    assert!(
        res.data["error"]
            .as_str()
            .unwrap()
            .contains("firmware upgrade")
    );

    driver.upgrader().abort();
    wait_until(|| !driver.upgrader().is_running());
}
