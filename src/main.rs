//! Demo binary — drives the full driver stack against the in-process
//! simulator: identify, read and write parameters, save configuration,
//! run a magnetic alignment to completion, and flash a (null) firmware
//! image.
//!
//! Run with `RUST_LOG=debug` to watch the round trips.

use std::sync::{Arc, mpsc};
use std::time::Duration;

use anyhow::{Result, bail};
use log::info;

use imulink::config::{DeviceProperties, DriverConfig, ParamDefinition};
use imulink::driver::{AppInfo, DeviceInfo, ImuDriver, ParamUpdate};
use imulink::events::DriverEvent;
use imulink::ops::upgrade::NullFlasher;
use imulink::ports::{EventSink, NullLogControl};
use imulink::sim::{SimBehavior, SimCodec, SimDevice};
use serde_json::json;

/// Sink that logs every event and forwards it to the main thread.
struct ChannelSink(mpsc::Sender<DriverEvent>);

impl EventSink for ChannelSink {
    fn publish(&self, event: &DriverEvent) {
        info!(
            "event [{}/{}]: {}",
            event.category(),
            event.kind(),
            event.data()
        );
        let _ = self.0.send(event.clone());
    }
}

fn main() -> Result<()> {
    env_logger::init();

    // ── Simulated device + driver wiring ──────────────────────
    let device = SimDevice::new(SimBehavior::default());
    let (tx, rx) = mpsc::channel();

    let config = DriverConfig {
        align_settle_ms: 100,
        align_poll_backoff_ms: 50,
        ..DriverConfig::default()
    };
    let driver = ImuDriver::new(
        device.transport(),
        Box::new(SimCodec),
        Arc::new(ChannelSink(tx)),
        Arc::new(NullLogControl),
        Arc::new(NullFlasher),
        config,
    )?;
    device.attach(driver.reply_sink());

    driver.attach_identity(
        DeviceInfo {
            name: "OpenIMU300ZI".into(),
            pn: "5020-3885-01".into(),
            firmware_version: "1.1.3".into(),
            sn: "1808400188".into(),
        },
        AppInfo {
            app_name: "IMU".into(),
            version: "OpenIMU300ZI IMU 1.1.3".into(),
        },
    );
    driver.set_properties(DeviceProperties {
        app_name: "IMU".into(),
        user_configuration: vec![ParamDefinition {
            param_id: 5,
            name: "Packet Rate".into(),
            value_type: "int64".into(),
        }],
    });

    // ── Synchronous commands ──────────────────────────────────
    println!("device info : {}", driver.get_device_info().data);

    let params = driver.get_params();
    if !params.is_success() {
        bail!("parameter read failed: {}", params.data);
    }
    println!("parameters  : {}", params.data);
    println!("sample rate : {}", driver.sample_rate());

    let written = driver.set_params(&[ParamUpdate {
        param_id: 5,
        value: json!(200),
    }]);
    println!("set params  : {}", written.data);

    let saved = driver.save_config();
    println!("save config : {} ({:?})", saved.data, saved.status);

    // ── Magnetic alignment ────────────────────────────────────
    let started = driver.mag_align_start();
    if !started.is_success() {
        bail!("alignment rejected: {}", started.data);
    }
    info!("alignment running...");

    match rx.recv_timeout(Duration::from_secs(10))? {
        DriverEvent::AlignmentComplete(cal) => {
            println!("alignment complete:");
            for field in cal.fields() {
                println!("  {:<16} {:>12.6}", field.name, field.value);
            }
        }
        other => bail!("unexpected event while aligning: {other:?}"),
    }
    let saved = driver.mag_align_save();
    println!("align save  : {:?}", saved.status);

    // ── Firmware upgrade (null flasher) ───────────────────────
    let started = driver.start_upgrade(vec![0u8; 4096]);
    if !started.is_success() {
        bail!("upgrade rejected: {}", started.data);
    }
    loop {
        match rx.recv_timeout(Duration::from_secs(10))? {
            DriverEvent::UpgradeProgress { written, total } => {
                info!("flashing {written}/{total}");
            }
            DriverEvent::UpgradeComplete => {
                println!("upgrade     : complete");
                break;
            }
            other => bail!("unexpected event while upgrading: {other:?}"),
        }
    }

    Ok(())
}
