//! Shared test harness: a simulator-backed driver with fast deadlines
//! and an event channel the tests can block on.

#![allow(dead_code)]

use std::sync::{Arc, mpsc};

use imulink::config::{DeviceProperties, DriverConfig, ParamDefinition};
use imulink::driver::ImuDriver;
use imulink::events::DriverEvent;
use imulink::ops::upgrade::NullFlasher;
use imulink::ports::{EventSink, NullLogControl};
use imulink::sim::{SimBehavior, SimCodec, SimDevice};

/// Sink forwarding every event to the test thread.
pub struct ChannelSink(pub mpsc::Sender<DriverEvent>);

impl EventSink for ChannelSink {
    fn publish(&self, event: &DriverEvent) {
        let _ = self.0.send(event.clone());
    }
}

/// Deadlines scaled down so failure paths resolve in milliseconds.
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        command_timeout_ms: 200,
        param_read_timeout_ms: 200,
        align_start_timeout_ms: 500,
        align_status_timeout_ms: 200,
        align_stored_timeout_ms: 300,
        align_settle_ms: 20,
        align_poll_backoff_ms: 20,
        align_status_poll_limit: Some(600),
    }
}

/// Wire a driver to a scripted device.
pub fn rig_with(
    behavior: SimBehavior,
    config: DriverConfig,
) -> (ImuDriver, Arc<SimDevice>, mpsc::Receiver<DriverEvent>) {
    let device = SimDevice::new(behavior);
    let (tx, rx) = mpsc::channel();
    let driver = ImuDriver::new(
        device.transport(),
        Box::new(SimCodec),
        Arc::new(ChannelSink(tx)),
        Arc::new(NullLogControl),
        Arc::new(NullFlasher),
        config,
    )
    .expect("driver construction");
    device.attach(driver.reply_sink());
    (driver, device, rx)
}

pub fn rig(behavior: SimBehavior) -> (ImuDriver, Arc<SimDevice>, mpsc::Receiver<DriverEvent>) {
    rig_with(behavior, fast_config())
}

/// Properties document defining the given parameter ids.
pub fn props_with(ids: &[(u32, &str)]) -> DeviceProperties {
    DeviceProperties {
        app_name: "IMU".into(),
        user_configuration: ids
            .iter()
            .map(|(id, name)| ParamDefinition {
                param_id: *id,
                name: (*name).into(),
                value_type: "int64".into(),
            })
            .collect(),
    }
}
