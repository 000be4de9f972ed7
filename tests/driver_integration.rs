//! Integration tests: command surface against the simulated device.

mod common;

use common::{props_with, rig};
use imulink::driver::ParamUpdate;
use imulink::protocol::opcodes;
use imulink::sim::SimBehavior;
use serde_json::json;

#[test]
fn get_params_round_trips_and_caches_the_snapshot() {
    let behavior = SimBehavior {
        parameters: json!([
            {"paramId": 3, "name": "Baud Rate", "value": 38400},
            {"paramId": 5, "name": "Packet Rate", "value": 50},
        ]),
        ..SimBehavior::default()
    };
    let (driver, _device, _rx) = rig(behavior);

    let res = driver.get_params();
    assert!(res.is_success());
    assert_eq!(res.data[0]["name"], "Baud Rate");

    // Sample rate now answers from the cached snapshot, no round trip.
    assert_eq!(driver.sample_rate(), "50");
}

#[test]
fn sample_rate_defaults_until_a_snapshot_is_cached() {
    let (driver, _device, _rx) = rig(SimBehavior::default());
    assert_eq!(driver.sample_rate(), "100"); // default
}

#[test]
fn set_params_stops_at_first_device_error_and_keeps_earlier_writes() {
    let behavior = SimBehavior {
        reject_params: [(2u32, 4i64)].into_iter().collect(),
        ..SimBehavior::default()
    };
    let (driver, device, _rx) = rig(behavior);
    driver.set_properties(props_with(&[(1, "Accel LPF"), (2, "Rate LPF"), (3, "Orientation")]));

    let res = driver.set_params(&[
        ParamUpdate {
            param_id: 1,
            value: json!(5),
        },
        ParamUpdate {
            param_id: 2,
            value: json!(99),
        },
        ParamUpdate {
            param_id: 3,
            value: json!(7),
        },
    ]);

    // The failing parameter's code is surfaced and processing stopped.
    assert!(!res.is_success());
    assert_eq!(res.data, json!({"error": 4}));

    // id=1 took effect on the device; id=3 was never attempted.
    assert_eq!(device.accepted_writes(), vec![(1, json!(5))]);
}

#[test]
fn set_param_batch_succeeds_end_to_end() {
    let (driver, device, _rx) = rig(SimBehavior::default());
    driver.set_properties(props_with(&[(1, "Accel LPF"), (2, "Rate LPF")]));

    let res = driver.set_params(&[
        ParamUpdate {
            param_id: 1,
            value: json!(25),
        },
        ParamUpdate {
            param_id: 2,
            value: json!("z1"),
        },
    ]);
    assert!(res.is_success());
    assert_eq!(res.data, json!({"error": 0}));
    assert_eq!(
        device.accepted_writes(),
        vec![(1, json!(25)), (2, json!("z1"))]
    );
}

#[test]
fn set_param_without_properties_reports_the_encode_failure() {
    let (driver, device, _rx) = rig(SimBehavior::default());

    let res = driver.set_param(&ParamUpdate {
        param_id: 1,
        value: json!(5),
    });
    assert!(!res.is_success());
    let message = res.data["error"].as_str().unwrap();
    assert!(message.contains("properties"), "got: {message}");
    assert!(device.accepted_writes().is_empty());
}

#[test]
fn save_config_round_trips() {
    let (driver, _device, _rx) = rig(SimBehavior::default());
    let res = driver.save_config();
    assert!(res.is_success());
    assert_eq!(res.data, json!("00")); // ack byte, hex-rendered
}

#[test]
fn silent_device_yields_the_no_response_shape() {
    let behavior = SimBehavior {
        silent_opcodes: vec![opcodes::GET_PARAMS],
        ..SimBehavior::default()
    };
    let (driver, _device, _rx) = rig(behavior);

    let res = driver.get_params();
    assert!(!res.is_success());
    assert_eq!(res.data, json!("No Response"));
}

#[test]
fn load_properties_resolves_by_identified_app_name() {
    use imulink::config::DeviceProperties;
    use imulink::driver::{AppInfo, DeviceInfo};
    use imulink::ports::{PropertyError, PropertySource};
    use std::sync::Mutex;

    /// Source that records which app name was requested.
    struct RecordingSource(Mutex<Vec<String>>);
    impl PropertySource for RecordingSource {
        fn load(&self, app_name: &str) -> Result<DeviceProperties, PropertyError> {
            self.0.lock().unwrap().push(app_name.to_string());
            Ok(DeviceProperties {
                app_name: app_name.to_string(),
                user_configuration: Vec::new(),
            })
        }
    }

    let (driver, _device, _rx) = rig(SimBehavior::default());
    let source = RecordingSource(Mutex::new(Vec::new()));

    // Unidentified device falls back to the generic application.
    driver.load_properties(&source).unwrap();

    driver.attach_identity(
        DeviceInfo {
            name: "OpenIMU300ZI".into(),
            pn: "5020-3885-01".into(),
            firmware_version: "1.1.3".into(),
            sn: "1808400188".into(),
        },
        AppInfo {
            app_name: "VG_AHRS".into(),
            version: "OpenIMU300ZI VG_AHRS 1.1.3".into(),
        },
    );
    driver.load_properties(&source).unwrap();

    assert_eq!(*source.0.lock().unwrap(), vec!["IMU", "VG_AHRS"]);
    assert!(driver.get_config().is_success());
}

#[test]
fn log_descriptor_assembles_the_cached_state() {
    use imulink::driver::{AppInfo, DeviceInfo};

    let (driver, _device, _rx) = rig(SimBehavior::default());
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
    assert!(driver.get_params().is_success());

    let res = driver.log_descriptor();
    assert!(res.is_success());
    assert_eq!(res.data["type"], "IMU");
    assert_eq!(res.data["model"], "OpenIMU300ZI");
    assert_eq!(res.data["logInfo"]["sampleRate"], "100");
    assert_eq!(res.data["logInfo"]["sn"], "1808400188");
}

#[test]
fn mag_align_save_works_without_a_running_alignment() {
    let (driver, _device, _rx) = rig(SimBehavior::default());
    // No workflow is active; the save still goes to the device and the
    // verdict is the device's reply.
    assert!(driver.mag_align_save().is_success());
}

#[test]
fn mag_align_save_surfaces_a_device_error() {
    let behavior = SimBehavior {
        mag_save_error: true,
        ..SimBehavior::default()
    };
    let (driver, _device, _rx) = rig(behavior);

    let res = driver.mag_align_save();
    assert!(!res.is_success());
    assert_eq!(res.data, json!({"error": 1}));
}
