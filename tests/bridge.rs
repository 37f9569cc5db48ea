// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for discovery, polling and commands.
//!
//! Devices are simulated in memory and the clock is paused, so every timer
//! of the bridge fires deterministically as the tests sleep.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use fanbridge::bridge::Bridge;
use fanbridge::bus::{BusEvent, Publisher};
use fanbridge::config::{PresentationSettings, Settings, StaticDevice};
use fanbridge::protocol::{ClientFactory, DeviceSnapshot, FanClient};
use fanbridge::range::RangeSpec;
use fanbridge::registry::{DeviceProfile, Naming, PollState};
use fanbridge::{Attribute, AttributeValue, DeviceId, Error, ProtocolError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

// ============================================================================
// Simulated devices
// ============================================================================

struct MockDevice {
    state: Value,
    failing: bool,
}

#[derive(Default)]
struct FleetState {
    devices: HashMap<Ipv4Addr, MockDevice>,
    calls: Vec<(Ipv4Addr, Attribute, AttributeValue)>,
    queries: HashMap<Ipv4Addr, usize>,
    query_times: Vec<(Ipv4Addr, Instant)>,
    reboots: Vec<Ipv4Addr>,
}

#[derive(Clone, Default)]
struct MockFleet(Arc<Mutex<FleetState>>);

impl MockFleet {
    fn add(&self, address: Ipv4Addr, state: Value) {
        self.0.lock().devices.insert(
            address,
            MockDevice {
                state,
                failing: false,
            },
        );
    }

    fn update(&self, address: Ipv4Addr, field: &str, value: Value) {
        if let Some(device) = self.0.lock().devices.get_mut(&address) {
            device.state[field] = value;
        }
    }

    fn set_failing(&self, address: Ipv4Addr, failing: bool) {
        if let Some(device) = self.0.lock().devices.get_mut(&address) {
            device.failing = failing;
        }
    }

    fn calls(&self) -> Vec<(Attribute, AttributeValue)> {
        self.0
            .lock()
            .calls
            .iter()
            .map(|(_, attribute, value)| (*attribute, value.clone()))
            .collect()
    }

    fn calls_at(&self) -> Vec<(Ipv4Addr, Attribute, AttributeValue)> {
        self.0.lock().calls.clone()
    }

    fn query_times(&self) -> Vec<(Ipv4Addr, Instant)> {
        self.0.lock().query_times.clone()
    }

    fn queries(&self, address: Ipv4Addr) -> usize {
        self.0.lock().queries.get(&address).copied().unwrap_or(0)
    }

    fn reboots(&self) -> Vec<Ipv4Addr> {
        self.0.lock().reboots.clone()
    }
}

struct MockClient {
    address: Ipv4Addr,
    fleet: MockFleet,
}

impl FanClient for MockClient {
    fn address(&self) -> Ipv4Addr {
        self.address
    }

    async fn info(&self) -> Result<DeviceSnapshot, ProtocolError> {
        let mut fleet = self.fleet.0.lock();
        *fleet.queries.entry(self.address).or_default() += 1;
        fleet.query_times.push((self.address, Instant::now()));
        match fleet.devices.get(&self.address) {
            None => Err(ProtocolError::Unreachable(self.address.to_string())),
            Some(device) if device.failing => Err(ProtocolError::Rejected {
                status: 500,
                reason: "Internal Server Error".to_string(),
            }),
            Some(device) => DeviceSnapshot::from_value(device.state.clone())
                .map_err(|e| ProtocolError::InvalidResponse(e.to_string())),
        }
    }

    async fn set(&self, attribute: Attribute, value: AttributeValue) -> Result<Value, ProtocolError> {
        let mut fleet = self.fleet.0.lock();
        fleet.calls.push((self.address, attribute, value.clone()));
        match fleet.devices.get_mut(&self.address) {
            None => Err(ProtocolError::Unreachable(self.address.to_string())),
            Some(device) if device.failing => Err(ProtocolError::Rejected {
                status: 500,
                reason: "Internal Server Error".to_string(),
            }),
            Some(device) => {
                device.state[attribute.field()] = value.to_json();
                Ok(device.state.clone())
            }
        }
    }

    async fn reboot(&self) {
        self.fleet.0.lock().reboots.push(self.address);
    }
}

impl ClientFactory for MockFleet {
    type Client = MockClient;

    fn client_for(&self, address: Ipv4Addr) -> Result<MockClient, ProtocolError> {
        Ok(MockClient {
            address,
            fleet: self.clone(),
        })
    }
}

// ============================================================================
// Recording publisher
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Published {
    topic: String,
    payload: String,
    retain: bool,
}

#[derive(Clone, Default)]
struct RecordingPublisher(Arc<Mutex<Vec<Published>>>);

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool) {
        self.0.lock().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        });
    }
}

impl RecordingPublisher {
    fn payloads(&self, topic: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    fn under(&self, prefix: &str) -> Vec<(String, String)> {
        self.0
            .lock()
            .iter()
            .filter(|m| m.topic.starts_with(prefix))
            .map(|m| (m.topic.clone(), m.payload.clone()))
            .collect()
    }

    fn find(&self, topic: &str) -> Vec<Published> {
        self.0
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.0.lock().clear();
    }
}

// ============================================================================
// Helpers
// ============================================================================

type TestBridge = Bridge<MockFleet, RecordingPublisher>;

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, last)
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.ranges = Some(Vec::new());
    settings
}

fn bridge(settings: Settings) -> (TestBridge, MockFleet, RecordingPublisher) {
    let fleet = MockFleet::default();
    let publisher = RecordingPublisher::default();
    let bridge = Bridge::new(settings, fleet.clone(), publisher.clone()).unwrap();
    (bridge, fleet, publisher)
}

fn porch(address: Option<Ipv4Addr>) -> StaticDevice {
    let id = DeviceId::new("ab1234");
    let profile = DeviceProfile::named(&id, "Porch", &Naming::default());
    StaticDevice {
        id,
        profile,
        address,
    }
}

fn fan_state() -> Value {
    json!({ "id": "ab1234", "fanOn": false, "fanSpeed": 2 })
}

async fn advance(secs: f64) {
    sleep(Duration::from_secs_f64(secs)).await;
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scan_discovers_device_and_announces_it() {
    let mut settings = settings();
    settings.ranges = Some(vec![RangeSpec::Address(addr(10))]);
    let (bridge, fleet, publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());

    bridge.start();
    advance(3.0).await;

    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.poll_state, PollState::Active);
    assert_eq!(status.address, Some(addr(10)));
    assert_eq!(status.liveness, Some(true));

    let messages = publisher.under("mf/ab1234/");
    assert_eq!(
        messages[0],
        ("mf/ab1234/state".to_string(), "on".to_string())
    );
    assert!(messages.contains(&("mf/ab1234/fan".to_string(), "off".to_string())));
    assert!(messages.contains(&("mf/ab1234/speed".to_string(), "2".to_string())));
}

#[tokio::test(start_paused = true)]
async fn unreachable_addresses_register_nothing() {
    let mut settings = settings();
    settings.ranges = Some(vec![RangeSpec::Span {
        start: addr(1),
        end: addr(5),
    }]);
    let (bridge, fleet, _publisher) = bridge(settings);

    bridge.start();
    advance(2.0).await;

    assert_eq!(bridge.device_count(), 0);
    for last in 1..=5 {
        assert_eq!(fleet.queries(addr(last)), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn scan_skips_recent_probes_until_fullscan() {
    let mut settings = settings();
    settings.ranges = Some(vec![RangeSpec::Address(addr(40))]);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(40), fan_state());
    fleet.set_failing(addr(40), true);

    bridge.start();
    advance(1.0).await;
    assert_eq!(fleet.queries(addr(40)), 1);

    bridge.handle_message("mf/command", "scan");
    advance(1.0).await;
    assert_eq!(fleet.queries(addr(40)), 1);

    bridge.handle_message("mf/command", "FullScan");
    advance(1.0).await;
    assert_eq!(fleet.queries(addr(40)), 2);
    assert_eq!(bridge.device_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rediscovery_keeps_profile_and_takes_new_address() {
    let mut settings = settings();
    let mut device = porch(Some(addr(20)));
    device.profile.max_speed = 3;
    device.profile.has_light = false;
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);

    let before = bridge.status("porch").unwrap();
    assert_eq!(before.poll_state, PollState::Undiscovered);
    assert_eq!(before.address, Some(addr(20)));

    fleet.add(addr(21), json!({ "clientId": "AB1234", "fanSpeed": 1 }));
    bridge.probe(addr(21)).await;

    let after = bridge.status("porch").unwrap();
    assert_eq!(bridge.device_count(), 1);
    assert_eq!(after.address, Some(addr(21)));
    assert_eq!(after.profile.name, "Porch");
    assert_eq!(after.profile.max_speed, 3);
    assert!(!after.profile.has_light);
    assert_eq!(after.poll_state, PollState::Active);
}

#[tokio::test(start_paused = true)]
async fn announcement_clears_recency_and_probes_later() {
    let mut settings = settings();
    settings.new_device_topic = Some("tele/+/LWT".to_string());
    let (bridge, fleet, _publisher) = bridge(settings);

    fleet.add(addr(30), json!({ "id": "ab3030" }));
    fleet.set_failing(addr(30), true);
    bridge.probe(addr(30)).await;
    fleet.set_failing(addr(30), false);

    // Still within the discovery window
    bridge.probe(addr(30)).await;
    assert_eq!(bridge.device_count(), 0);

    bridge.handle_message("tele/fan/LWT", "192.168.1.30");
    advance(4.0).await;
    assert_eq!(bridge.device_count(), 0);

    advance(2.0).await;
    assert_eq!(
        bridge.status("ab3030").map(|s| s.poll_state),
        Some(PollState::Active)
    );
}

#[tokio::test(start_paused = true)]
async fn announcement_reads_configured_field() {
    let mut settings = settings();
    settings.new_device_topic = Some("tele/+/LWT".to_string());
    settings.new_device_field = Some("ip".to_string());
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(31), json!({ "id": "ab3131" }));

    bridge.handle_message("tele/fan/LWT", "garbage");
    bridge.handle_message("tele/fan/LWT", r#"{"ip": "192.168.1.31"}"#);
    advance(6.0).await;

    assert_eq!(bridge.device_count(), 1);
    assert!(bridge.status("ab3131").is_some());
}

#[tokio::test(start_paused = true)]
async fn scan_reaches_configured_device_address() {
    let mut settings = settings();
    settings.static_devices.push(porch(Some(addr(20))));
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(20), fan_state());

    bridge.start();
    advance(1.0).await;

    let status = bridge.status("porch").unwrap();
    assert_eq!(status.poll_state, PollState::Active);
    assert_eq!(status.address, Some(addr(20)));
}

// Hostname resolution runs on the blocking pool, so this one uses real time.
#[tokio::test]
async fn scan_resolves_configured_hostname() {
    let mut settings = settings();
    let mut device = porch(None);
    device.profile.hostname = "localhost".to_string();
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(Ipv4Addr::LOCALHOST, fan_state());

    bridge.start();
    let deadline = Instant::now() + Duration::from_secs(5);
    while bridge.status("porch").unwrap().poll_state != PollState::Active {
        assert!(Instant::now() < deadline, "hostname was never probed");
        sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(
        bridge.status("porch").unwrap().address,
        Some(Ipv4Addr::LOCALHOST)
    );
}

#[tokio::test(start_paused = true)]
async fn scan_staggers_queries() {
    let mut settings = settings();
    settings.ranges = Some(vec![RangeSpec::Span {
        start: addr(1),
        end: addr(4),
    }]);
    let stagger = settings.timing.stagger;
    let first_due = settings.timing.scan_delay + stagger;
    let (bridge, fleet, _publisher) = bridge(settings);

    let started = Instant::now();
    bridge.start();
    advance(2.0).await;

    let times = fleet.query_times();
    let order: Vec<Ipv4Addr> = times.iter().map(|(address, _)| *address).collect();
    assert_eq!(order, vec![addr(1), addr(2), addr(3), addr(4)]);
    assert!(times[0].1 >= started + first_due);
    for pair in times.windows(2) {
        assert!(pair[1].1 >= pair[0].1 + stagger);
    }
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn change_is_published_and_extends_quiet_window() {
    let (bridge, fleet, publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(3.0).await;
    publisher.clear();

    fleet.update(addr(10), "fanSpeed", json!(4));
    advance(3.0).await;
    assert_eq!(
        publisher.under("mf/ab1234/"),
        vec![("mf/ab1234/speed".to_string(), "4".to_string())]
    );

    // The change at 5.5s restarts the 60s quiet window
    advance(58.0).await;
    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Active);

    advance(3.0).await;
    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.poll_state, PollState::Idle);
    assert_eq!(status.poll_interval, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn idle_device_is_promoted_on_change() {
    let (bridge, fleet, publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    advance(61.0).await;
    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Idle);

    fleet.update(addr(10), "fanOn", json!(true));
    advance(5.0).await;

    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Active);
    assert_eq!(publisher.payloads("mf/ab1234/fan"), vec!["off", "on"]);
}

#[tokio::test(start_paused = true)]
async fn last_change_follows_observed_changes() {
    let (bridge, fleet, _publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    let discovered = bridge.status("ab1234").unwrap().last_change.unwrap();

    advance(61.0).await;
    assert_eq!(
        bridge.status("ab1234").unwrap().last_change,
        Some(discovered)
    );

    fleet.update(addr(10), "fanSpeed", json!(5));
    advance(5.0).await;
    let changed = bridge.status("ab1234").unwrap().last_change.unwrap();
    assert!(changed >= discovered + Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_mark_device_dead_once() {
    let (bridge, fleet, publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(3.0).await;
    fleet.set_failing(addr(10), true);

    // Polls fail at 5.5s, 10.5s and 15.5s
    advance(16.0).await;
    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.failures, 3);
    assert_eq!(status.poll_state, PollState::Active);
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on"]);

    // The fourth failure at 20.5s exceeds the budget
    advance(2.0).await;
    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.poll_state, PollState::Dead);
    assert_eq!(status.liveness, Some(false));
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on", "off"]);

    let queries = fleet.queries(addr(10));
    advance(60.0).await;
    assert_eq!(fleet.queries(addr(10)), queries);
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on", "off"]);
}

#[tokio::test(start_paused = true)]
async fn failures_within_budget_keep_liveness() {
    let (bridge, fleet, publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(3.0).await;

    fleet.set_failing(addr(10), true);
    advance(14.0).await;
    assert_eq!(bridge.status("ab1234").unwrap().failures, 3);

    fleet.set_failing(addr(10), false);
    advance(4.0).await;

    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.failures, 0);
    assert_eq!(status.poll_state, PollState::Active);
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on"]);
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn speed_command_sets_device_and_forces_active() {
    let (bridge, fleet, _publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(61.0).await;
    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Idle);

    bridge.handle_message("mf/AB1234/set/Speed", "4");
    advance(0.1).await;

    assert_eq!(
        fleet.calls(),
        vec![(Attribute::FanSpeed, AttributeValue::Number(4))]
    );
    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Active);
}

#[tokio::test(start_paused = true)]
async fn invalid_sets_are_dropped() {
    let (bridge, fleet, _publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/nobody/set/speed", "3");
    bridge.handle_message("mf/ab1234/set/speed", "fast");
    bridge.handle_message("mf/ab1234/set/colour", "red");
    advance(1.0).await;

    assert!(fleet.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn set_before_discovery_is_ignored() {
    let mut settings = settings();
    settings.static_devices.push(porch(Some(addr(10))));
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());

    bridge.handle_message("mf/porch/set/speed", "3");
    advance(1.0).await;

    assert!(fleet.calls().is_empty());
    assert_eq!(
        bridge.status("porch").unwrap().poll_state,
        PollState::Undiscovered
    );
}

#[tokio::test(start_paused = true)]
async fn boost_restores_requested_speed() {
    let mut settings = settings();
    settings.timing.boost_duration = Duration::from_secs(10);
    let mut device = porch(Some(addr(10)));
    device.profile.boost_on_start = true;
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(1.0).await;

    bridge.handle_message("mf/porch/set/fan", "on");
    advance(0.1).await;
    assert_eq!(
        fleet.calls(),
        vec![
            (Attribute::FanSpeed, AttributeValue::Number(6)),
            (Attribute::FanOn, AttributeValue::Bool(true)),
        ]
    );

    advance(10.0).await;
    assert_eq!(
        fleet.calls().last(),
        Some(&(Attribute::FanSpeed, AttributeValue::Number(2)))
    );
    assert_eq!(fleet.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn boost_restore_uses_latest_requested_speed() {
    let mut settings = settings();
    settings.timing.boost_duration = Duration::from_secs(10);
    let mut device = porch(Some(addr(10)));
    device.profile.boost_on_start = true;
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/porch/set/fan", "on");
    advance(2.0).await;
    bridge.handle_message("mf/porch/set/speed", "4");
    advance(9.0).await;

    assert_eq!(
        fleet.calls(),
        vec![
            (Attribute::FanSpeed, AttributeValue::Number(6)),
            (Attribute::FanOn, AttributeValue::Bool(true)),
            (Attribute::FanSpeed, AttributeValue::Number(4)),
            (Attribute::FanSpeed, AttributeValue::Number(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn boost_restore_survives_dead_command() {
    let mut settings = settings();
    settings.timing.boost_duration = Duration::from_secs(10);
    let mut device = porch(Some(addr(10)));
    device.profile.boost_on_start = true;
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/porch/set/fan", "on");
    advance(2.0).await;
    bridge.handle_message("mf/porch/set/dead", "");
    advance(0.1).await;
    assert_eq!(bridge.status("porch").unwrap().poll_state, PollState::Dead);

    advance(10.0).await;
    assert_eq!(
        fleet.calls().last(),
        Some(&(Attribute::FanSpeed, AttributeValue::Number(2)))
    );
    assert_eq!(fleet.calls().len(), 3);
    assert_eq!(bridge.status("porch").unwrap().poll_state, PollState::Dead);
}

#[tokio::test(start_paused = true)]
async fn boost_restore_follows_device_to_new_address() {
    let mut settings = settings();
    settings.timing.boost_duration = Duration::from_secs(10);
    let mut device = porch(Some(addr(10)));
    device.profile.boost_on_start = true;
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/porch/set/fan", "on");
    advance(2.0).await;

    fleet.add(addr(11), fan_state());
    bridge.probe(addr(11)).await;
    assert_eq!(bridge.status("porch").unwrap().address, Some(addr(11)));

    advance(9.0).await;
    assert_eq!(
        fleet.calls_at().last(),
        Some(&(addr(11), Attribute::FanSpeed, AttributeValue::Number(2)))
    );
}

#[tokio::test(start_paused = true)]
async fn set_reaches_mixed_case_slug() {
    let mut settings = settings();
    let mut device = porch(Some(addr(10)));
    device.profile.slug = "Porch_Fan".to_string();
    settings.static_devices.push(device);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/Porch_Fan/set/SPEED", "3");
    advance(0.1).await;

    assert_eq!(
        fleet.calls(),
        vec![(Attribute::FanSpeed, AttributeValue::Number(3))]
    );
    assert!(bridge.status("Porch_Fan").is_some());
}

#[tokio::test(start_paused = true)]
async fn power_on_without_boost_profile_is_plain_set() {
    let mut settings = settings();
    settings.timing.boost_duration = Duration::from_secs(10);
    let (bridge, fleet, _publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/ab1234/set/fan", "on");
    advance(11.0).await;

    assert_eq!(
        fleet.calls(),
        vec![(Attribute::FanOn, AttributeValue::Bool(true))]
    );
}

#[tokio::test(start_paused = true)]
async fn dead_and_alive_commands() {
    let (bridge, fleet, publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(3.0).await;

    bridge.handle_message("mf/ab1234/set/dead", "");
    assert_eq!(bridge.status("ab1234").unwrap().poll_state, PollState::Dead);
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on", "off"]);

    let queries = fleet.queries(addr(10));
    advance(10.0).await;
    assert_eq!(fleet.queries(addr(10)), queries);

    bridge.handle_message("mf/ab1234/set/alive", "");
    advance(1.0).await;
    let status = bridge.status("ab1234").unwrap();
    assert_eq!(status.poll_state, PollState::Active);
    assert_eq!(status.failures, 0);
    assert_eq!(publisher.payloads("mf/ab1234/state"), vec!["on", "off", "on"]);
}

#[tokio::test(start_paused = true)]
async fn debug_and_reboot_commands() {
    let (bridge, fleet, _publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    bridge.handle_message("mf/ab1234/set/debug", "on");
    assert!(bridge.status("ab1234").unwrap().profile.debug);

    bridge.handle_message("mf/ab1234/set/reboot", "");
    advance(0.1).await;
    assert_eq!(fleet.reboots(), vec![addr(10)]);
}

// ============================================================================
// Presentation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn descriptors_are_published_and_republished() {
    let mut settings = settings();
    settings.presentation = Some(PresentationSettings {
        retain: true,
        ..PresentationSettings::default()
    });
    let (bridge, fleet, publisher) = bridge(settings);
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;
    advance(3.0).await;

    let fan = publisher.find("homeassistant/fan/ab1234/config");
    assert_eq!(fan.len(), 1);
    assert!(fan[0].retain);
    let descriptor: Value = serde_json::from_str(&fan[0].payload).unwrap();
    assert_eq!(descriptor["unique_id"], json!("AB1234-fan"));
    assert_eq!(descriptor["command_topic"], json!("mf/ab1234/set/fan"));
    assert_eq!(publisher.find("homeassistant/light/ab1234/config").len(), 1);

    bridge.handle_message("homeassistant/status", "offline");
    bridge.handle_message("homeassistant/status", "online");
    advance(31.0).await;
    assert_eq!(publisher.find("homeassistant/fan/ab1234/config").len(), 2);
    assert_eq!(publisher.payloads("mf/ab1234/speed").len(), 1);

    advance(2.0).await;
    assert_eq!(publisher.payloads("mf/ab1234/speed").len(), 2);
}

// ============================================================================
// Event loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn quiet_bus_stops_with_inactivity() {
    let (bridge, _fleet, publisher) = bridge(settings());
    let (_tx, rx) = mpsc::channel(8);

    let err = bridge.run(rx).await;

    assert!(matches!(err, Error::Inactivity { idle_secs: 90 }));
    assert_eq!(err.exit_code(), 10);

    let heartbeats = publisher.payloads("mf/ping");
    assert_eq!(heartbeats.len(), 1);
    let heartbeat: Value = serde_json::from_str(&heartbeats[0]).unwrap();
    assert!(heartbeat["timestamp"].is_string());
}

#[tokio::test(start_paused = true)]
async fn bus_traffic_resets_inactivity() {
    let (bridge, _fleet, _publisher) = bridge(settings());
    let (tx, rx) = mpsc::channel(8);
    let start = Instant::now();

    tokio::spawn(async move {
        for _ in 0..3 {
            sleep(Duration::from_secs(30)).await;
            let _ = tx.send(BusEvent::message("mf/ping", "{}")).await;
        }
        std::future::pending::<()>().await;
    });

    let err = bridge.run(rx).await;

    assert!(matches!(err, Error::Inactivity { .. }));
    assert!(start.elapsed() >= Duration::from_secs(180));
    assert!(start.elapsed() < Duration::from_secs(181));
}

#[tokio::test(start_paused = true)]
async fn closed_bus_stops_bridge() {
    let (bridge, _fleet, _publisher) = bridge(settings());

    let (tx, rx) = mpsc::channel(8);
    tx.send(BusEvent::Closed("broker gone".to_string()))
        .await
        .unwrap();
    let err = bridge.run(rx).await;
    assert!(matches!(err, Error::TransportClosed(ref reason) if reason == "broker gone"));
    assert_eq!(err.exit_code(), 1);

    let (tx, rx) = mpsc::channel::<BusEvent>(8);
    drop(tx);
    assert!(matches!(bridge.run(rx).await, Error::TransportClosed(_)));
}

#[tokio::test(start_paused = true)]
async fn messages_are_routed_from_the_event_loop() {
    let (bridge, fleet, _publisher) = bridge(settings());
    fleet.add(addr(10), fan_state());
    bridge.probe(addr(10)).await;

    let (tx, rx) = mpsc::channel(8);
    tx.send(BusEvent::message("mf/ab1234/set/light", "on"))
        .await
        .unwrap();
    tx.send(BusEvent::Closed("done".to_string())).await.unwrap();

    let _ = bridge.run(rx).await;
    advance(0.1).await;

    assert_eq!(
        fleet.calls(),
        vec![(Attribute::LightOn, AttributeValue::Bool(true))]
    );
}
