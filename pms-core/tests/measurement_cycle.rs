mod support;

use pms_core::device::DeviceState;
use pms_core::orchestrator::{CycleOutcome, LoopConfig, LoopEvent, LoopState, WINDOW_SIZE};
use pms_core::uplink::UPLINK_PORT;

use support::{Rig, TestLoop, report};

fn step(lp: &mut TestLoop, rig: &Rig, millis: u32) {
    rig.clock.advance(millis);
    lp.poll();
}

fn run_until(lp: &mut TestLoop, rig: &Rig, target: LoopState, max_polls: usize) {
    for _ in 0..max_polls {
        if lp.state() == target {
            return;
        }
        step(lp, rig, 10);
    }
    panic!("loop stuck in {} waiting for {}", lp.state(), target);
}

/// Starts the loop and brings the sensor up to its first report.
fn start_measuring(lp: &mut TestLoop, rig: &Rig) {
    lp.begin();
    assert_eq!(lp.state(), LoopState::Inactive);
    step(lp, rig, 1);
    assert_eq!(lp.device().state(), DeviceState::Off);

    lp.request_active(true);
    assert_eq!(lp.state(), LoopState::WakeDevice);
    for _ in 0..60 {
        if lp.device().state() == DeviceState::Normal {
            break;
        }
        step(lp, rig, 10);
    }
    assert_eq!(lp.device().state(), DeviceState::Normal);

    // the first report only proves the sensor is awake
    rig.uart.inject_report(&report(500));
    step(lp, rig, 1);
    assert_eq!(lp.state(), LoopState::Measuring);
    assert_eq!(lp.samples_collected(), 0);
}

fn cycles(lp: &TestLoop) -> Vec<CycleOutcome> {
    lp.history()
        .oldest_first()
        .filter_map(|record| match record.event {
            LoopEvent::Cycle(outcome) => Some(outcome),
            LoopEvent::Entered(_) => None,
        })
        .collect()
}

#[test]
fn full_window_produces_valid_batch_and_uplink() {
    let rig = Rig::new();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    start_measuring(&mut lp, &rig);

    for sample in 0..WINDOW_SIZE {
        assert_eq!(lp.state(), LoopState::Measuring, "sample {sample}");
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }

    assert_eq!(lp.state(), LoopState::PowerDownDevice);
    assert!(lp.batch_valid());
    assert_eq!(lp.device().state(), DeviceState::RequestPowerDown);

    step(&mut lp, &rig, 10);
    assert_eq!(lp.state(), LoopState::Transmit);
    step(&mut lp, &rig, 1);
    assert_eq!(lp.state(), LoopState::Sleeping);

    let sent = rig.uplink.sent();
    assert_eq!(sent.len(), 1);
    let (port, payload) = &sent[0];
    assert_eq!(*port, UPLINK_PORT);
    // identical reports reduce back to their raw values
    assert_eq!(
        payload.as_slice(),
        &[
            0x21, 0x61, // vbat | pm | dust
            0x38, 0x00, // 3.5 V
            0x00, 13, 0x00, 14, 0x00, 15, // atmospheric PM
            0x00, 16, 0x00, 17, 0x00, 18, 0x00, 19, 0x00, 20, 0x00, 21,
        ]
    );
    assert_eq!(lp.last_payload(), payload.as_slice());
    assert_eq!(cycles(&lp), vec![CycleOutcome::Delivered]);
    assert_eq!(lp.tx_cycle_count(), 9);
}

#[test]
fn incomplete_window_times_out_without_uplink() {
    let rig = Rig::new();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    start_measuring(&mut lp, &rig);

    for _ in 0..WINDOW_SIZE - 1 {
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }
    assert_eq!(lp.state(), LoopState::Measuring);
    assert_eq!(lp.samples_collected(), WINDOW_SIZE - 1);

    step(&mut lp, &rig, 20_000);
    assert_eq!(lp.state(), LoopState::PowerDownDevice);
    assert!(!lp.batch_valid());

    step(&mut lp, &rig, 10);
    assert_eq!(lp.state(), LoopState::Sleeping);
    assert!(rig.uplink.sent().is_empty());
    assert_eq!(cycles(&lp), vec![CycleOutcome::Skipped]);
}

#[test]
fn launch_failure_counts_as_completed_cycle() {
    let rig = Rig::new();
    rig.uplink.reject_start();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    start_measuring(&mut lp, &rig);

    for _ in 0..WINDOW_SIZE {
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }
    step(&mut lp, &rig, 10);

    assert_eq!(lp.state(), LoopState::Sleeping);
    assert_eq!(cycles(&lp), vec![CycleOutcome::Failed]);
}

#[test]
fn sleeping_wakes_for_next_cycle_and_stops_on_request() {
    let rig = Rig::new();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    start_measuring(&mut lp, &rig);
    for _ in 0..WINDOW_SIZE {
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }
    run_until(&mut lp, &rig, LoopState::Sleeping, 5);
    run_until(&mut lp, &rig, LoopState::WakeDevice, 3_100);
    assert!(rig.board.log.borrow().light_sleeps > 0);

    lp.request_active(false);
    // deactivation is only honored while sleeping
    assert_eq!(lp.state(), LoopState::WakeDevice);
    step(&mut lp, &rig, 120_000);
    run_until(&mut lp, &rig, LoopState::Inactive, 5);
    assert!(!lp.is_active());
}

#[test]
fn fast_cycles_fall_back_to_permanent_interval() {
    let rig = Rig::new();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    lp.set_tx_cycle(20, 1);
    assert_eq!(lp.tx_cycle(), 20);

    start_measuring(&mut lp, &rig);
    for _ in 0..WINDOW_SIZE {
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }
    run_until(&mut lp, &rig, LoopState::Sleeping, 5);

    assert_eq!(lp.tx_cycle(), 360);
    assert_eq!(lp.tx_cycle_count(), 0);

    lp.update_tx_cycle_time();
    assert_eq!(lp.tx_cycle(), 360);
}

#[test]
fn deep_sleep_restarts_the_device() {
    let rig = Rig::new();
    let config = LoopConfig {
        deep_sleep: true,
        ..LoopConfig::DEFAULT
    };
    let mut lp = rig.measurement_loop(config);
    start_measuring(&mut lp, &rig);
    for _ in 0..WINDOW_SIZE {
        rig.uart.inject_report(&report(10));
        step(&mut lp, &rig, 1);
    }
    run_until(&mut lp, &rig, LoopState::Sleeping, 5);

    // once the sensor is fully off the board sleeps until the next slot
    for _ in 0..20 {
        if !rig.board.log.borrow().deep_sleeps.is_empty() {
            break;
        }
        step(&mut lp, &rig, 10);
    }
    let slept = rig.board.log.borrow().deep_sleeps.clone();
    assert_eq!(slept.len(), 1);
    assert!(slept[0] >= 2_000);

    assert_eq!(lp.state(), LoopState::WakeDevice);
    assert!(lp.device().is_running());
    for _ in 0..60 {
        if lp.device().state() == DeviceState::Normal {
            break;
        }
        step(&mut lp, &rig, 10);
    }
    rig.uart.inject_report(&report(500));
    step(&mut lp, &rig, 1);
    assert_eq!(lp.state(), LoopState::Measuring);
}

#[test]
fn silent_sensor_aborts_at_wake_deadline() {
    let rig = Rig::new();
    let mut lp = rig.measurement_loop(LoopConfig::DEFAULT);
    lp.begin();
    step(&mut lp, &rig, 1);
    lp.request_active(true);
    assert_eq!(lp.state(), LoopState::WakeDevice);

    // the sensor powers up but never streams a report
    for _ in 0..100 {
        step(&mut lp, &rig, 10);
    }
    assert_eq!(lp.state(), LoopState::WakeDevice);
    assert_eq!(lp.device().state(), DeviceState::Normal);

    step(&mut lp, &rig, LoopConfig::DEFAULT.wake_timeout.as_u32());
    assert_eq!(lp.state(), LoopState::PowerDownDevice);
    assert!(!lp.batch_valid());
    assert_ne!(lp.device().state(), DeviceState::Normal);

    step(&mut lp, &rig, 10);
    assert!(rig.uplink.sent().is_empty());
    assert_eq!(cycles(&lp), vec![CycleOutcome::Skipped]);
    assert_eq!(lp.tx_cycle_count(), 9);

    // the wait outlasted the uplink interval, so the next cycle starts at once
    let entered: Vec<LoopState> = lp
        .history()
        .oldest_first()
        .filter_map(|record| match record.event {
            LoopEvent::Entered(state) => Some(state),
            LoopEvent::Cycle(_) => None,
        })
        .collect();
    assert_eq!(
        entered[entered.len() - 3..],
        [LoopState::Transmit, LoopState::Sleeping, LoopState::WakeDevice]
    );
    assert_eq!(lp.state(), LoopState::WakeDevice);
    step(&mut lp, &rig, 10);
    assert_eq!(lp.state(), LoopState::WakeDevice);
    assert!(rig.uplink.sent().is_empty());
}
