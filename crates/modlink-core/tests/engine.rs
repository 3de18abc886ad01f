//! Whole-link exchanges against the in-process simulator.

use pretty_assertions::assert_eq;
use std::time::Duration;

use modlink_core::protocol::{BypassControl, CommandOutcome, LinkConfig, LinkState};
use modlink_core::sim::SimulatedModule;

fn quick_config() -> LinkConfig {
    LinkConfig {
        reset_pulse: Duration::ZERO,
        boot_settle: Duration::ZERO,
        wake_pulse: Duration::ZERO,
        response_deadline: Duration::from_millis(200),
        ..LinkConfig::default()
    }
}

#[test]
fn start_reaches_ready_and_clears_boot_event() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    assert_eq!(link.state(), LinkState::Idle);

    link.start().unwrap();

    assert_eq!(link.state(), LinkState::Ready);
    assert_eq!(sim.reset_count(), 1);
    assert_eq!(sim.wake_count(), 1);
    // The boot event was retrieved during start-up, so nothing is pending.
    assert!(!link.is_event_pending());
    assert!(sim.received().ends_with(b"AT+EVENT?\n"));
}

#[test]
fn commands_reach_the_wire_verbatim() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();
    let before = sim.received().len();

    sim.script_response("AT+SEND1 hello world", &["OK"]);
    let outcome = link.send_command("AT+SEND1 hello world\n").unwrap();

    assert_eq!(outcome, CommandOutcome::Success(String::new()));
    assert_eq!(&sim.received()[before..], b"AT+SEND1 hello world\n");
}

#[test]
fn failure_lines_come_back_verbatim() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();

    sim.script_response("AT+CONNECT", &["ERR14 UNABLE TO CONNECT"]);
    let outcome = link.send_command("AT+CONNECT\n").unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Failure("ERR14 UNABLE TO CONNECT".to_string())
    );
}

#[test]
fn continuation_lines_are_exported_with_crlf() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();

    sim.script_response(
        "AT+CONF? Certificate pem",
        &[
            "OK3 pem",
            "-----BEGIN CERTIFICATE-----",
            "MIIBIjANBg",
            "-----END CERTIFICATE-----",
        ],
    );

    let mut exchange = link.begin_exchange();
    let outcome = exchange.send_command("AT+CONF? Certificate pem\n").unwrap();
    assert_eq!(outcome.continuation_count(), 3);

    let mut exported = Vec::new();
    let written = exchange
        .read_continuation_lines(outcome.continuation_count(), &mut exported)
        .unwrap();
    assert_eq!(written, 3);
    assert_eq!(
        String::from_utf8(exported).unwrap(),
        "-----BEGIN CERTIFICATE-----\r\nMIIBIjANBg\r\n-----END CERTIFICATE-----\r\n"
    );
}

#[test]
fn event_pin_is_level_not_edge() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();

    sim.push_event("6 0");
    // Reading the level twice reports pending both times.
    assert!(link.is_event_pending());
    assert!(link.is_event_pending());

    let outcome = link.send_command("AT+EVENT?\n").unwrap();
    assert_eq!(outcome, CommandOutcome::Success("6 0".to_string()));
    assert!(!link.is_event_pending());
}

#[test]
fn queued_events_drain_one_per_query() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();

    sim.push_event("6 0");
    sim.push_event("8 1");

    assert_eq!(
        link.send_command("AT+EVENT?\n").unwrap(),
        CommandOutcome::Success("6 0".to_string())
    );
    // Still pending until the queue is empty.
    assert!(link.is_event_pending());
    assert_eq!(
        link.send_command("AT+EVENT?\n").unwrap(),
        CommandOutcome::Success("8 1".to_string())
    );
    assert!(!link.is_event_pending());
}

#[test]
fn muted_module_yields_timeout_outcome() {
    let sim = SimulatedModule::new();
    let link = sim.connect(LinkConfig {
        response_deadline: Duration::from_millis(50),
        ..quick_config()
    });
    link.start().unwrap();

    sim.mute(true);
    let outcome = link.send_command("AT+PING\n").unwrap();
    assert_eq!(outcome, CommandOutcome::Timeout);

    // The link recovers once the module answers again.
    sim.mute(false);
    sim.script_response("AT+PING", &["OK"]);
    assert_eq!(
        link.send_command("AT+PING\n").unwrap(),
        CommandOutcome::Success(String::new())
    );
}

#[test]
fn bypass_forwards_both_directions_and_exits_on_sentinel() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();
    let before = sim.received().len();

    let mut session = link.enter_bypass();

    // Module-originated bytes drain to the host sink untouched.
    sim.inject_bytes(b"raw module traffic");
    let mut sink = Vec::new();
    let forwarded = session.pump_module(&mut sink).unwrap();
    assert_eq!(forwarded, sink.len());
    assert_eq!(sink, b"raw module traffic");

    // Host bytes pass straight through.
    assert_eq!(
        session.write_host(b"payload").unwrap(),
        BypassControl::Active
    );
    assert_eq!(&sim.received()[before..], b"payload");

    // The exit chunk itself is never transmitted, and anything the module
    // sends in the meantime is discarded on exit.
    sim.inject_line("leftover");
    assert_eq!(
        session.write_host(b"AT+EXIT\r").unwrap(),
        BypassControl::Exited
    );
    assert!(session.is_exited());
    assert_eq!(&sim.received()[before..], b"payload");
    drop(session);

    // Stale passthrough bytes were cleared on exit and the link is back in
    // command mode.
    sim.script_response("AT+PING", &["OK"]);
    assert_eq!(
        link.send_command("AT+PING\n").unwrap(),
        CommandOutcome::Success(String::new())
    );
}

#[test]
fn bypass_sentinel_spans_host_chunks() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();
    let before = sim.received().len();

    let mut session = link.enter_bypass();
    assert_eq!(session.write_host(b"dataAT+EX").unwrap(), BypassControl::Active);
    assert_eq!(session.write_host(b"IT").unwrap(), BypassControl::Active);
    assert_eq!(session.write_host(b"\n").unwrap(), BypassControl::Exited);

    // Only the pre-exit chunks went out.
    assert_eq!(&sim.received()[before..], b"dataAT+EXIT");

    // Writing after exit is an error.
    assert!(session.write_host(b"more").is_err());
}

#[test]
fn marked_diagnostic_commands_are_intercepted() {
    use modlink_core::protocol::DiagnosticOverride;

    struct CannedScan;
    impl DiagnosticOverride for CannedScan {
        fn intercept(&mut self, _command: &str) -> Option<String> {
            Some("OK1 canned".to_string())
        }
    }

    let sim = SimulatedModule::new();
    let mut link = sim.connect(quick_config());
    link.set_diagnostic_override(Box::new(CannedScan));
    link.start().unwrap();
    let before = sim.received().len();

    // A marked scan is answered by the override and never transmitted.
    let outcome = link
        .send_command("AT+DIAG WIFI SCAN simulated 5\n")
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::SuccessWithContinuation {
            count: 1,
            message: " canned".to_string(),
        }
    );
    assert_eq!(sim.received().len(), before);

    // An unmarked scan still goes to the module.
    let outcome = link.send_command("AT+DIAG WIFI SCAN 5\n").unwrap();
    assert_eq!(outcome.continuation_count(), 2);
    assert!(sim.received().ends_with(b"AT+DIAG WIFI SCAN 5\n"));
}

#[test]
fn wire_counters_accumulate() {
    let sim = SimulatedModule::new();
    let link = sim.connect(quick_config());
    link.start().unwrap();
    let after_start = link.counters();
    assert_eq!(after_start.commands, 1);

    sim.script_response("AT+PING", &["OK"]);
    link.send_command("AT+PING\n").unwrap();

    let counters = link.counters();
    assert_eq!(counters.commands, 2);
    assert_eq!(counters.rx_lines, after_start.rx_lines + 1);
    assert_eq!(counters.tx_bytes, after_start.tx_bytes + "AT+PING\n".len() as u64);
}
