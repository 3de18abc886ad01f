//! End-to-end session against the in-process simulator: start the link,
//! issue a few commands, retrieve a multi-line scan, and push a small
//! firmware image.
//!
//! Run with `cargo run --example sim_session`.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use modlink_core::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let sim = SimulatedModule::new();
    let link = sim.connect(LinkConfig {
        // No real hardware to settle.
        reset_pulse: Duration::ZERO,
        boot_settle: Duration::ZERO,
        wake_pulse: Duration::ZERO,
        response_deadline: Duration::from_secs(2),
        ..LinkConfig::default()
    });
    link.start()?;

    match link.send_command("AT+CONF? Version\n")? {
        CommandOutcome::Success(version) => println!("module firmware: {version}"),
        other => println!("version query failed: {other:?}"),
    }

    // Multi-line responses stay on one exchange lock hold.
    let mut exchange = link.begin_exchange();
    if let CommandOutcome::SuccessWithContinuation { count, message } =
        exchange.send_command("AT+DIAG WIFI SCAN 2\n")?
    {
        println!("scan:{message}");
        let mut listing = Vec::new();
        exchange.read_continuation_lines(count, &mut listing)?;
        print!("{}", String::from_utf8_lossy(&listing));
    }
    drop(exchange);

    // Stream a small firmware image.
    let image = vec![0x5au8; 6144];
    link.transfer_firmware(
        Cursor::new(image.clone()),
        image.len() as u64,
        &TransferOptions {
            settle: Duration::ZERO,
            progress_stride: 1,
            ..TransferOptions::default()
        },
        |percent| println!("transfer {percent:5.1}%"),
    )?;

    let counters = link.counters();
    println!(
        "session done: {} commands, {} bytes out, {} lines in",
        counters.commands, counters.tx_bytes, counters.rx_lines
    );
    Ok(())
}
