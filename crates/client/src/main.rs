//! Headless scan station.
//!
//! Each stdin line is replayed to the decoder as a scanner burst followed by
//! Enter. Lines starting with `:` are station commands:
//!
//! - `:start [location]`
//! - `:end`
//! - `:dismiss`
//! - `:manual <barcode> [note]`
//! - `:supplier <id> <name>` / `:clear-supplier` / `:material <barcode>`
//! - `:quit`

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use stocktake_client::{ClientConfig, ScanStation};
use stocktake_events::ActivityEvent;
use stocktake_scanning::{Key, KeyEvent, KeyOrigin};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("invalid station configuration")?;
    stocktake_observability::init_with(config.log_format);

    let station = ScanStation::connect(config)
        .await
        .context("failed to assemble scan station")?;
    let snapshot = station.boot().await.context("failed to boot scan station")?;
    tracing::info!(status = snapshot.status.name(), "Station ready");

    station.watch_activity(Arc::new(|event: &ActivityEvent| match event {
        ActivityEvent::Connected { .. } => tracing::info!("Activity feed connected"),
        ActivityEvent::ScanEvent(scan) => tracing::info!(
            drum = %scan.drum_id,
            user = %scan.user_id,
            status = %scan.scan_status,
            "Drum {} scanned ({})",
            scan.drum_id,
            scan.scan_type
        ),
    }));

    let mut dispatch = station.watch_dispatch();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while dispatch.changed().await.is_ok() {
            let status = dispatch.borrow_and_update().clone();
            if status.processed == printed {
                continue;
            }
            printed = status.processed;
            if let Some(last) = status.last {
                println!(
                    "[{}] {} (queued: {})",
                    if last.success { "ok" } else { "!!" },
                    last.message,
                    status.queued
                );
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.strip_prefix(':') {
            Some(command) => {
                if !run_command(&station, command).await {
                    break;
                }
            }
            None => replay_as_scanner(&station, line),
        }
    }

    station.shutdown().await;
    printer.abort();
    Ok(())
}

fn replay_as_scanner(station: &ScanStation, text: &str) {
    let start = Instant::now();
    let mut at = start;
    for c in text.chars() {
        station.key(KeyEvent::new(Key::Char(c), KeyOrigin::ScannerReceiver, at));
        at += Duration::from_millis(1);
    }
    station.key(KeyEvent::new(Key::Enter, KeyOrigin::ScannerReceiver, at));
}

/// Returns `false` on `:quit`.
async fn run_command(station: &ScanStation, command: &str) -> bool {
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    match name {
        "start" => match station.start_session(arg).await {
            Ok(session) => println!("Session {} started", session.name),
            Err(err) => println!("Could not start session: {}", err.user_message()),
        },
        "end" => match station.end_session().await {
            Ok(report) => {
                println!(
                    "Session {} ended after {}: {} scans ({} ok, {} failed)",
                    report.session_name,
                    report.duration_display(),
                    report.scan_count,
                    report.successful_scans,
                    report.failed_scans
                );
                println!(
                    "{} points, level {} ({} to next level)",
                    report.progression.total_points,
                    report.progression.level,
                    report.progression.points_to_next_level
                );
                if !report.synchronized {
                    println!("Warning: the server did not confirm the end of this session");
                }
            }
            Err(err) => println!("Could not end session: {}", err.user_message()),
        },
        "dismiss" => {
            if let Err(err) = station.dismiss_report() {
                println!("{}", err.user_message());
            }
            station.clear_error();
        }
        "manual" => {
            let (barcode, note) = rest
                .split_once(char::is_whitespace)
                .map(|(b, n)| (b, Some(n)))
                .unwrap_or((rest, None));
            let result = station.submit_manual(barcode, note).await;
            println!("{}", result.message);
        }
        "supplier" => match rest.split_once(char::is_whitespace) {
            Some((id, name)) => match station.set_supplier(id, name).await {
                Ok(ctx) => println!("Supplier set to {}", ctx.name),
                Err(err) => println!("{}", err.user_message()),
            },
            None => println!("usage: :supplier <id> <name>"),
        },
        "clear-supplier" => {
            if let Err(err) = station.clear_supplier().await {
                println!("{}", err.user_message());
            }
        }
        "material" => match station.material_scan(rest).await {
            Ok(scan) => println!("{} attributed to {}", scan.barcode, scan.supplier_name),
            Err(err) => println!("{}", err.user_message()),
        },
        "quit" | "q" => return false,
        other => println!("unknown command: {other}"),
    }
    true
}
