//! Terminal demo for race-arena
//!
//! Runs an in-process room with bot participants, draws the race as text
//! bars, then plays a quick rematch.
//!
//! ```sh
//! RUST_LOG=race_arena=debug cargo run --example tui
//! ```

use race_arena::{
    GameMode, LocalBackend, RaceResults, RaceSession, RacerView, RematchKind, SessionConfig,
    SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BOTS: [&str; 3] = ["Bolt", "Comet", "Dash"];
const BAR_WIDTH: usize = 50;

fn render(elapsed_ms: u64, racers: &[RacerView]) {
    println!("--- {:>5.1}s", elapsed_ms as f64 / 1000.0);
    for racer in racers {
        let filled = ((racer.position / 100.0) * BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(BAR_WIDTH);
        let rank = racer
            .rank
            .map(|r| format!(" #{r}"))
            .unwrap_or_default();
        println!(
            "{:>2} |{}{}| {:?}{}",
            racer.id,
            "=".repeat(filled),
            " ".repeat(BAR_WIDTH - filled),
            racer.status,
            rank
        );
    }
}

fn print_results(results: &RaceResults) {
    println!("\nResults:");
    for view in &results.standings {
        println!(
            "  #{} racer {} ({:.1}s)",
            view.rank.unwrap_or_default(),
            view.id,
            view.finish_time.unwrap_or_default() as f64 / 1000.0
        );
    }
}

async fn race(host: &RaceSession) -> Result<(), Box<dyn std::error::Error>> {
    host.start_game().await?;
    let mut frame = 0u64;
    while let Some(event) = host.recv().await {
        match event {
            SessionEvent::CountdownTick(n) => println!("{n}..."),
            SessionEvent::RaceStarted { .. } => println!("Go!"),
            SessionEvent::Frame { elapsed_ms, racers } => {
                frame += 1;
                if frame % 30 == 0 {
                    render(elapsed_ms, &racers);
                }
            }
            SessionEvent::RaceFinished(results) => {
                print_results(&results);
                return Ok(());
            }
            SessionEvent::Removed(message) | SessionEvent::Error(message) => {
                return Err(message.into());
            }
            _ => {}
        }
    }
    Err("session closed".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,race_arena=info".into()),
        )
        .with_target(false)
        .init();

    println!("race-arena TUI Example");
    println!("======================\n");

    let backend = LocalBackend::new();
    let config = SessionConfig::new();

    let host = RaceSession::create(
        Arc::new(backend.service("you")),
        config.clone(),
        "You",
        BOTS.len() + 1,
        GameMode::FreeForAll,
    )
    .await?;
    println!("Room code: {}", host.code());
    host.select_racer(0).await?;

    let mut bots = Vec::new();
    for (i, name) in BOTS.iter().enumerate() {
        let bot = RaceSession::join(
            Arc::new(backend.service(name.to_lowercase())),
            config.clone(),
            host.code(),
            name,
        )
        .await?;
        bot.select_racer(i as u32 + 1).await?;
        bot.toggle_ready().await?;
        println!("{name} joined on racer {}", i + 1);
        bots.push(bot);
    }
    // Let the bots' choices reach the host's view of the room.
    tokio::time::sleep(Duration::from_millis(200)).await;

    race(&host).await?;

    println!("\nQuick rematch!\n");
    host.rematch(RematchKind::Quick).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    race(&host).await?;

    for bot in &bots {
        bot.leave().await?;
    }
    host.leave().await?;
    println!("\nBye!");
    Ok(())
}
