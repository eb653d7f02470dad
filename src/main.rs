// ── hlsf — interactive shell ───────────────────────────────────────────────
// Thin REPL over the command dispatcher. All engine behavior lives in the
// library; this binary parses startup flags, wires the state, and loops.

use clap::Parser;
use hlsf::commands::dispatch;
use hlsf::EngineState;
use log::error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hlsf",
    about = "HLSF semantic-field engine shell",
    version
)]
struct Args {
    /// Path to the durable store (defaults to the platform data dir).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Manifest URL to load into the remote chunk store at startup.
    #[arg(long, env = "HLSF_MANIFEST")]
    manifest: Option<String>,

    /// Performance profile to apply at startup (low|balanced|high|max).
    #[arg(long)]
    profile: Option<String>,

    /// Run a single command line and exit.
    #[arg(long)]
    exec: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let state = match &args.db {
        Some(path) => EngineState::open_at(path),
        None => EngineState::open_default(),
    }
    .map_err(|e| e.to_string())?;

    if let Some(profile) = &args.profile {
        if !state.apply_profile(profile) {
            return Err(format!("unknown profile {profile:?}"));
        }
    }
    if let Some(url) = &args.manifest {
        match dispatch(&state, &format!("/loaddb {url}")).await {
            Ok(out) => println!("{out}"),
            Err(e) => error!("[main] Manifest load failed: {e}"),
        }
    }

    if let Some(line) = &args.exec {
        match dispatch(&state, line).await {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("error: {e}"),
        }
        return Ok(());
    }

    println!("hlsf shell — /help for commands, ctrl-d to exit");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("hlsf> ");
        stdout.flush().ok();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("[main] stdin read failed: {e}");
                break;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        match dispatch(&state, line).await {
            Ok(out) => {
                if !out.is_empty() {
                    println!("{out}");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
