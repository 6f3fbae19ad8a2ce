use anyhow::{Context, Result, anyhow};
use loopstation::{EngineConfig, Looper};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const LOG_FILE: &str = "loopstation.log";

fn print_help() {
    println!("Loopstation - multi-track live audio looper");
    println!();
    println!("USAGE:");
    println!("    loopstation [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    --debug               Log at debug level");
    println!("    --config <FILE>       Engine settings (TOML)");
    println!("    --project <FILE>      Project to load on start (JSON)");
    println!();
    println!("COMMANDS (one per line on stdin):");
    println!("    play                  Play, or resume when paused");
    println!("    pause                 Pause, keeping the position");
    println!("    stop                  Stop and rewind");
    println!("    record                Record, overdub, or finish a take");
    println!("    add <wav>             Add a track");
    println!("    remove <wav>          Remove a track");
    println!("    load <json>           Load a project");
    println!("    write <json>          Save the project");
    println!("    status                Show state, cursor and tracks");
    println!("    quit                  Stop everything and exit");
    println!();
    println!("Log output goes to {}.", LOG_FILE);
}

struct Args {
    debug: bool,
    config: Option<PathBuf>,
    project: Option<PathBuf>,
}

fn parse_args() -> Result<Option<Args>> {
    let mut parsed = Args {
        debug: false,
        config: None,
        project: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--debug" => parsed.debug = true,
            "--config" => {
                parsed.config =
                    Some(args.next().ok_or_else(|| anyhow!("--config needs a file"))?.into())
            }
            "--project" => {
                parsed.project =
                    Some(args.next().ok_or_else(|| anyhow!("--project needs a file"))?.into())
            }
            other => return Err(anyhow!("Unknown argument: {}", other)),
        }
    }
    Ok(Some(parsed))
}

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let file = File::create(LOG_FILE).with_context(|| format!("creating {}", LOG_FILE))?;
    WriteLogger::init(level, config, file)?;
    Ok(())
}

fn print_status(looper: &Looper) {
    let met = looper.metronome();
    println!(
        "{}  cursor {}  beat {}/{}  overflows {}",
        looper.state(),
        looper.audio_cursor(),
        met.current_beat(looper.audio_cursor(), looper.config().sample_rate),
        met.beats,
        looper.capture_overflows()
    );
    for (i, track) in looper.tracks().iter().enumerate() {
        println!(
            "  {:>2}: {}  {} frames  slip {}  vol {}%",
            i,
            track.file_name.display(),
            track.samples,
            track.fx.slip,
            track.fx.volume_percent()
        );
    }
    if let Some(path) = looper.last_recording() {
        println!("  last take: {}", path.display());
    }
}

/// Run one command line; returns false on quit
fn dispatch(looper: &mut Looper, line: &str) -> bool {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let argument = parts.next().map(str::trim).filter(|a| !a.is_empty());

    let result = match (command, argument) {
        ("", _) => Ok(()),
        ("play", None) => looper.play(),
        ("pause", None) => looper.pause(),
        ("stop", None) => looper.stop(),
        ("record", None) => looper.record(),
        ("add", Some(path)) => looper.add_track(path),
        ("remove", Some(path)) => looper.remove_track(path),
        ("load", Some(path)) => looper.load(path),
        ("write", Some(path)) => looper.write(path).map(|written| {
            println!("wrote {}", written.display());
        }),
        ("status", None) => {
            print_status(looper);
            Ok(())
        }
        ("quit", None) | ("exit", None) => return false,
        _ => {
            println!("unknown command: {} (see --help)", line);
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{}: {}", command, e);
        println!("error: {}", e);
    }
    true
}

fn handle_events(looper: &mut Looper) {
    for event in looper.poll_events() {
        if looper.needs_recovery(&event)
            && let Err(e) = looper.recover_playback()
        {
            log::error!("Could not restart playback: {}", e);
            println!("error: playback stopped: {}", e);
        }
    }
}

fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        print_help();
        return Ok(());
    };
    init_logging(args.debug)?;

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut looper = Looper::new(config)?;
    if let Some(project) = &args.project {
        looper
            .load(project)
            .with_context(|| format!("loading project {}", project.display()))?;
    }

    println!("Loopstation ready. Type a command, or `quit`.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}> ", looper.state());
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        handle_events(&mut looper);
        if !dispatch(&mut looper, line?.trim()) {
            break;
        }
        handle_events(&mut looper);
    }

    looper.shutdown();
    println!("Loopstation stopped.");
    Ok(())
}
