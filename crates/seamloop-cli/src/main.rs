//! seamloop CLI — loop one audio file without gaps.
//!
//! usage: seamloop <file> [options]
//!
//!   --volume <0-100>     Initial volume
//!   --speed <x>          Initial playback speed
//!   --increment <x>      Speed added at every loop boundary
//!   --loops <n>          Stop after n loops (default: forever)
//!   --config <file>      PlayerConfig JSON; flags override it

use std::time::Duration;

use seamloop_core::{LoopPlayer, PlayerConfig, Resource};

/// How long to wait for one loop before checking the player again.
const POLL: Duration = Duration::from_millis(250);

struct Options {
    file: String,
    config: PlayerConfig,
    loops: Option<u64>,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        print_usage();
        return;
    }

    let options = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(options) {
        eprintln!("seamloop: {}", e);
        std::process::exit(1);
    }
}

fn run(options: Options) -> seamloop_core::Result<()> {
    let backend = seamloop_core::backend::native::NativeBackend::new()?;
    let player = LoopPlayer::with_config(
        std::sync::Arc::new(backend),
        Resource::from_path(&options.file),
        &options.config,
    )?;
    player.start()?;

    let status = player.status();
    println!("looping {}  speed {:.2}  vol {}%", status.resource, status.speed, (status.volume * 100.0) as u32);

    let mut seen = 0;
    loop {
        if let Some(limit) = options.loops {
            if seen >= limit {
                break;
            }
        }
        if !player.wait_for_loops(seen + 1, POLL) {
            let status = player.status();
            if let Some(fault) = status.fault.filter(|_| !status.playing) {
                log::error!("seamloop: stopped: {}", fault);
                break;
            }
            continue;
        }

        let status = player.status();
        seen = status.loops;
        print_progress(seen, status.speed);
    }
    println!();

    player.close();
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut file = None;
    let mut config = None;
    let mut volume = None;
    let mut speed = None;
    let mut increment = None;
    let mut loops = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--volume" => volume = Some(parse_value::<u32>(arg, iter.next())?),
            "--speed" => speed = Some(parse_value::<f32>(arg, iter.next())?),
            "--increment" => increment = Some(parse_value::<f32>(arg, iter.next())?),
            "--loops" => loops = Some(parse_value::<u64>(arg, iter.next())?),
            "--config" => {
                let path = iter.next().ok_or("missing value for --config")?;
                config = Some(
                    PlayerConfig::from_json_file(path)
                        .map_err(|e| format!("config {}: {}", path, e))?,
                );
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            path => {
                if file.replace(path.to_string()).is_some() {
                    return Err("only one file can be looped".into());
                }
            }
        }
    }

    let mut config = config.unwrap_or_default();
    if let Some(v) = volume {
        config.volume = v.min(100) as f32 / 100.0;
    }
    if let Some(s) = speed {
        config.speed = s;
    }
    if let Some(d) = increment {
        config.speed_increment = d;
    }

    Ok(Options {
        file: file.ok_or("missing file")?,
        config,
        loops,
    })
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing value for {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, value))
}

fn print_progress(loops: u64, speed: f32) {
    print!("\r  loop {}  speed {:.2}    ", loops, speed);
    use std::io::Write;
    std::io::stdout().flush().ok();
}

fn print_usage() {
    println!("seamloop - gapless audio looper");
    println!();
    println!("usage: seamloop <file> [options]");
    println!();
    println!("options:");
    println!("  --volume <0-100>     Initial volume");
    println!("  --speed <x>          Initial playback speed");
    println!("  --increment <x>      Speed added at every loop boundary");
    println!("  --loops <n>          Stop after n loops (default: forever)");
    println!("  --config <file>      PlayerConfig JSON; flags override it");
}
