use std::{
    io::{self, IsTerminal},
    time::{Duration, Instant},
};

use anyhow::Result;
use bramble_core::{init_tracing, BrambleConfig, Story};
use bramble_repl::repl::{LineProcessResult, MultiLineCollector, Repl, ReplNotifier};
use clap::{value_parser, Arg, Command};

/// One animation frame
const FRAME: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let matches = Command::new("bramble-repl")
        .version(bramble_core::VERSION)
        .about("Interactive shell for rendering and driving Bramble stories")
        .arg(
            Arg::new("story")
                .value_name("STORY")
                .help("Story JSON file to load")
                .index(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Engine configuration JSON file"),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .value_name("PASSAGE")
                .help("Passage to render first"),
        )
        .arg(
            Arg::new("speed")
                .long("speed")
                .value_name("X")
                .help("Scale elapsed time fed to live loops")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug mode")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("run-for")
                .long("run-for")
                .value_name("MS")
                .help("Run live loops for this long without a prompt, then print the document")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = match config_path {
        Some(path) => BrambleConfig::from_json_file(path)?,
        None => BrambleConfig::default(),
    };

    let story = match matches.get_one::<String>("story") {
        Some(path) => Story::from_json_file(path)?,
        None => Story::new("Start").with_passage("Start", Vec::new()),
    };

    if let Some(start) = matches.get_one::<String>("start") {
        config.start_passage = start.clone();
    } else if config_path.is_none() {
        config.start_passage = story.start.clone();
    }
    if let Some(speed) = matches.get_one::<f64>("speed") {
        config.speed_multiplier = *speed;
    }
    if matches.get_flag("debug") {
        config.debug = true;
    }
    let run_for = matches.get_one::<u64>("run-for").copied();

    println!("Bramble REPL v{}", bramble_core::VERSION);
    if config.debug {
        println!("Debug mode: enabled");
    }

    let mut repl = Repl::load(story, config)?;

    if let Some(millis) = run_for {
        return run_timed(&mut repl, Duration::from_millis(millis)).await;
    }

    println!("Type .help for help, .quit to exit");
    println!();
    repl.notifier().on_output(&repl.document_text());

    run_repl(&mut repl)
}

/// Drive live loops from a frame timer, then print the document
async fn run_timed(repl: &mut Repl, total: Duration) -> Result<()> {
    let mut interval = tokio::time::interval(FRAME);
    let started = Instant::now();
    let mut last = started;
    while started.elapsed() < total {
        interval.tick().await;
        let now = Instant::now();
        repl.engine_mut().tick(now - last);
        last = now;
    }
    repl.notifier().on_output(&repl.document_text());
    repl.show_exit_stats();
    Ok(())
}

fn run_repl(repl: &mut Repl) -> Result<()> {
    use rustyline::{error::ReadlineError, DefaultEditor};

    let mut rl = DefaultEditor::new()?;
    let mut multiline = MultiLineCollector::new();
    let is_interactive = io::stdin().is_terminal();

    while repl.is_running() {
        let prompt = multiline.get_prompt();

        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();

                // Handle empty input
                if trimmed.is_empty() && !multiline.is_collecting() {
                    continue;
                }

                // Check if it's a REPL command
                if trimmed.starts_with('.') && !multiline.is_collecting() {
                    rl.add_history_entry(&line)?;
                    if !is_interactive {
                        println!(">> {trimmed}");
                    }
                    match repl.parse_input(trimmed) {
                        Ok(command) => match repl.handle_command(command) {
                            Ok(output) => repl.notifier().on_output(&output),
                            Err(e) => repl.notifier().on_error(&format!("Error: {e}")),
                        },
                        Err(e) => repl.notifier().on_error(&format!("Error: {e}")),
                    }
                    continue;
                }

                // Process through multi-line collector
                match multiline.process_line(&line) {
                    LineProcessResult::Complete(code) => {
                        rl.add_history_entry(&code)?;

                        // Echo input in non-interactive mode
                        if !is_interactive {
                            println!(">> {code}");
                        }

                        match repl.execute(&code) {
                            Ok((output, duration)) => {
                                repl.notifier().on_result(&output, duration, repl.is_quiet());
                            }
                            Err(e) => repl.notifier().on_error(&format!("Error: {e}")),
                        }
                    }
                    LineProcessResult::NeedMore => {
                        // Continue collecting lines
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                if multiline.is_collecting() {
                    // Cancel multi-line collection
                    println!("^C");
                    multiline.reset();
                } else {
                    println!("Use .quit to exit");
                }
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    // Show exit statistics
    repl.show_exit_stats();

    Ok(())
}
