//! REPL (Read-Eval-Print Loop) functionality for Bramble
//!
//! This module wraps the rendering engine with an interactive shell:
//! - Command history and editing
//! - Multi-line JSON markup collection
//! - REPL commands (.help, .unblock, .click, .tick, ...)
//! - Output formatting and notifications

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use bramble_core::{
    BrambleConfig, DescriptorPatch, Document, Engine, Markup, Modification, Story, Tree,
};
use tracing::debug;

pub mod commands;
pub mod multiline;
pub mod notifier;

pub use commands::ReplCommand;
pub use multiline::{LineProcessResult, MultiLineCollector};
pub use notifier::{CapturingNotifier, DefaultNotifier, ReplNotifier};

/// Interactive shell around one engine and its story
pub struct Repl {
    /// Rendering engine, owning the document and story state
    engine: Engine,
    /// Current notifier for output
    notifier: Box<dyn ReplNotifier>,
    /// Whether the REPL is running
    running: bool,
    /// Quiet mode (suppress timing info)
    quiet: bool,
    /// Debug mode
    debug: bool,
}

impl Repl {
    /// Create a new REPL around an engine
    pub fn new(engine: Engine) -> Self {
        let debug = engine.config().debug;
        Self {
            engine,
            notifier: Box::new(DefaultNotifier::new()),
            running: true,
            quiet: false,
            debug,
        }
    }

    /// Build an engine over an in-memory document and render the configured
    /// start passage
    pub fn load(story: Story, config: BrambleConfig) -> Result<Self> {
        config.validate()?;
        let start = config.start_passage.clone();
        let mut engine = Engine::new(Box::new(Tree::new()), Box::new(story), config);
        engine.go_to(&start)?;
        Ok(Self::new(engine))
    }

    /// Set the notifier for this REPL
    pub fn set_notifier(&mut self, notifier: Box<dyn ReplNotifier>) {
        self.notifier = notifier;
    }

    /// Get a reference to the current notifier
    pub fn notifier(&self) -> &dyn ReplNotifier {
        self.notifier.as_ref()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Check if the REPL is still running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Set quiet mode
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Set debug mode
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Parse REPL input into a command
    pub fn parse_input(&self, input: &str) -> Result<ReplCommand> {
        commands::parse_command(input)
    }

    /// Plain text of the whole document
    pub fn document_text(&self) -> String {
        let doc = self.engine.document();
        doc.text_content(doc.root())
    }

    /// Document text, followed by the frame stack in debug mode
    fn report(&self) -> String {
        let text = self.document_text();
        if self.debug {
            format!("{text}\n--- stack ---\n{}", self.describe_stack())
        } else {
            text
        }
    }

    /// Handle a REPL command
    pub fn handle_command(&mut self, command: ReplCommand) -> Result<String> {
        match command {
            ReplCommand::Help => Ok(self.get_help_text()),
            ReplCommand::Quit => {
                self.running = false;
                Ok("Goodbye!".to_string())
            }
            ReplCommand::Quiet => {
                self.quiet = !self.quiet;
                Ok(format!("Quiet mode: {}", if self.quiet { "on" } else { "off" }))
            }
            ReplCommand::Debug => {
                self.debug = !self.debug;
                Ok(format!("Debug mode: {}", if self.debug { "on" } else { "off" }))
            }
            ReplCommand::Show => Ok(self.report()),
            ReplCommand::Html => {
                let doc = self.engine.document();
                Ok(doc.to_html(doc.root()))
            }
            ReplCommand::Unblock(value) => {
                if !self.engine.is_blocked() {
                    return Err(anyhow!("Nothing is waiting for input"));
                }
                self.engine.unblock(value);
                Ok(self.report())
            }
            ReplCommand::Click(name) => self.click(&name),
            ReplCommand::Tick(millis) => {
                let fired = self.engine.tick(Duration::from_millis(millis));
                Ok(format!("{fired} live loop(s) fired\n{}", self.report()))
            }
            ReplCommand::GoTo(passage) => {
                self.engine.go_to(&passage)?;
                Ok(self.report())
            }
            ReplCommand::Stack => Ok(self.describe_stack()),
        }
    }

    /// Click a named hook, or failing that a link whose text matches
    fn click(&mut self, name: &str) -> Result<String> {
        let mut fired = self.engine.fire_event_on_hook(name, "click");
        if fired == 0 {
            let doc = self.engine.document();
            let link = doc
                .descendants(doc.root())
                .into_iter()
                .find(|&node| doc.tag(node) == Some("tw-link") && doc.text_content(node) == name);
            if let Some(link) = link {
                fired = self.engine.fire_event(link, "click");
            }
        }
        if fired == 0 {
            return Err(anyhow!("Nothing clickable named '{name}'"));
        }
        debug!(target_name = name, fired, "clicked");
        Ok(self.report())
    }

    fn describe_stack(&self) -> String {
        let frames = self.engine.frames();
        if frames.is_empty() {
            return "Stack is empty".to_string();
        }
        frames
            .iter()
            .enumerate()
            .rev()
            .map(|(depth, frame)| {
                format!(
                    "#{depth} target={:?} blocked={:?} pending={} values={} scope={}",
                    frame.target.map(|node| node.0),
                    frame.blocked,
                    frame.pending(),
                    frame.blocked_values.len(),
                    frame.scope.name(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render a JSON markup fragment (one node or an array) appended to the
    /// passage and return the document text with timing
    pub fn execute(&mut self, code: &str) -> Result<(String, u64)> {
        let start = Instant::now();
        let json: serde_json::Value = serde_json::from_str(code)?;
        let source: Vec<Markup> = if json.is_array() {
            serde_json::from_value(json)?
        } else {
            vec![serde_json::from_value(json)?]
        };

        if self.engine.is_blocked() {
            self.notifier
                .on_output("Rendering is suspended; the fragment will render after .unblock");
        }
        self.engine.when_unblocked(move |engine| {
            let root = engine.document().root();
            let patch = DescriptorPatch {
                append_mode: Some(bramble_core::AppendMode::Append),
                ..Default::default()
            };
            engine.render_into(source, Some(root), Modification::Patch(patch), None);
        });

        let duration = start.elapsed().as_millis() as u64;
        Ok((self.report(), duration))
    }

    /// Get help text
    fn get_help_text(&self) -> String {
        r#"Bramble REPL Commands:
  .help              - Show this help message
  .quit              - Exit the REPL
  .quiet             - Toggle quiet mode (hide timing info)
  .debug             - Toggle debug mode (print the frame stack after each result)
  .show              - Print the document text
  .html              - Print the document as HTML
  .stack             - Show the frame stack

Engine Commands:
  .unblock [json]    - Resume a suspended render, optionally with a value
  .click <name>      - Click a named hook (or a link by its text)
  .tick <ms>         - Advance live loops by this many milliseconds
  .goto <passage>    - Navigate to a passage

Anything else is read as JSON markup (one node or an array of nodes)
and rendered at the end of the passage. Brackets may span lines."#
            .to_string()
    }

    /// Print session statistics
    pub fn show_exit_stats(&self) {
        let story = self.engine.story();
        self.notifier.on_output(&format!(
            "Turns: {}, current passage: {}, enchantments: {}, live loops: {}",
            story.turns(),
            story.current().unwrap_or("(none)"),
            self.engine.enchantment_count(),
            self.engine.live_loop_count(),
        ));
    }
}
