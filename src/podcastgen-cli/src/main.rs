//! PodcastGen CLI - scripted podcast generation
//!
//! A command-line tool that turns `[SPEAKER|emotion] text` scripts into a
//! finished podcast episode.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use podcastgen_core::config::Config;
use podcastgen_core::pipeline::synthesizer_from_config;
use podcastgen_core::script_gen::{
    ChatScriptConfig, ChatScriptGenerator, FallbackScriptGenerator, TemplateScriptGenerator,
};
use podcastgen_core::{
    FailureMode, GenerationEvent, GenerationRequest, PodcastError, PodcastGenerator, ProsodyTable,
    ScriptGenerator, ScriptRequirements, Tone, script,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "podcastgen",
    version,
    about = "PodcastGen - Turn tagged scripts into podcast episodes",
    long_about = "A CLI tool that synthesizes [SPEAKER|emotion] scripts with per-emotion prosody, \
                  assembles the clips and masters the result."
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an episode from a script file or a topic
    Generate(GenerateArgs),
    /// Parse a script and print statistics without synthesizing
    Validate {
        /// Script file to check
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the known emotions and their prosody
    Emotions,
    /// List the default voice roster
    Voices,
    /// Write a script for a topic and print it
    Script {
        #[command(flatten)]
        topic: TopicArgs,
    },
}

#[derive(Args)]
struct TopicArgs {
    /// Topic to write the episode about
    #[arg(long, value_name = "TEXT")]
    topic: Option<String>,

    /// Target duration in minutes
    #[arg(long, default_value = "5", value_name = "MINUTES")]
    duration: u32,

    /// professional, casual, educational or entertaining
    #[arg(long, default_value = "professional", value_name = "TONE")]
    tone: Tone,

    /// A point the episode must cover (repeatable)
    #[arg(long = "key-point", action = ArgAction::Append, value_name = "POINT")]
    key_points: Vec<String>,

    /// Target locale, e.g. es-ES (defaults to the configured language)
    #[arg(long, value_name = "LOCALE")]
    language: Option<String>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Script file in [SPEAKER|emotion] format
    #[arg(long, value_name = "FILE", conflicts_with = "topic", required_unless_present = "topic")]
    script: Option<PathBuf>,

    #[command(flatten)]
    topic: TopicArgs,

    /// Voice override for a speaker label (repeatable)
    #[arg(long, action = ArgAction::Append, value_name = "LABEL=VOICE", value_parser = parse_voice)]
    voice: Vec<(String, String)>,

    /// Skip the mastering chain
    #[arg(long)]
    no_mastering: bool,

    /// Skip failed segments instead of aborting
    #[arg(long)]
    best_effort: bool,

    /// Output file (defaults to podcast_<timestamp>.<ext>)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn parse_voice(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((label, voice)) if !label.trim().is_empty() && !voice.trim().is_empty() => {
            Ok((label.trim().to_string(), voice.trim().to_string()))
        }
        _ => Err(format!("expected LABEL=VOICE, got '{value}'")),
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let PodcastError::Synthesis { failed, .. } = &e {
            eprintln!("  failed segments: {:?}", failed);
        }
        std::process::exit(if matches!(e, PodcastError::Cancelled) { 130 } else { 1 });
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("podcastgen_core={default},podcastgen={default}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), PodcastError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            Config::load(path)?
        }
        None => podcastgen_core::default_config(),
    };
    apply_env(&mut config);
    tracing::debug!(
        provider = %config.synthesis.provider,
        synthesis_key = config.synthesis.api_key.is_some(),
        script_key = config.script.api_key.is_some(),
        "configuration ready"
    );

    match cli.command {
        Command::Generate(args) => generate(config, args).await,
        Command::Validate { file, json } => validate(&config, &file, json),
        Command::Emotions => {
            list_emotions();
            Ok(())
        }
        Command::Voices => {
            list_voices(&config);
            Ok(())
        }
        Command::Script { topic } => {
            let requirements = requirements(&config, &topic)?;
            let generator = script_generator(&config);
            let text = generator.generate(&requirements).await?;
            // parse so a broken script is reported here rather than at generation
            script::parse_with(&text, &config.parser_options())?;
            println!("{}", text);
            Ok(())
        }
    }
}

/// Fill API settings the config file left empty from the environment.
fn apply_env(config: &mut Config) {
    if config.synthesis.api_key.is_none() {
        config.synthesis.api_key = env::var("PODCASTGEN_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok();
    }
    if let Ok(base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.script.api_base = base;
    }
    if config.script.api_key.is_none() {
        config.script.api_key = env::var("OPENAI_API_KEY").ok();
    }
}

fn requirements(config: &Config, args: &TopicArgs) -> Result<ScriptRequirements, PodcastError> {
    let topic = args
        .topic
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PodcastError::Validation("a --topic is required".to_string()))?;

    Ok(ScriptRequirements {
        topic,
        duration_minutes: args.duration.max(1),
        tone: args.tone,
        key_points: args.key_points.clone(),
        language: args
            .language
            .clone()
            .unwrap_or_else(|| config.voices.language.clone()),
    })
}

fn script_generator(config: &Config) -> Arc<dyn ScriptGenerator> {
    let Some(api_key) = config.script.api_key.clone() else {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set, using template script generation.".yellow()
        );
        return Arc::new(TemplateScriptGenerator);
    };

    let chat = ChatScriptGenerator::new(ChatScriptConfig {
        api_base: config.script.api_base.clone(),
        api_key,
        model: config.script.model.clone(),
        max_tokens: config.script.max_tokens,
    });
    match chat {
        Ok(chat) => Arc::new(FallbackScriptGenerator::new(chat)),
        Err(e) => {
            eprintln!("{}", format!("Warning: {e}, using templates.").yellow());
            Arc::new(TemplateScriptGenerator)
        }
    }
}

async fn generate(config: Config, args: GenerateArgs) -> Result<(), PodcastError> {
    let mut request = match &args.script {
        Some(path) => GenerationRequest::from_text(std::fs::read_to_string(path)?),
        None => GenerationRequest::from_topic(requirements(&config, &args.topic)?),
    };
    for (label, voice) in args.voice {
        request = request.with_voice(label, voice);
    }
    if args.no_mastering {
        request = request.with_mastering(false);
    }
    if args.best_effort {
        request = request.with_failure_mode(FailureMode::BestEffort);
    }

    print_rule();
    println!("{}", "  PodcastGen".bright_blue().bold());
    print_rule();
    println!(
        "{} {} ({})",
        "Provider:".bold(),
        config.synthesis.provider.to_string().bright_white(),
        config.synthesis.output_format()
    );
    println!();

    let synthesizer = synthesizer_from_config(&config).await?;
    let mut generator =
        PodcastGenerator::new(config.clone(), synthesizer).with_callback(create_console_callback());
    if args.script.is_none() {
        generator = generator.with_script_generator(script_generator(&config));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\nCancelling...".yellow());
            on_interrupt.cancel();
        }
    });

    let output = generator.generate(request, &cancel).await?;

    let path = args
        .output
        .unwrap_or_else(|| PathBuf::from(output.file_name()));
    std::fs::write(&path, output.audio.bytes())?;
    tracing::info!(
        path = %path.display(),
        bytes = output.audio.len(),
        duration_ms = output.duration_ms,
        "episode written"
    );

    println!();
    for warning in &output.warnings {
        println!("{} {}", "Warning:".yellow().bold(), warning);
    }
    print_rule();
    println!(
        "{} {} ({:.1}s, {} segments{})",
        "  Saved".bright_green().bold(),
        path.display().to_string().bright_white(),
        output.duration_ms as f64 / 1000.0,
        output.segments,
        if output.mastered { ", mastered" } else { "" }
    );
    println!("  script sha256 {}", output.script_hash.dimmed());
    print_rule();
    Ok(())
}

fn validate(config: &Config, file: &Path, json: bool) -> Result<(), PodcastError> {
    tracing::info!(path = %file.display(), "validating script");
    let text = std::fs::read_to_string(file)?;
    let stats = script::validate_with(&text, &config.parser_options())?;

    if json {
        let rendered = serde_json::to_string_pretty(&stats)
            .map_err(|e| PodcastError::Validation(format!("Failed to render statistics: {}", e)))?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("{} {}", "Script:".bold(), file.display());
    println!("  segments   {}", stats.total_segments);
    println!("  words      {}", stats.total_words);
    println!("  duration   ~{:.1} min", stats.estimated_duration_minutes);
    println!();
    println!("{}", "Speakers:".bold());
    for (speaker, s) in &stats.speakers {
        println!(
            "  {:<12} {} segments, {} words",
            speaker.bright_cyan(),
            s.segments,
            s.words
        );
    }
    println!();
    println!("{}", "Emotions:".bold());
    for (emotion, count) in &stats.emotions {
        println!("  {:<14} {}", emotion, count);
    }

    let unknown = stats.unrecognized_emotions(ProsodyTable::shared());
    if !unknown.is_empty() {
        println!();
        println!(
            "{} unrecognized emotions will use neutral prosody: {}",
            "Note:".yellow().bold(),
            unknown.join(", ")
        );
    }
    Ok(())
}

fn list_emotions() {
    println!("{}", "Emotions:".bold());
    for info in ProsodyTable::shared().list() {
        println!(
            "  {:<14} {:<28} {}",
            info.name.bright_cyan(),
            info.prosody.to_string().dimmed(),
            info.description
        );
    }
    println!();
    println!(
        "  {:<14} detect from the line's wording",
        podcastgen_core::prosody::AUTO_EMOTION.bright_cyan()
    );
}

fn list_voices(config: &Config) {
    let roster = config.roster();
    println!(
        "{} {}",
        "Voice roster for".bold(),
        config.synthesis.provider.to_string().bold()
    );
    for (role, voice) in roster.roles() {
        println!("  {:<10} {}", role.bright_cyan(), voice);
    }
    println!("  {:<10} {}", "(other)".dimmed(), roster.fallback());
}

fn print_rule() {
    println!("{}", "═".repeat(70).bright_blue());
}

/// Create a callback that prints generation events to the console.
fn create_console_callback() -> Box<dyn Fn(GenerationEvent) + Send + Sync> {
    Box::new(move |event| match event {
        GenerationEvent::ScriptGenerated { generator, chars } => {
            println!("{} script written by {} ({} chars)", "▶".bright_cyan(), generator, chars);
        }
        GenerationEvent::ScriptParsed {
            segments,
            words,
            estimated_minutes,
        } => {
            println!(
                "{} {} segments, {} words, ~{:.1} min",
                "▶".bright_cyan(),
                segments,
                words,
                estimated_minutes
            );
        }
        GenerationEvent::VoicesResolved { voices } => {
            for (speaker, voice) in voices {
                println!("  {} {}", speaker.bright_cyan(), voice.dimmed());
            }
        }
        GenerationEvent::SegmentSynthesized { index, duration_ms } => {
            println!(
                "  {} segment {} ({:.1}s)",
                "✓".green(),
                index,
                duration_ms as f64 / 1000.0
            );
        }
        GenerationEvent::SegmentFailed { index, message } => {
            println!("  {} segment {}: {}", "✗".red(), index, message);
        }
        GenerationEvent::Assembled { duration_ms, bytes } => {
            println!(
                "{} assembled {:.1}s ({} bytes)",
                "▶".bright_cyan(),
                duration_ms as f64 / 1000.0,
                bytes
            );
        }
        GenerationEvent::Mastered { .. } => {
            println!("{} mastered", "▶".bright_cyan());
        }
        GenerationEvent::MasteringFailed { message } => {
            println!("{} mastering skipped: {}", "!".yellow(), message);
        }
        GenerationEvent::Finished { .. } => {
            // Handled in generate
        }
    })
}
