//! DebateWire CLI - socket debates between two AI speakers.
//!
//! `serve` hosts a session and holds configuration authority; `connect`
//! joins one and follows the configuration it receives.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use debatewire_core::{
    assign_display_names, bootstrap, session_wav_filename, Connection, DebateError, KokoroVoice,
    OpenAiModelClient, SessionCallback, SessionConfig, SessionEvent, SessionFile, Side,
    SideConfig, SilentVoice, SpokenTurn, TurnEngine, VoiceLink,
};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Receives block while the peer is generating or speaking; anything
/// beyond this is a stuck session.
const RECV_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(
    name = "debatewire",
    version,
    about = "Watch two AIs debate each other over a socket",
    long_about = "Hosts or joins a two-party AI debate over a single TCP connection, \
                  using OpenAI-compatible APIs for both speakers."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host a debate: accept one peer and hold configuration authority
    Serve(ServeArgs),
    /// Connect to a hosted debate and follow its configuration
    Connect(ConnectArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// The topic to debate (required unless --config is given)
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Session file (TOML) to load instead of flags
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model names for the two sides: local side first, then the peer
    #[arg(short, long, action = ArgAction::Append, value_name = "MODEL")]
    model: Vec<String>,

    /// Opinions for the two sides, in the same order as --model
    #[arg(long, action = ArgAction::Append, value_name = "OPINION")]
    opinion: Vec<String>,

    /// Personality flavour for the two sides (optional)
    #[arg(long, action = ArgAction::Append, value_name = "PERSONA")]
    persona: Vec<String>,

    /// Total number of utterances in the session
    #[arg(long, default_value = "9")]
    budget: u32,

    /// Remaining-message mark where the loser starts to waver (0 disables)
    #[arg(long, default_value = "2")]
    convince_time: u32,

    /// Remaining-message mark where the loser concedes outright
    #[arg(long, default_value = "1")]
    convince_time_definitive: u32,

    /// Temperature (0 - 2)
    #[arg(long, default_value = "1.0")]
    temperature: f32,

    /// Avoid repeating the same words (0 - 2)
    #[arg(long, default_value = "0.8")]
    frequency_penalty: f32,

    /// Avoid repeating the same arguments (0 - 2)
    #[arg(long, default_value = "0.5")]
    presence_penalty: f32,

    /// Which side opens the debate (random when omitted)
    #[arg(long, value_enum)]
    start: Option<SideArg>,

    /// Predetermined winner (defaults to the side that does not speak last)
    #[arg(long, value_enum)]
    winner: Option<SideArg>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "4670")]
    port: u16,

    /// Synthesize speech for every utterance and save a session WAV
    #[arg(long)]
    voice: bool,

    /// Voice ID for the local side
    #[arg(long, default_value = "bm_george")]
    server_voice: String,

    /// Voice ID for the peer side
    #[arg(long, default_value = "bf_emma")]
    client_voice: String,
}

#[derive(Args)]
struct ConnectArgs {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value = "4670")]
    port: u16,

    /// Synthesize speech for every utterance and save a session WAV
    #[arg(long)]
    voice: bool,

    /// Voice ID for the hosting side
    #[arg(long, default_value = "bm_george")]
    server_voice: String,

    /// Voice ID for this side
    #[arg(long, default_value = "bf_emma")]
    client_voice: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Server,
    Client,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Side {
        match side {
            SideArg::Server => Side::Server,
            SideArg::Client => Side::Client,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debatewire=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    match cli.command {
        Command::Serve(args) => run_serve(args, api_base, api_key).await,
        Command::Connect(args) => run_connect(args, api_base, api_key).await,
    }
}

async fn run_serve(
    args: ServeArgs,
    api_base: String,
    api_key: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = match args.start {
        Some(side) => side.into(),
        None => {
            if rand::random::<bool>() {
                Side::Server
            } else {
                Side::Client
            }
        }
    };

    let mut config = build_config(&args, start)?;
    config.validate()?;

    let model = OpenAiModelClient::new(api_base, api_key);
    assign_display_names(&model, &mut config).await?;
    print_header(&config);

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    println!(
        "{}",
        format!("Listening on {}:{}...", args.host, args.port).dimmed()
    );
    let (stream, addr) = listener.accept().await?;
    println!("{} {}", "Peer connected:".bold(), addr);
    println!("{}", "─".repeat(70).dimmed());

    let mut conn = Connection::new(stream).with_recv_timeout(RECV_TIMEOUT);
    bootstrap::accept_handshake(&mut conn, config.remote_config()).await?;

    let voice = make_voice(
        args.voice,
        &args.server_voice,
        &args.client_voice,
        &config.topic,
    )
    .await?;
    let mut engine =
        TurnEngine::server(conn, &config, Box::new(model), voice).with_callback(console_callback());

    let transcript = engine.run().await?;
    print_closing(&transcript);
    Ok(())
}

async fn run_connect(
    args: ConnectArgs,
    api_base: String,
    api_key: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    println!(
        "{}",
        format!("Connected to {}:{}", args.host, args.port).dimmed()
    );

    let mut conn = Connection::new(stream).with_recv_timeout(RECV_TIMEOUT);
    let reply = bootstrap::connect_handshake(&mut conn).await?;
    println!("{} {}", "Server says:".bold(), reply.message);
    println!(
        "{} {}",
        "Debating as:".bold(),
        reply.configuration.name.bright_cyan()
    );
    println!("{}", "─".repeat(70).dimmed());

    let model = OpenAiModelClient::new(api_base, api_key);
    let voice = make_voice(
        args.voice,
        &args.server_voice,
        &args.client_voice,
        &reply.configuration.topic,
    )
    .await?;
    let mut engine = TurnEngine::client(conn, &reply.configuration, Box::new(model), voice)
        .with_callback(console_callback());

    let transcript = engine.run().await?;
    print_closing(&transcript);
    Ok(())
}

fn build_config(args: &ServeArgs, start: Side) -> Result<SessionConfig, DebateError> {
    if let Some(path) = &args.config {
        return Ok(SessionFile::load(path)?.into_config(start));
    }

    let topic = args.topic.clone().ok_or_else(|| {
        DebateError::Config("a topic is required unless --config is given".to_string())
    })?;
    if args.model.len() != 2 {
        return Err(DebateError::Config(format!(
            "exactly 2 models are required (-m local -m peer), got {}",
            args.model.len()
        )));
    }
    if args.opinion.len() != 2 {
        return Err(DebateError::Config(format!(
            "exactly 2 opinions are required (--opinion twice), got {}",
            args.opinion.len()
        )));
    }

    Ok(SessionConfig {
        topic,
        server: SideConfig {
            model: args.model[0].clone(),
            opinion: args.opinion[0].clone(),
            persona: args.persona.first().cloned().unwrap_or_default(),
            name: None,
        },
        client: SideConfig {
            model: args.model[1].clone(),
            opinion: args.opinion[1].clone(),
            persona: args.persona.get(1).cloned().unwrap_or_default(),
            name: None,
        },
        starting_side: start,
        winner: args.winner.map(Side::from),
        budget: args.budget,
        convince_time: args.convince_time,
        convince_time_definitive: args.convince_time_definitive,
        sampling: debatewire_core::SamplingParams {
            temperature: args.temperature,
            frequency_penalty: args.frequency_penalty,
            presence_penalty: args.presence_penalty,
        },
    })
}

async fn make_voice(
    enabled: bool,
    server_voice: &str,
    client_voice: &str,
    topic: &str,
) -> Result<Box<dyn VoiceLink>, DebateError> {
    if enabled {
        let path = session_wav_filename(topic);
        Ok(Box::new(
            KokoroVoice::new(server_voice, client_voice, path).await?,
        ))
    } else {
        Ok(Box::new(SilentVoice))
    }
}

fn print_header(config: &SessionConfig) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  DebateWire".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), config.topic.bright_white());
    println!(
        "{} {} utterances, {} starts, winner: {}",
        "Session:".bold(),
        config.budget,
        config.starting_side,
        config.winner()
    );
    for side in [Side::Server, Side::Client] {
        let sc = config.side(side);
        println!(
            "  {} {} ({}) - using {}",
            "•".bright_cyan(),
            sc.name.as_deref().unwrap_or(side.label()).bright_cyan(),
            sc.opinion.yellow(),
            sc.model.dimmed()
        );
    }
    println!();
}

fn print_closing(transcript: &[SpokenTurn]) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  Debate concluded after {} utterances.", transcript.len())
            .bright_green()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
}

/// Create a callback that prints session events to the console.
fn console_callback() -> SessionCallback {
    Box::new(move |event| match event {
        SessionEvent::TurnStart { speaker, .. } => {
            println!("{} {}", "▶".bright_cyan(), speaker.bright_cyan().bold());
        }
        SessionEvent::Spoke { text, .. } | SessionEvent::Heard { text, .. } => {
            for line in textwrap(&text, 66).lines() {
                println!("  {line}");
            }
            println!();
        }
        SessionEvent::PersonalityShift { target } => {
            println!(
                "{}",
                format!("  ({target} is being talked around...)").bright_magenta()
            );
            println!();
        }
        SessionEvent::ClosingSoon => {
            println!("{}", "  (one exchange remains)".dimmed());
        }
        SessionEvent::SessionEnd { .. } => {
            // Handled by print_closing
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
