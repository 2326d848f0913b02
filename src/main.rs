use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::EnvFilter;

use flow_assistant::audio::{
    AudioSink, CaptureSource, CpalCapture, CpalPlayback, f32_to_pcm16, pcm16_to_f32, rms,
    samples_to_wav,
};
use flow_assistant::config::file::{config_file_path, store_api_key};
use flow_assistant::{
    Assistant, Collaborators, Config, ConsoleStatus, CpalDevices, FlowTokenClient, LocalTimer,
    SessionSettings, SessionState, StatusSink, TokenProvider, WebSocketConnector,
};

/// Flow Assistant - realtime voice conversations with a Flow agent
#[derive(Parser)]
#[command(name = "flow-assistant", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Also save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Store the API key in the config file
    SetKey {
        /// Flow API key
        key: String,
    },
    /// Exchange the API key for a session token and report the result
    Token,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,flow_assistant=info",
        1 => "info,flow_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => {
                tokio::task::spawn_blocking(move || test_mic(duration, output.as_deref()))
                    .await?
            }
            Command::TestSpeaker => tokio::task::spawn_blocking(test_speaker).await?,
            Command::SetKey { key } => set_key(&key),
            Command::Token => check_token().await,
        };
    }

    let mut config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let tokens = token_client(&mut config)?;
    let settings = SessionSettings::from(&config);

    let status: Arc<dyn StatusSink> = Arc::new(ConsoleStatus);
    let assistant = Assistant::new(
        settings,
        Collaborators {
            tokens: Arc::new(tokens),
            connector: Arc::new(WebSocketConnector::default()),
            devices: Arc::new(CpalDevices),
            tools: Arc::new(LocalTimer::new(Arc::clone(&status))),
            status,
        },
    );

    tokio::time::sleep(config.session.start_delay).await;
    assistant.start().await;

    let mut state = assistant.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted, stopping");
            assistant.stop().await;
        }
        _ = state.wait_for(|s| *s == SessionState::Idle) => {}
    }

    if let Some(error) = assistant.last_error() {
        anyhow::bail!("session failed: {error}");
    }
    Ok(())
}

fn token_client(config: &mut Config) -> anyhow::Result<FlowTokenClient> {
    let api_key: SecretString = config.api_key.take().context(
        "no API key configured; set FLOW_API_KEY or run `flow-assistant set-key <KEY>`",
    )?;
    Ok(FlowTokenClient::new(
        config.token_url.clone(),
        api_key,
        config.token_ttl,
    )?)
}

/// Store the API key with owner-only permissions
fn set_key(key: &str) -> anyhow::Result<()> {
    let path = config_file_path().context("could not determine config directory")?;
    store_api_key(&path, key)?;
    println!("API key saved to {}", path.display());
    Ok(())
}

/// Verify the credential exchange without printing the token
async fn check_token() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    let client = token_client(&mut config)?;

    println!("Requesting session token from {}...", config.token_url);
    let token = client.fetch_token().await?;
    println!(
        "Token OK ({} characters, valid for {} seconds)",
        token.expose_secret().len(),
        config.token_ttl
    );
    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let sample_rate = config.audio.sample_rate;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CpalCapture::open(sample_rate, config.audio.frame_bytes)?;
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut second = Vec::new();
        while Instant::now() < deadline {
            if let Some(pcm) = capture.read_frame()? {
                second.extend(pcm16_to_f32(&pcm));
            }
        }

        let energy = rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recorded.extend(second);
        }
    }
    drop(capture);

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, sample_rate)?;
        std::fs::write(path, wav)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nSaved recording to {}", path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = CpalPlayback::open(config.audio.sample_rate)?;
    let sample_rate = playback.sample_rate();
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.write(&f32_to_pcm16(&samples))?;
    playback.finish()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
