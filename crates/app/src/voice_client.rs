// Client vocal temps réel en ligne de commande
//
// Cette application pilote le VoiceController :
// - talk  : enregistre le micro pendant N secondes puis attend la réponse
// - ask   : envoie un message textuel (avec contexte d'écran optionnel)
// - probe : vérifie la connexion et la configuration de session
//
// La clé API est lue dans OPENAI_API_KEY (fichier .env accepté).

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use audio::{
    samples_to_duration, AudioConfig, CpalCaptureSource, CpalPlayback, MonotonicClock,
    PlaybackSequencer, WIRE_SAMPLE_RATE,
};
use clap::{Parser, Subcommand};
use network::{utils, ClientConfig, EventKind, InboundEvent, WebSocketConnector};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_core::{VoiceController, VoiceState};

/// Délai maximal d'attente d'une réponse
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(author, version, about = "Client vocal pour l'API temps réel")]
struct Cli {
    /// Désactive la lecture des réponses vocales
    #[arg(long, global = true)]
    no_playback: bool,

    /// Blocs audio de 10ms au lieu de 20ms
    #[arg(long, global = true)]
    low_latency: bool,

    /// Modèle à utiliser (sinon REALTIME_MODEL ou défaut)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Voix de synthèse
    #[arg(long, global = true)]
    voice: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parle au micro puis écoute la réponse
    Talk {
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
    /// Envoie une question textuelle
    Ask {
        text: String,
        /// Description de l'écran jointe à la question
        #[arg(short, long)]
        context: Option<String>,
    },
    /// Ouvre une session puis la referme
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Configuration du client")?;
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(voice) = cli.voice {
        config.session = config.session.with_voice(voice);
    }

    let audio_config = if cli.low_latency {
        AudioConfig::low_latency()
    } else {
        AudioConfig::default()
    };
    audio_config.validate().map_err(anyhow::Error::msg)?;

    let mut controller = VoiceController::new(
        config,
        Arc::new(WebSocketConnector::new()),
        Arc::new(CpalCaptureSource::new(audio_config.clone())),
    );

    let wants_playback = !cli.no_playback && !matches!(cli.command, Commands::Probe);
    if wants_playback {
        match CpalPlayback::new(audio_config) {
            Ok(output) => {
                let sequencer =
                    PlaybackSequencer::new(Box::new(output), Arc::new(MonotonicClock::new()), WIRE_SAMPLE_RATE);
                controller = controller.with_playback(sequencer);
            }
            Err(e) => warn!(error = %e, "Sortie audio indisponible, lecture désactivée"),
        }
    }

    let tracker = PlaybackTracker::attach(&controller);
    print_deltas(&controller);

    match cli.command {
        Commands::Talk { seconds } => run_talk(&controller, seconds).await?,
        Commands::Ask { text, context } => run_ask(&controller, &text, context.as_deref()).await?,
        Commands::Probe => run_probe(&controller).await?,
    }

    if controller.playback_stats().is_some() {
        tracker.wait_until_played().await;
    }
    controller.disconnect().await?;
    Ok(())
}

async fn run_talk(controller: &VoiceController, seconds: u64) -> anyhow::Result<()> {
    controller.start_recording().await?;
    println!("🎙️  Parlez ({seconds}s, Ctrl+C pour terminer plus tôt)...");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = signal::ctrl_c() => println!("\n⏹️  Enregistrement interrompu"),
    }

    controller.stop_recording().await?;
    if let Some(stats) = controller.client_stats().await {
        info!(
            audio = %utils::format_bytes(stats.audio_bytes_sent),
            frames = stats.frames_sent,
            "Audio envoyé"
        );
    }
    if controller.snapshot().processing {
        println!("⏳ Réponse en cours...");
        wait_for_response(controller).await?;
    }
    print_summary(&controller.snapshot());
    Ok(())
}

async fn run_ask(controller: &VoiceController, text: &str, context: Option<&str>) -> anyhow::Result<()> {
    controller.connect().await?;
    controller.send_text_with_context(text, context).await?;
    wait_for_response(controller).await?;
    print_summary(&controller.snapshot());
    Ok(())
}

async fn run_probe(controller: &VoiceController) -> anyhow::Result<()> {
    let started = Instant::now();
    controller.connect().await?;

    let state = controller.snapshot();
    println!("✅ Connecté en {}", utils::format_duration(started.elapsed()));
    if let Some(session_id) = state.session_id {
        println!("   Session : {session_id:08x}");
    }
    if let Some(stats) = controller.client_stats().await {
        println!("   Frames envoyées : {}", stats.frames_sent);
    }
    Ok(())
}

/// Attend `processing == false`, une erreur, Ctrl+C ou le délai maximal
async fn wait_for_response(controller: &VoiceController) -> anyhow::Result<()> {
    let mut state = controller.state_receiver();

    tokio::select! {
        result = tokio::time::timeout(RESPONSE_TIMEOUT, state.wait_for(|s| !s.processing)) => {
            match result {
                Ok(changed) => {
                    changed.map_err(|_| anyhow!("Contrôleur arrêté"))?;
                }
                Err(_) => warn!(timeout_s = RESPONSE_TIMEOUT.as_secs(), "Pas de réponse dans le délai"),
            }
        }
        _ = signal::ctrl_c() => println!("\n🛑 Attente interrompue"),
    }
    Ok(())
}

/// Affiche les deltas au fil de l'eau
fn print_deltas(controller: &VoiceController) {
    controller.bus().subscribe(EventKind::TextDelta, |event| {
        if let InboundEvent::TextDelta { delta } = event {
            print!("{delta}");
            io::stdout().flush()?;
        }
        Ok(())
    });
    controller.bus().subscribe(EventKind::TranscriptDelta, |event| {
        if let InboundEvent::TranscriptDelta { delta } = event {
            print!("{delta}");
            io::stdout().flush()?;
        }
        Ok(())
    });
}

fn print_summary(state: &VoiceState) {
    println!();
    if !state.transcript.is_empty() {
        println!("📝 Transcription : {}", state.transcript);
    }
    if !state.response.is_empty() {
        println!("💬 Réponse : {}", state.response);
    }
    if let Some(error) = &state.error {
        println!("❌ {error}");
    }
}

/// Mesure l'audio transmis à la sortie pour attendre la fin de la lecture
#[derive(Default)]
struct PlaybackTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

#[derive(Default)]
struct TrackerInner {
    first_chunk: Option<Instant>,
    samples: usize,
}

impl PlaybackTracker {
    fn attach(controller: &VoiceController) -> Self {
        let tracker = Self::default();
        let inner = Arc::clone(&tracker.inner);
        controller.bus().subscribe(EventKind::AudioPlaying, move |event| {
            if let InboundEvent::AudioPlaying { samples, .. } = event {
                let mut inner = inner.lock().map_err(|_| anyhow!("verrou empoisonné"))?;
                inner.first_chunk.get_or_insert_with(Instant::now);
                inner.samples += samples;
            }
            Ok(())
        });
        tracker
    }

    async fn wait_until_played(&self) {
        let remaining = match self.inner.lock() {
            Ok(inner) => match inner.first_chunk {
                Some(start) => samples_to_duration(inner.samples, WIRE_SAMPLE_RATE).saturating_sub(start.elapsed()),
                None => Duration::ZERO,
            },
            Err(_) => Duration::ZERO,
        };

        if !remaining.is_zero() {
            info!(remaining_ms = remaining.as_millis() as u64, "Fin de la lecture");
            tokio::time::sleep(remaining).await;
        }
    }
}
