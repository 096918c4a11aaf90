use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{error, info};
use skyvoice_edge::{
    assistant::{Assistant, ControlCommand},
    audio::{device::list_devices, CpalBackend},
    config::{load_config, AppConfig},
    interrupt::InterruptSignal,
    transport::WebSocketConnector,
    wake::{ConsoleWakeSource, TcpWakeSource, WakeEventSource, WakeListener},
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WakeMode {
    /// Press Enter to wake
    Console,
    /// Subscribe to a wakeword detector service
    Tcp,
}

#[derive(Parser)]
#[command(name = "skyvoice")]
#[command(about = "Wake-word triggered voice assistant over a realtime audio connection")]
struct Args {
    /// End a session after this many seconds without a completed response
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Where wake events come from
    #[arg(long, value_enum, default_value_t = WakeMode::Console)]
    wake: WakeMode,

    /// Wakeword event server address (with --wake tcp)
    #[arg(long, default_value = "127.0.0.1:50052")]
    wakeword_addr: String,

    /// Input device name (substring match)
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name (substring match)
    #[arg(long)]
    output_device: Option<String>,

    /// Realtime model
    #[arg(long)]
    model: Option<String>,

    /// Skip the acknowledgement beep at session start
    #[arg(long)]
    no_beep: bool,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.timing.inactivity_timeout = Duration::from_secs(self.timeout_secs);
        config.audio.input_device = self.input_device.clone();
        config.audio.output_device = self.output_device.clone();
        config.audio.ack_beep = !self.no_beep;
        if let Some(model) = &self.model {
            config.endpoint.model = model.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        let (inputs, outputs) = list_devices()?;
        println!("Input devices:");
        for name in inputs {
            println!("  {}", name);
        }
        println!("Output devices:");
        for name in outputs {
            println!("  {}", name);
        }
        return Ok(());
    }

    let config = args.app_config();
    config.validate()?;
    let api = load_config()?;

    let interrupt = InterruptSignal::new();
    let connector = Arc::new(WebSocketConnector::new(api, config.endpoint.clone()));
    let (assistant, commands) = Assistant::new(
        config.clone(),
        Arc::new(CpalBackend),
        connector,
        interrupt.clone(),
    );
    let activity = assistant.activity();

    let source: Box<dyn WakeEventSource> = match args.wake {
        WakeMode::Console => {
            println!("Press Enter to talk, Enter again to interrupt, Ctrl+C to stop");
            Box::new(ConsoleWakeSource::stdin())
        }
        WakeMode::Tcp => {
            info!("Using wakeword server at {}", args.wakeword_addr);
            Box::new(
                TcpWakeSource::connect(&args.wakeword_addr)
                    .context("Failed to connect to wakeword server")?,
            )
        }
    };
    let listener = WakeListener::new(
        source,
        commands.clone(),
        interrupt,
        activity.clone(),
        config.timing.wake_cooldown,
    );
    let listener_shutdown = listener.shutdown_handle();
    listener.spawn()?;

    // Ctrl+C stops the active session, or exits when idle
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let command = if *activity.borrow() {
                info!("Received Ctrl+C, stopping session");
                ControlCommand::Stop
            } else {
                info!("Received Ctrl+C, shutting down...");
                ControlCommand::Shutdown
            };
            if commands.send(command).is_err() {
                break;
            }
        }
    });

    let outcomes = assistant.run().await;
    listener_shutdown.store(true, Ordering::Release);

    let failures = outcomes.iter().filter(|cause| cause.is_error()).count();
    if failures > 0 {
        error!("{} of {} sessions ended with an error", failures, outcomes.len());
    }
    println!("Goodbye!");
    Ok(())
}
