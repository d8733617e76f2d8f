use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use frameflow_contracts::api::{ExploreRequest, GenerateRequest};
use frameflow_contracts::chat::{parse_intent, SESSION_HELP_COMMANDS};
use frameflow_contracts::error::FlowError;
use frameflow_contracts::events::EventWriter;
use frameflow_contracts::session::{Completion, ExplorationTicket, SlotKey, VideoSource};
use frameflow_contracts::status::{TaskKind, TaskStatus};
use frameflow_engine::controller::{request_exploration, StatusObserver};
use frameflow_engine::server::DEFAULT_BIND;
use frameflow_engine::{
    EngineConfig, ExplorerController, Gateway, GatewayClient, GatewayServer, HttpGatewayClient,
    InlineImage, LocalGatewayClient, StillFrameSurface,
};
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";
const BREADCRUMB_MAX_CHARS: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "frameflow", version, about = "Image-to-video explorer gateway and session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve POST /generate and POST /explore.
    Serve(ServeArgs),
    Generate(GenerateArgs),
    Explore(ExploreArgs),
    /// Interactive explorer session.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct ProviderArgs {
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ClientArgs {
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,
    /// Run the gateway in-process instead of calling a server.
    #[arg(long)]
    local: bool,
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: String,
    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    front: PathBuf,
    #[arg(long)]
    background: PathBuf,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Parser)]
struct ExploreArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[command(flatten)]
    client: ClientArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("frameflow error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            run_serve(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Explore(args) => run_explore(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
    }
}

fn engine_config(args: &ProviderArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(provider) = args.provider.as_deref() {
        config.provider = provider.trim().to_ascii_lowercase();
    }
    if let Some(model) = args.model.as_deref() {
        config.model = Some(model.trim().to_string());
    }
    config
}

fn event_writer(path: Option<&Path>, session_id: &str) -> EventWriter {
    match path {
        Some(path) => EventWriter::new(path, session_id),
        None => EventWriter::disabled(session_id),
    }
}

fn session_id(prefix: &str) -> String {
    format!("{prefix}-{}", std::process::id())
}

fn build_client(args: &ClientArgs, events: &EventWriter) -> Result<Arc<dyn GatewayClient>> {
    if args.local {
        let gateway = Gateway::from_config(&engine_config(&args.provider), events.clone())?;
        return Ok(Arc::new(LocalGatewayClient::new(gateway)));
    }
    Ok(Arc::new(HttpGatewayClient::new(&args.server)?))
}

fn run_serve(args: ServeArgs) -> Result<()> {
    let config = engine_config(&args.provider);
    let events = event_writer(args.provider.events.as_deref(), &session_id("gateway"));
    let gateway = Gateway::from_config(&config, events)?;
    let provider = gateway.provider_name().to_string();
    let server = GatewayServer::bind(&args.bind, gateway)?;
    println!(
        "frameflow gateway listening on http://{} (provider: {provider})",
        server.local_addr()?
    );
    server.serve()
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let events = event_writer(args.client.provider.events.as_deref(), &session_id("generate"));
    let client = build_client(&args.client, &events)?;
    let request = GenerateRequest::new(
        InlineImage::from_path(&args.front)?.to_data_uri(),
        InlineImage::from_path(&args.background)?.to_data_uri(),
    );
    let response = client.generate(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(0)
}

fn run_explore(args: ExploreArgs) -> Result<i32> {
    let events = event_writer(args.client.provider.events.as_deref(), &session_id("explore"));
    let client = build_client(&args.client, &events)?;
    let request = ExploreRequest::new(
        InlineImage::from_path(&args.image)?.to_data_uri(),
        args.prompt.clone(),
    );
    let response = client.explore(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.video_url.is_some() { 0 } else { 2 })
}

type ExplorationResult = (ExplorationTicket, Result<Option<String>, FlowError>);

fn run_session(args: SessionArgs) -> Result<()> {
    let events = event_writer(args.client.provider.events.as_deref(), &session_id("session"));
    let client = build_client(&args.client, &events)?;
    let observer: StatusObserver = Arc::new(|kind: TaskKind, status: TaskStatus| {
        println!("[{}] {}", kind.as_str(), status.as_str());
    });
    let mut controller = ExplorerController::new(client, events).with_observer(observer);
    let (sender, receiver) = mpsc::channel::<ExplorationResult>();

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Frameflow session started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        drain_explorations(&mut controller, &receiver);

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
            }
            "set_slot" => {
                let slot = arg_text(&intent.command_args, "slot");
                let path = arg_text(&intent.command_args, "path");
                let Some(key) = SlotKey::parse(&slot) else {
                    println!("Unknown slot {slot}");
                    continue;
                };
                if path.is_empty() {
                    println!("/{slot} requires a path");
                    continue;
                }
                match controller.load_slot(key, Path::new(&path)) {
                    Ok(()) => println!("{} image set to {path}", key.label()),
                    Err(err) => println!("Could not load {}: {err:#}", key.label()),
                }
            }
            "clear_slot" => {
                let slot = arg_text(&intent.command_args, "slot");
                match SlotKey::parse(&slot) {
                    Some(key) => {
                        controller.remove_slot(key);
                        println!("{} image removed", key.label());
                    }
                    None => println!("/remove requires one of: front left right back background"),
                }
            }
            "generate" => match controller.generate() {
                Ok(result) => {
                    println!(
                        "Setting video: {}",
                        result.setting_video_url.as_deref().unwrap_or("(none)")
                    );
                    println!(
                        "Person video: {}",
                        result.person_video_url.as_deref().unwrap_or("(none)")
                    );
                }
                Err(err) => println!("Generation failed: {err}"),
            },
            "capture" => {
                let path = arg_text(&intent.command_args, "path");
                if path.is_empty() {
                    println!("/capture requires a frame image path");
                    continue;
                }
                let source = video_source(&controller, &arg_text(&intent.command_args, "source"));
                let surface = match StillFrameSurface::from_path(Path::new(&path)) {
                    Ok(surface) => surface,
                    Err(err) => {
                        println!("Capture failed: {err:#}");
                        continue;
                    }
                };
                match controller.capture(&surface, source) {
                    Ok(true) => println!("Frame captured. Describe where to explore next."),
                    Ok(false) => println!("Nothing to capture."),
                    Err(err) => println!("Capture failed: {err}"),
                }
            }
            "discard_capture" => {
                if controller.discard_capture() {
                    println!("Captured frame discarded.");
                } else {
                    println!("No captured frame to discard.");
                }
            }
            "explore" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                match controller.start_exploration(&prompt) {
                    Ok(ticket) => {
                        spawn_exploration(controller.client(), ticket, sender.clone());
                        println!("Exploring \"{prompt}\" in the background. /wait to block.");
                    }
                    Err(err) => println!("Explore failed: {err}"),
                }
            }
            "wait" => {
                if !controller.state().exploration_status().is_active() {
                    println!("No exploration in flight.");
                    continue;
                }
                while controller.state().exploration_status().is_active() {
                    let (ticket, outcome) = receiver
                        .recv()
                        .context("exploration worker channel closed")?;
                    report_exploration(&mut controller, &ticket, outcome);
                }
            }
            "navigate" => {
                let Some(index) = intent
                    .command_args
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|value| usize::try_from(value).ok())
                else {
                    println!("/goto requires a node index");
                    continue;
                };
                match controller.navigate_to(index) {
                    Ok(()) => print_chain(&controller),
                    Err(err) => println!("{err}"),
                }
            }
            "reset" => {
                controller.reset();
                print_chain(&controller);
            }
            "show_chain" => print_chain(&controller),
            "show_status" => print_status(&controller),
            "show_state" => {
                println!("{}", serde_json::to_string_pretty(controller.state())?);
            }
            "unknown" => {
                let command = arg_text(&intent.command_args, "command");
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    Ok(())
}

fn spawn_exploration(
    client: Arc<dyn GatewayClient>,
    ticket: ExplorationTicket,
    sender: Sender<ExplorationResult>,
) {
    thread::spawn(move || {
        let outcome = request_exploration(client.as_ref(), &ticket);
        let _ = sender.send((ticket, outcome));
    });
}

fn drain_explorations(controller: &mut ExplorerController, receiver: &Receiver<ExplorationResult>) {
    while let Ok((ticket, outcome)) = receiver.try_recv() {
        report_exploration(controller, &ticket, outcome);
    }
}

fn report_exploration(
    controller: &mut ExplorerController,
    ticket: &ExplorationTicket,
    outcome: Result<Option<String>, FlowError>,
) {
    match controller.finish_exploration(ticket, outcome) {
        Completion::Discarded => {
            println!("Ignored a late result for \"{}\".", ticket.prompt);
        }
        Completion::Applied => match controller.state().exploration_error() {
            Some(message) => println!("Exploration failed: {message}"),
            None => print_chain(controller),
        },
    }
}

fn video_source(controller: &ExplorerController, raw: &str) -> VideoSource {
    match raw {
        "setting" => VideoSource::Setting,
        "person" => VideoSource::Person,
        _ => match controller.state().chain().current() {
            Some(node) => VideoSource::Exploration(node.id.clone()),
            None => VideoSource::Setting,
        },
    }
}

fn arg_text(args: &std::collections::BTreeMap<String, Value>, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

fn print_chain(controller: &ExplorerController) {
    let chain = controller.state().chain();
    println!("{}", chain.breadcrumbs(BREADCRUMB_MAX_CHARS));
    for (index, node) in chain.nodes().iter().enumerate() {
        println!("  [{index}] {} -> {}", node.prompt, node.video_url);
    }
}

fn print_status(controller: &ExplorerController) {
    let state = controller.state();
    for slot in state.slots() {
        let marker = if slot.is_filled() { "x" } else { " " };
        let required = if slot.key.is_required() { " (required)" } else { "" };
        println!("  [{marker}] {}{required}", slot.label);
    }
    println!(
        "Generation: {}{}",
        state.generation_status().as_str(),
        state
            .generation_error()
            .map(|message| format!(" ({message})"))
            .unwrap_or_default()
    );
    println!(
        "Exploration: {}{}",
        state.exploration_status().as_str(),
        state
            .exploration_error()
            .map(|message| format!(" ({message})"))
            .unwrap_or_default()
    );
    if state.captured_frame().is_some() {
        println!("A captured frame is waiting for a prompt.");
    }
    for (label, source) in [("Setting", VideoSource::Setting), ("Person", VideoSource::Person)] {
        if let Some(url) = state.displayed_video(source) {
            println!("{label} view: {url}");
        }
    }
}
