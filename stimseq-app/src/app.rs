use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stimseq_core::{BreakSchedule, ExperimentPlan};
use stimseq_experiment::{
    count_event_labels, estimate_duration, generate, omission_balance, AutoConfirm, Confirm,
    ConsoleConfirm, EventLog, ExperimentConfig, LevelSink, NullPort, ParallelPort,
    SessionController, SessionSettings, SessionSummary, StreamSink, TriggerSink, UdpMarkerOutlet,
};
use stimseq_timing::{HighPrecisionTimer, SimulatedTimer, Timer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stimseq", version, about = "Omission paradigm sequencer with hardware triggers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the session layout and estimated duration without touching hardware.
    Plan(PlanArgs),
    /// Run a session.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// JSON experiment config; omitted fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Dump the generated plan as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    #[arg(long)]
    participant: String,
    /// Plan seed. Drawn from the OS when omitted, and logged either way.
    #[arg(long)]
    seed: Option<u64>,
    #[command(flatten)]
    output: OutputArgs,
    /// Simulated clock, no trigger hardware, no prompts.
    #[arg(long)]
    simulate: bool,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct OutputArgs {
    /// ppdev device wired to the amplifier trigger input.
    #[arg(long, value_name = "DEVICE")]
    parport: Option<PathBuf>,
    /// Send markers as UDP datagrams to this address.
    #[arg(long, value_name = "ADDR")]
    marker_udp: Option<String>,
    /// Real clock and prompts, triggers go nowhere.
    #[arg(long)]
    dry_run: bool,
}

pub struct App {
    command: Command,
}

impl App {
    pub fn new() -> Result<Self> {
        let cli = Cli::parse();
        init_tracing();
        Ok(Self {
            command: cli.command,
        })
    }

    pub fn run(self) -> Result<()> {
        info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "stimseq {}",
            env!("CARGO_PKG_VERSION")
        );
        match self.command {
            Command::Plan(args) => plan(&args),
            Command::Run(args) => run(&args),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn read_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    Ok(match path {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    })
}

fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    let config = read_config(path)?;
    config.validate().context("invalid experiment configuration")?;
    Ok(config)
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    let seed = seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, "plan seed");
    StdRng::seed_from_u64(seed)
}

fn plan(args: &PlanArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let plan = generate(&config, &mut seeded_rng(args.seed))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    print_layout(&config, &plan);
    Ok(())
}

fn print_layout(config: &ExperimentConfig, plan: &ExperimentPlan) {
    let estimate = estimate_duration(config);

    println!("=== SESSION PLAN ===");
    println!("Blocks: {} ({} events)", plan.len(), plan.total_events());
    println!("{}", breaks_line(config, plan.len()));
    println!(
        "Estimated duration: {:.1} min ({:.0} s)",
        estimate / 60.0,
        estimate
    );
    println!("Events:");
    for (label, n) in count_event_labels(plan, &config.trigger_mapping) {
        println!("  {label:<12} {n}");
    }
    println!("Omission positions:");
    for (nerve, counts) in omission_balance(plan) {
        let row: Vec<String> = counts.iter().map(|(pos, n)| format!("{pos}x{n}")).collect();
        println!("  {:<7} {}", nerve.label(), row.join(" "));
    }
}

/// Scheduled breaks. The duration estimate counts `total / bbb`, which is one
/// more when the last block lands on a break boundary.
fn breaks_line(config: &ExperimentConfig, total_blocks: usize) -> String {
    let bbb = config.blocks_between_breaks;
    let scheduled = BreakSchedule::new(total_blocks, bbb).break_count();
    let estimated = total_blocks.checked_div(bbb).unwrap_or(0);
    if scheduled == estimated {
        format!("Breaks: {scheduled}")
    } else {
        format!("Breaks: {scheduled} (duration estimate allows {estimated})")
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let config = read_config(args.config.as_deref())?;
    start_session(config, args)
}

fn start_session(config: ExperimentConfig, args: &RunArgs) -> Result<()> {
    // everything that can be rejected is rejected before a file or port is opened
    config.validate().context("invalid experiment configuration")?;
    let settings = SessionSettings::new(&args.output_dir, &args.participant);
    settings.validate()?;
    check_output_matches(&config, args)?;

    let plan = generate(&config, &mut seeded_rng(args.seed))?;
    info!(
        blocks = plan.len(),
        events = plan.total_events(),
        estimate_min = estimate_duration(&config) / 60.0,
        "plan ready"
    );

    let log_path = settings.log_path();
    let log = EventLog::create(&log_path)
        .with_context(|| format!("cannot create log {}", log_path.display()))?;
    info!(path = %log_path.display(), "logging events");

    let out = &args.output;
    let summary = if args.simulate {
        let timer = SimulatedTimer::new();
        let confirm = AutoConfirm::new();
        if config.trigger_stream {
            let sink = StreamSink::new(NullPort::new());
            execute(config, plan, sink, timer, confirm, log)?
        } else {
            let sink = LevelSink::new(NullPort::new());
            execute(config, plan, sink, timer, confirm, log)?
        }
    } else {
        let timer = HighPrecisionTimer::new();
        let confirm = ConsoleConfirm::new();
        if let Some(device) = &out.parport {
            let port = ParallelPort::open(device)
                .with_context(|| format!("cannot open parallel port {}", device.display()))?;
            execute(config, plan, LevelSink::new(port), timer, confirm, log)?
        } else if let Some(addr) = &out.marker_udp {
            let outlet = UdpMarkerOutlet::connect(addr.as_str())
                .with_context(|| format!("cannot reach marker receiver {addr}"))?;
            execute(config, plan, StreamSink::new(outlet), timer, confirm, log)?
        } else if config.trigger_stream {
            let sink = StreamSink::new(NullPort::new());
            execute(config, plan, sink, timer, confirm, log)?
        } else {
            let sink = LevelSink::new(NullPort::new());
            execute(config, plan, sink, timer, confirm, log)?
        }
    };

    print_summary(&summary, &log_path);
    Ok(())
}

fn check_output_matches(config: &ExperimentConfig, args: &RunArgs) -> Result<()> {
    let out = &args.output;
    if args.simulate {
        if out.parport.is_some() || out.marker_udp.is_some() {
            bail!("--simulate never drives trigger hardware; drop --parport/--marker-udp");
        }
        return Ok(());
    }
    if config.trigger_stream && out.parport.is_some() {
        bail!("config has trigger_stream set, use --marker-udp instead of --parport");
    }
    if !config.trigger_stream && out.marker_udp.is_some() {
        bail!("config drives a level port, set trigger_stream to use --marker-udp");
    }
    if out.parport.is_none() && out.marker_udp.is_none() && !out.dry_run {
        bail!("choose a trigger output: --parport, --marker-udp, or --dry-run");
    }
    if out.dry_run {
        warn!("dry run: triggers are not sent anywhere");
    }
    Ok(())
}

fn execute<S, T, C>(
    config: ExperimentConfig,
    plan: ExperimentPlan,
    sink: S,
    timer: T,
    confirm: C,
    log: EventLog<File>,
) -> Result<SessionSummary>
where
    S: TriggerSink,
    T: Timer,
    C: Confirm,
{
    let mut session = SessionController::new(config, plan, sink, timer, confirm, log)?;
    session.run().context("session aborted")
}

fn print_summary(summary: &SessionSummary, log_path: &Path) {
    let t = &summary.timing;
    println!("\n=== SESSION COMPLETE ===");
    println!("Blocks run: {}", summary.blocks_run);
    println!("Breaks: {}", summary.breaks);
    println!(
        "Events logged: {} ({} triggers incl. rest markers)",
        summary.events_logged, summary.triggers_sent
    );
    println!("Elapsed: {:.1} min", summary.elapsed_secs / 60.0);
    println!(
        "Intervals: mean error {:.3} ms, max error {:.3} ms, jitter {:.3} ms",
        t.mean_abs_error_ns / 1e6,
        t.max_abs_error_ns / 1e6,
        t.jitter_ns / 1e6
    );
    println!("Log: {}", log_path.display());
}
