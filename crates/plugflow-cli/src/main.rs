use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use plugflow_engine::{
    DirtyMode, EngineConfig, EvalMode, Plan, Process, ProcessRegistry, QaEvent, QaEventSink,
    QaMode, QaWorkflow, Report, RunControl, SharedQaEventObserver, Shell, Value, Workflow,
    core_registry, describe_eval_mode, load_workflow, parse_eval_mode,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "plugflow-cli")]
#[command(about = "Evaluate, check and inspect plugflow workflow descriptions")]
struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Raise log verbosity to debug unless RUST_LOG is set.
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Eval(EvalArgs),
    Make(MakeArgs),
    Dirty(DirtyArgs),
    Qa(QaArgs),
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    #[arg(long)]
    dot_file: Option<PathBuf>,
    #[arg(long)]
    dot_source: Option<String>,
    /// Registers a nested workflow type as TYPE=PATH.
    #[arg(long = "workflow-type")]
    workflow_types: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct EvalArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Plug to evaluate, written as node.plug.
    #[arg(long)]
    shell: String,
    #[arg(long, value_parser = parse_mode, default_value = "query")]
    mode: EvalMode,
    /// Mode of every process pulled in by the requested one. Defaults to --mode.
    #[arg(long, value_parser = parse_mode)]
    global_mode: Option<EvalMode>,
    #[arg(long, action = ArgAction::SetTrue)]
    report: bool,
}

#[derive(clap::Args, Debug)]
struct MakeArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long = "target", required = true)]
    targets: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct DirtyArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long)]
    target: String,
    #[arg(long, value_enum, default_value_t = DirtyDepth::Single)]
    depth: DirtyDepth,
}

#[derive(clap::Args, Debug)]
struct QaArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Checks to run as node.plug. Runs every check when omitted.
    #[arg(long = "check")]
    checks: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    fix: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    abort_on_error: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DirtyDepth {
    Single,
    Multi,
    Deep,
}

impl From<DirtyDepth> for DirtyMode {
    fn from(depth: DirtyDepth) -> Self {
        match depth {
            DirtyDepth::Single => Self::Single,
            DirtyDepth::Multi => Self::Multi,
            DirtyDepth::Deep => Self::Deep,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Eval(args) => eval_command(args, &config),
        Commands::Make(args) => make_command(args, &config),
        Commands::Dirty(args) => dirty_command(args, &config),
        Commands::Qa(args) => qa_command(args, &config),
        Commands::Inspect(args) => inspect_command(args, &config),
    });

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn parse_mode(raw: &str) -> Result<EvalMode, String> {
    parse_eval_mode(raw).ok_or_else(|| {
        format!("unknown mode '{raw}', use query, make, dirty or flags joined by '|'")
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load_from_path(path).map_err(|error| error.to_string()),
        None => Ok(EngineConfig::default()),
    }
}

fn eval_command(args: EvalArgs, config: &EngineConfig) -> Result<ExitCode, String> {
    let mut workflow = load_source(&args.source, config)?;
    let shell = parse_shell(&args.shell)?;
    let global_mode = args.global_mode.unwrap_or(args.mode);
    let result = workflow.evaluate_with(&shell, args.mode, global_mode);

    if args.report {
        let headline = format!("{shell} in mode {}", describe_eval_mode(args.mode));
        let lines = Plan::new(workflow.call_graph())
            .with_order(config.report_order)
            .make_report(Some(&headline));
        for line in lines {
            println!("{line}");
        }
    }

    match result {
        Ok(value) => {
            println!("{shell} = {value}");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) if error.is_dirty() => {
            println!("dirty: {shell}");
            if let Some(report) = error.dirty_report() {
                println!("  {}", report.make_report());
            }
            Ok(ExitCode::from(2))
        }
        Err(error) => Err(error.to_string()),
    }
}

fn make_command(args: MakeArgs, config: &EngineConfig) -> Result<ExitCode, String> {
    let mut workflow = load_source(&args.source, config)?;
    let targets: Vec<Value> = args
        .targets
        .iter()
        .map(|raw| Value::parse_simple(raw))
        .collect();

    let mut failures = 0usize;
    for (target, outcome) in workflow.make_targets(&targets) {
        match outcome {
            Ok(value) => println!("made {target}: {value}"),
            Err(error) => {
                failures += 1;
                println!("failed {target}: {error}");
            }
        }
    }
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn dirty_command(args: DirtyArgs, config: &EngineConfig) -> Result<ExitCode, String> {
    let mut workflow = load_source(&args.source, config)?;
    let target = Value::parse_simple(&args.target);
    let entries = workflow
        .make_dirty_report(&target, args.depth.into())
        .map_err(|error| error.to_string())?;

    let mut dirty = false;
    for (shell, report) in entries {
        match report {
            Some(report) => {
                dirty = true;
                println!("dirty {shell}: {}", report.make_report());
            }
            None => println!("clean {shell}"),
        }
    }
    Ok(if dirty {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn qa_command(args: QaArgs, config: &EngineConfig) -> Result<ExitCode, String> {
    let workflow = load_source(&args.source, config)?;
    let event_json = args.event_json;
    let printer: SharedQaEventObserver =
        Arc::new(move |event: &QaEvent, _control: &mut RunControl| {
            if event_json {
                match serde_json::to_string(event) {
                    Ok(line) => println!("{line}"),
                    Err(_) => print_event_text(event),
                }
            } else {
                print_event_text(event);
            }
        });
    let mut qa = QaWorkflow::with_config(workflow, config)
        .with_events(QaEventSink::with_observer(printer));
    if args.abort_on_error {
        qa.default_abort_on_error = true;
    }

    let checks = if args.checks.is_empty() {
        qa.list_checks(|_| true)
    } else {
        args.checks
            .iter()
            .map(|raw| parse_shell(raw))
            .collect::<Result<Vec<_>, _>>()?
    };
    if checks.is_empty() {
        println!("no checks found");
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if args.fix { QaMode::Fix } else { QaMode::Query };
    let results = qa
        .run_checks(&checks, mode, true)
        .map_err(|error| error.to_string())?;
    let failed = results
        .iter()
        .filter(|(_, result)| !result.is_successful())
        .count();
    println!("checks: {} passed: {} failed: {failed}", results.len(), results.len() - failed);
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn inspect_command(args: InspectArgs, config: &EngineConfig) -> Result<ExitCode, String> {
    let workflow = load_source(&args.source, config)?;
    println!("workflow: {}", workflow.name());
    for node in workflow.nodes() {
        let spec = node.process.spec();
        println!("node {} ({})", node.id, node.type_name);
        for plug in spec.plugs() {
            println!(
                "  {} {:?} {}",
                plug.name, plug.direction, plug.attribute.value_type
            );
        }
    }
    for (source, destination) in workflow.all_connections() {
        println!("edge {source} -> {destination}");
    }
    let supported: Vec<String> = workflow
        .target_support_list()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("targets: {}", supported.join(", "));
    Ok(ExitCode::SUCCESS)
}

fn load_source(args: &SourceArgs, config: &EngineConfig) -> Result<Workflow, String> {
    let registry = build_registry(&args.workflow_types)?;
    let workflow = match (args.dot_file.as_deref(), args.dot_source.as_deref()) {
        (Some(_), Some(_)) => {
            return Err("provide only one of --dot-file or --dot-source".to_string());
        }
        (None, None) => return Err("one of --dot-file or --dot-source is required".to_string()),
        (Some(path), None) => plugflow_engine::load_workflow_from_file(path, &registry),
        (None, Some(source)) => load_workflow(source, &registry),
    }
    .map_err(|error| error.to_string())?;
    tracing::debug!(
        workflow = workflow.name(),
        nodes = workflow.nodes().len(),
        connections = workflow.all_connections().len(),
        "workflow loaded"
    );
    Ok(workflow.with_config(config))
}

fn build_registry(workflow_types: &[String]) -> Result<ProcessRegistry, String> {
    let mut registry = core_registry();
    for entry in workflow_types {
        let (type_name, path) = entry
            .split_once('=')
            .ok_or_else(|| format!("workflow type '{entry}' must be written as TYPE=PATH"))?;
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("failed reading workflow type file '{path}': {e}"))?;
        registry
            .register_workflow(type_name.trim(), source)
            .map_err(|error| error.to_string())?;
    }
    Ok(registry)
}

fn parse_shell(raw: &str) -> Result<Shell, String> {
    Shell::parse(raw).ok_or_else(|| format!("'{raw}' is not a node.plug reference"))
}

fn print_event_text(event: &QaEvent) {
    match event {
        QaEvent::PreCheck { check } => println!("[qa] checking {check}"),
        QaEvent::CheckError { check, error } => println!("[qa] error {check}: {error}"),
        QaEvent::PostCheck { check, result } => {
            let status = if result.is_successful() { "ok" } else { "failed" };
            println!("[qa] {status} {check}: {result}");
        }
    }
}
