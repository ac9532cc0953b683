//! ai-guard: 依赖状态查询与单次调用的运维命令行工具
//!
//! Usage:
//!   ai-guard status                          Show configured providers and breaker states
//!   ai-guard health                          Dump dependency health as JSON
//!   ai-guard complete <prompt> [options]     Run one completion through the provider chain
//!   ai-guard search <query> [options]        Run one vector search
//!   ai-guard config                          Print the effective configuration

use ai_lib_guard::bootstrap::{bootstrap, Dependencies};
use ai_lib_guard::chain::ProviderStatus;
use ai_lib_guard::client::CallOptions;
use ai_lib_guard::config::GuardConfig;
use ai_lib_guard::llm::CompletionRequest;
use ai_lib_guard::vector::SearchRequest;
use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "status" => cmd_status(&args[2..]).await,
        "health" => cmd_health(&args[2..]).await,
        "complete" => cmd_complete(&args[2..]).await,
        "search" => cmd_search(&args[2..]).await,
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("ai-guard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }
}

fn print_usage() {
    println!(
        r#"ai-guard: resilient AI dependency access

USAGE:
    ai-guard <COMMAND> [OPTIONS]

COMMANDS:
    status                      Show providers, priorities and circuit states
    health                      Print dependency health snapshots as JSON
    complete <prompt>           Send one completion request
        --system <text>             System prompt
        --max-tokens <n>            Token limit (default 1024)
        --timeout-ms <n>            Overall deadline for this call
        --no-cache                  Bypass the response cache
    search <query>              Send one vector search request
        --top-k <n>                 Number of matches (default 10)
        --filter <key=value>        Metadata filter, repeatable
        --collection <name>         Override the configured collection
    config                      Print the effective configuration as YAML
    version                     Show version information
    help                        Show this help message

GLOBAL OPTIONS:
    --config <path>             YAML configuration file

ENVIRONMENT:
    AI_GUARD_CONFIG             Configuration file path (same as --config)
    OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY
                                Provider credentials
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn flag_values<'a>(args: &'a [String], name: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|w| w[0] == name)
        .map(|w| w[1].as_str())
        .collect()
}

/// First argument that is neither a flag nor a flag's value.
fn positional(args: &[String]) -> Option<&str> {
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--no-cache" {
            continue;
        }
        if arg.starts_with("--") {
            skip = true;
            continue;
        }
        return Some(arg);
    }
    None
}

fn parse_flag<T: std::str::FromStr>(args: &[String], name: &str) -> anyhow::Result<Option<T>> {
    match flag_value(args, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("invalid value for {name}: '{raw}'")),
    }
}

fn load_config(args: &[String]) -> anyhow::Result<GuardConfig> {
    let path = flag_value(args, "--config")
        .map(PathBuf::from)
        .or_else(|| std::env::var("AI_GUARD_CONFIG").ok().map(PathBuf::from));
    GuardConfig::load(path.as_deref()).context("loading configuration")
}

async fn deps(args: &[String]) -> anyhow::Result<Dependencies> {
    let cfg = load_config(args)?;
    bootstrap(&cfg).await.context("building clients")
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let deps = deps(args).await?;
    println!("{:<14} {:>8} {:>8} {:>10}", "PROVIDER", "PRIORITY", "ENABLED", "CIRCUIT");
    for (name, status) in deps.llm.chain().provider_status() {
        print_status_row(&name, &status);
    }
    match deps.vector {
        Some(ref v) => {
            for (name, status) in v.chain().provider_status() {
                print_status_row(&name, &status);
            }
        }
        None => println!("(no vector backend configured)"),
    }
    Ok(())
}

fn print_status_row(name: &str, status: &ProviderStatus) {
    let circuit = format!("{:?}", status.circuit.state);
    println!(
        "{:<14} {:>8} {:>8} {:>10}",
        name, status.priority, status.enabled, circuit
    );
}

async fn cmd_health(args: &[String]) -> anyhow::Result<()> {
    let deps = deps(args).await?;
    println!("{}", serde_json::to_string_pretty(&deps.health())?);
    Ok(())
}

async fn cmd_complete(args: &[String]) -> anyhow::Result<()> {
    let Some(prompt) = positional(args) else {
        bail!("usage: ai-guard complete <prompt> [--system <text>] [--max-tokens <n>]");
    };
    let mut request = CompletionRequest::new(prompt);
    if let Some(system) = flag_value(args, "--system") {
        request = request.with_system(system);
    }
    if let Some(n) = parse_flag::<u32>(args, "--max-tokens")? {
        request = request.with_max_tokens(n);
    }
    let deps = deps(args).await?;
    let completion = deps.llm.call(request, call_options(args)?).await?;
    println!("{}", completion.text);
    eprintln!(
        "-- provider={} model={} finish={}",
        completion.provider,
        completion.model,
        completion.finish_reason.as_deref().unwrap_or("-")
    );
    Ok(())
}

async fn cmd_search(args: &[String]) -> anyhow::Result<()> {
    let Some(query) = positional(args) else {
        bail!("usage: ai-guard search <query> [--top-k <n>] [--filter key=value]");
    };
    let mut request = SearchRequest::new(query);
    if let Some(k) = parse_flag::<usize>(args, "--top-k")? {
        request = request.with_top_k(k);
    }
    if let Some(c) = flag_value(args, "--collection") {
        request = request.with_collection(c);
    }
    for raw in flag_values(args, "--filter") {
        let (k, v) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("filter must look like key=value, got '{raw}'"))?;
        request = request.with_filter(k, v);
    }
    let deps = deps(args).await?;
    let response = deps.vector()?.call(request, call_options(args)?).await?;
    for m in &response.matches {
        println!("{:.4}  {}  {}", m.score, m.id, serde_json::Value::Object(m.payload.clone()));
    }
    eprintln!("-- backend={} matches={}", response.backend, response.matches.len());
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    print!("{}", serde_yaml::to_string(&cfg)?);
    Ok(())
}

fn call_options(args: &[String]) -> anyhow::Result<CallOptions> {
    let mut options = CallOptions::new().with_cache(!args.iter().any(|a| a == "--no-cache"));
    if let Some(ms) = parse_flag::<u64>(args, "--timeout-ms")? {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    Ok(options)
}
