use quotabar::config::{self, AppConfig};
use quotabar::model::{MetricLine, ProviderId, ProviderStatus};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct CliArgs {
    command: String,
    provider: Option<String>,
    json: bool,
}

#[tokio::main]
async fn main() {
    quotabar::init_logging();

    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("quotabar {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match args.command.as_str() {
        "status" => run_status(args).await,
        "watch" => run_watch(args).await,
        _ => Err(format!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut command = String::new();
    let mut provider = None;
    let mut json = false;

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }
    if command.is_empty() {
        command = "status".to_string();
    }

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--provider" => provider = iter.next(),
            "--json" => json = true,
            "--help" | "-h" | "--version" | "-V" => command = arg,
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
    }

    CliArgs {
        command,
        provider,
        json,
    }
}

fn print_help() {
    println!(
        "quotabar - AI usage tracker

USAGE:
    quotabar [COMMAND] [OPTIONS]

COMMANDS:
    status    Fetch usage for all enabled providers once (default)
    watch     Refresh periodically until interrupted

OPTIONS:
    --provider <id>    Only the given provider (status only)
    --json             JSON output
    -h, --help         Show this help
    -V, --version      Show version"
    );
}

async fn run_status(args: CliArgs) -> Result<(), String> {
    let orchestrator = quotabar::build_orchestrator().map_err(|e| e.to_string())?;
    let config = config::load_config().unwrap_or_default();

    let statuses = match args.provider.as_deref() {
        Some(raw) => {
            let provider = ProviderId::parse(raw)
                .ok_or_else(|| format!("Unknown provider: {raw}"))?;
            let status = orchestrator.fetch_one(provider).await;
            HashMap::from([(provider, status)])
        }
        None => orchestrator.fetch_all(&config.enabled_providers).await,
    };

    if args.json {
        println!("{}", statuses_to_json(&config, &statuses));
    } else {
        print_statuses(&config, &statuses);
    }
    Ok(())
}

async fn run_watch(args: CliArgs) -> Result<(), String> {
    let orchestrator = quotabar::build_orchestrator().map_err(|e| e.to_string())?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let json = args.json;
    orchestrator
        .run_periodic(
            token,
            || config::load_config().unwrap_or_default(),
            move |statuses| {
                let config = config::load_config().unwrap_or_default();
                if json {
                    println!("{}", statuses_to_json(&config, &statuses));
                } else {
                    println!("--- {} ---", chrono::Local::now().format("%H:%M:%S"));
                    print_statuses(&config, &statuses);
                }
            },
        )
        .await;
    Ok(())
}

fn print_statuses(config: &AppConfig, statuses: &HashMap<ProviderId, ProviderStatus>) {
    for provider in config.ordered_providers() {
        let Some(status) = statuses.get(&provider) else {
            continue;
        };
        match status {
            ProviderStatus::Disabled => continue,
            ProviderStatus::Idle => println!("{}: idle", provider.display_name()),
            ProviderStatus::Loading => println!("{}: loading...", provider.display_name()),
            ProviderStatus::Error(message) => {
                println!("{}: {}", provider.display_name(), message)
            }
            ProviderStatus::Loaded(result) => {
                match &result.plan {
                    Some(plan) => println!("{} ({})", provider.display_name(), plan),
                    None => println!("{}", provider.display_name()),
                }
                for line in &result.lines {
                    print_metric_line(line);
                }
            }
        }
    }
}

fn print_metric_line(line: &MetricLine) {
    match line {
        MetricLine::Progress(m) => {
            let filled = (m.fraction() * 20.0).round() as usize;
            let bar: String = "#".repeat(filled) + &"-".repeat(20 - filled);
            let resets = m
                .resets_at
                .map(|at| format!("  resets {}", at.format("%b %d %H:%M")))
                .unwrap_or_default();
            println!(
                "    {:<16} [{}] {} / {}{}",
                m.label,
                bar,
                m.formatted_used(),
                m.formatted_limit(),
                resets
            );
        }
        MetricLine::Text(m) => println!("    {:<16} {}", m.label, m.value),
        MetricLine::Badge(m) => println!("    {:<16} {}", m.label, m.text),
    }
}

fn statuses_to_json(
    config: &AppConfig,
    statuses: &HashMap<ProviderId, ProviderStatus>,
) -> String {
    let providers: Vec<serde_json::Value> = config
        .ordered_providers()
        .into_iter()
        .filter_map(|provider| {
            let status = statuses.get(&provider)?;
            Some(serde_json::json!({
                "provider": provider.as_str(),
                "displayName": provider.display_name(),
                "status": status_to_json(status),
            }))
        })
        .collect();
    serde_json::json!({ "providers": providers }).to_string()
}

fn status_to_json(status: &ProviderStatus) -> serde_json::Value {
    match status {
        ProviderStatus::Idle => serde_json::json!({ "state": "idle" }),
        ProviderStatus::Loading => serde_json::json!({ "state": "loading" }),
        ProviderStatus::Disabled => serde_json::json!({ "state": "disabled" }),
        ProviderStatus::Error(message) => {
            serde_json::json!({ "state": "error", "message": message })
        }
        ProviderStatus::Loaded(result) => {
            let lines: Vec<serde_json::Value> = result.lines.iter().map(line_to_json).collect();
            serde_json::json!({
                "state": "loaded",
                "plan": result.plan,
                "fetchedAt": result.fetched_at.to_rfc3339(),
                "lines": lines,
            })
        }
    }
}

fn line_to_json(line: &MetricLine) -> serde_json::Value {
    match line {
        MetricLine::Progress(m) => serde_json::json!({
            "type": "progress",
            "label": m.label,
            "used": m.used,
            "limit": m.limit,
            "fraction": m.fraction(),
            "resetsAt": m.resets_at.map(|at| at.to_rfc3339()),
            "periodSeconds": m.period_seconds,
        }),
        MetricLine::Text(m) => serde_json::json!({
            "type": "text",
            "label": m.label,
            "value": m.value,
        }),
        MetricLine::Badge(m) => serde_json::json!({
            "type": "badge",
            "label": m.label,
            "text": m.text,
            "color": m.color,
        }),
    }
}
