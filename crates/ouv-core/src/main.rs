use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ouv_cache::{CachePolicy, TtlSource};
use ouv_core::{run_simulation, DashboardConfig, DashboardContext};
use ouv_filter::Filter;
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("ouvidoria-dash")
        .version(ouv_core::VERSION)
        .about("Ouvidoria dashboard coordination tools")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Dashboard TOML configuration"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("ttl")
                .about("Resolve cache TTLs for endpoint keys")
                .arg(
                    Arg::new("keys")
                        .required(true)
                        .num_args(1..)
                        .help("Endpoint paths or request signatures"),
                ),
        )
        .subcommand(
            Command::new("ttl-table")
                .about("Print the cache policy table")
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .action(ArgAction::SetTrue)
                        .help("Whole seconds, as consumed server-side"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Load an endpoint through the data loader")
                .arg(Arg::new("path").required(true).help("Endpoint path"))
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .short('f')
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(Filter))
                        .help("Filter as field=value, field~value, field>=value or field<=value"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Click a theme chart against in-memory data and report page reloads")
                .arg(
                    Arg::new("label")
                        .long("label")
                        .default_value("Saneamento")
                        .help("Theme label to click"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("ouv_core=info,ouv_loader=info,ouvidoria_dash=info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<DashboardConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => DashboardConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(DashboardConfig::default().with_env_overrides()),
    }
}

fn describe_source(source: TtlSource<'_>) -> String {
    match source {
        TtlSource::Exact => "exact".to_string(),
        TtlSource::Wildcard(pattern) => format!("wildcard {pattern}"),
        TtlSource::Category(name) => format!("category {name}"),
        TtlSource::Default => "default".to_string(),
    }
}

fn policy_table_ms(policy: &CachePolicy) -> Vec<(String, u64)> {
    let config = policy.config();
    config
        .endpoints
        .iter()
        .map(|(pattern, ms)| (pattern.clone(), *ms))
        .chain(
            config
                .categories
                .iter()
                .map(|rule| (format!("category:{}", rule.name), rule.ttl_ms)),
        )
        .chain(std::iter::once(("default".to_string(), config.default_ttl_ms)))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"))?;
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("ttl", args)) => {
            let policy = CachePolicy::from_config(config.cache)?;
            for key in args.get_many::<String>("keys").into_iter().flatten() {
                let (ttl, source) = policy.resolve(key);
                println!("{key}\t{} ms\t{}", ttl.as_millis(), describe_source(source));
            }
        }
        Some(("ttl-table", args)) => {
            let policy = CachePolicy::from_config(config.cache)?;
            let seconds = args.get_flag("seconds");
            let table = if seconds {
                policy.server_table_secs()
            } else {
                policy_table_ms(&policy)
            };

            if args.get_flag("json") {
                let object: serde_json::Map<String, serde_json::Value> = table
                    .into_iter()
                    .map(|(pattern, ttl)| (pattern, ttl.into()))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&object)?);
            } else {
                let unit = if seconds { "s" } else { "ms" };
                for (pattern, ttl) in table {
                    println!("{pattern:<40} {ttl} {unit}");
                }
            }
        }
        Some(("fetch", args)) => {
            let path = args
                .get_one::<String>("path")
                .context("missing endpoint path")?;
            let filters: Vec<Filter> = args
                .get_many::<Filter>("filter")
                .into_iter()
                .flatten()
                .cloned()
                .collect();

            let ctx = DashboardContext::connect(config)?;
            let value = ctx.crossfilter().load_with(filters, path).await?;
            println!("{}", serde_json::to_string_pretty(&*value)?);
        }
        Some(("simulate", args)) => {
            let label = args
                .get_one::<String>("label")
                .map_or("Saneamento", String::as_str);
            let report = run_simulation(config, label).await?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
            if report.reloads.iter().any(|reload| reload.outcome.is_err()) {
                std::process::exit(1);
            }
        }
        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}
