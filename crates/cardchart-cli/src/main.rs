use cardchart::{Content, Engine, MemoryWorkspace, RenderContext};
use chrono::NaiveDate;
use serde_json::Value;
use std::io::Read;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Workspace(serde_yaml::Error),
    Render(cardchart::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Workspace(err) => write!(f, "invalid workspace: {err}"),
            CliError::Render(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Workspace(value)
    }
}

impl From<cardchart::Error> for CliError {
    fn from(value: cardchart::Error) -> Self {
        Self::Render(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Default)]
struct Args {
    workspace: Option<String>,
    project: Option<String>,
    content: Option<Content>,
    user: Option<String>,
    today: Option<NaiveDate>,
    pretty: bool,
    regions: bool,
    html_id: Option<String>,
    input: Option<String>,
}

fn usage() -> &'static str {
    "cardchart-cli\n\
\n\
USAGE:\n\
  cardchart-cli render --workspace <yaml> --project <identifier> [--card <number> | --card-defaults <type> | --page <name>] [--user <login>] [--today <YYYY-MM-DD>] [--pretty] [--regions] [--html <element-id>] [<params>|-]\n\
\n\
NOTES:\n\
  - If <params> is omitted or '-', the macro parameter block is read from stdin.\n\
  - The chart is rendered on a page named 'Preview' unless --card, --card-defaults or --page is given.\n\
  - render prints the chart description as JSON; --regions adds region_data and region_mql.\n\
  - --html prints an embeddable <div> instead of JSON.\n\
  - Set CARDCHART_LOG (e.g. 'cardchart=debug') to enable diagnostics on stderr.\n\
"
}

fn next_value<'a>(it: &mut impl Iterator<Item = &'a String>) -> Result<&'a String, CliError> {
    it.next().ok_or(CliError::Usage(usage()))
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();
    let mut saw_command = false;

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "render" if !saw_command => saw_command = true,
            "--workspace" => args.workspace = Some(next_value(&mut it)?.clone()),
            "--project" => args.project = Some(next_value(&mut it)?.clone()),
            "--card" | "--card-defaults" | "--page" => {
                if args.content.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                let value = next_value(&mut it)?;
                args.content = Some(match a.as_str() {
                    "--card" => Content::Card {
                        number: value.parse().map_err(|_| CliError::Usage(usage()))?,
                    },
                    "--card-defaults" => Content::CardDefaults {
                        card_type: value.clone(),
                    },
                    _ => Content::Page {
                        name: value.clone(),
                    },
                });
            }
            "--user" => args.user = Some(next_value(&mut it)?.clone()),
            "--today" => {
                let value = next_value(&mut it)?;
                args.today = Some(
                    NaiveDate::parse_from_str(value, "%Y-%m-%d")
                        .map_err(|_| CliError::Usage(usage()))?,
                );
            }
            "--pretty" => args.pretty = true,
            "--regions" => args.regions = true,
            "--html" => args.html_id = Some(next_value(&mut it)?.clone()),
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            "-" if args.input.is_none() => args.input = Some("-".to_string()),
            other if other.starts_with('-') => return Err(CliError::Usage(usage())),
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    if !saw_command || args.workspace.is_none() || args.project.is_none() {
        return Err(CliError::Usage(usage()));
    }
    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_json(value: &Value, pretty: bool) -> Result<(), CliError> {
    if pretty {
        serde_json::to_writer_pretty(std::io::stdout().lock(), value)?;
    } else {
        serde_json::to_writer(std::io::stdout().lock(), value)?;
    }
    println!();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CARDCHART_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Args) -> Result<(), CliError> {
    let (Some(workspace_path), Some(project)) = (args.workspace, args.project) else {
        return Err(CliError::Usage(usage()));
    };
    let workspace = MemoryWorkspace::from_yaml(&std::fs::read_to_string(&workspace_path)?)?;
    let params = read_input(args.input.as_deref())?;

    let content = args.content.unwrap_or_else(|| Content::Page {
        name: "Preview".to_string(),
    });
    let mut ctx = RenderContext::new(project, content);
    if let Some(user) = args.user {
        ctx = ctx.with_current_user(user);
    }
    tracing::debug!(workspace = %workspace_path, project = ctx.project(), "rendering chart");

    let engine = Engine::new().with_fixed_today(args.today);
    let chart = engine.render_sync(&params, &ctx, workspace.collaborators())?;
    for notice in chart.notices() {
        eprintln!("note: {notice}");
    }

    if let Some(id) = args.html_id.as_deref() {
        println!("{}", cardchart::html::embed(&chart, id));
        return Ok(());
    }
    let description = if args.regions {
        chart.description_with_regions()
    } else {
        chart.description()
    };
    write_json(&description, args.pretty)
}

fn main() {
    init_tracing();

    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
