use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signals::autogen::project::load_dbt_config;
use signals::autogen::{
    discover_projects, generate_project, init_project, BucketKind, ProjectLayout,
    SqlModelRenderer,
};
use signals::client::{ClientSettings, SignalsClient};
use signals::definitions::View;
use tracing::{error, info, warn, Level};

/// Generate dbt projects for Signals attribute views
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Registry API URL (overrides config file and SIGNALS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[arg(long, global = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    api_key_id: Option<String>,

    #[arg(long, global = true)]
    org_id: Option<String>,

    /// Directory holding one generated project per view
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch views from the registry and write their base configs
    Init {
        /// Only this view; all offline views otherwise
        #[arg(long)]
        view: Option<String>,
        #[arg(long, requires = "view")]
        version: Option<u32>,
    },
    /// Build SQL contexts and render models for initialized projects
    Generate {
        /// Only this project; every initialized project otherwise
        #[arg(long)]
        project: Option<String>,
    },
    /// Init and generate from a view definition file, without the registry
    Compile {
        /// JSON file holding one view
        view_file: PathBuf,
    },
    /// Print one attribute bucket of a generated project
    Inspect {
        project: String,
        /// lifetime_aggregates, last_n_day_aggregates, first_value_attributes,
        /// last_value_attributes or unique_list_attributes
        bucket: String,
    },
    /// Check that the registry accepts the configured credentials
    TestConnection,
}

impl Cli {
    fn settings(&self) -> Result<ClientSettings> {
        let mut settings = ClientSettings::load()?;
        let overrides = [
            (&self.api_url, &mut settings.api_url),
            (&self.api_key, &mut settings.api_key),
            (&self.api_key_id, &mut settings.api_key_id),
            (&self.org_id, &mut settings.org_id),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        Ok(settings)
    }

    fn client(&self) -> Result<SignalsClient> {
        Ok(SignalsClient::new(self.settings()?)?)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    if let Err(err) = run(cli).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let renderer = SqlModelRenderer::default();

    match &cli.command {
        Command::Init { view, version } => {
            let client = cli.client()?;
            let views = match view {
                Some(name) => vec![client.get_view(name, version.unwrap_or(1)).await?],
                None => client
                    .list_views()
                    .await?
                    .into_iter()
                    .filter(|v| v.offline)
                    .collect(),
            };
            if views.is_empty() {
                warn!("no offline views to initialize");
            }
            for view in &views {
                init_project(&cli.repo, view, &renderer)?;
            }
        }
        Command::Generate { project } => {
            let projects = match project {
                Some(name) => vec![ProjectLayout::new(&cli.repo, name.as_str())],
                None => discover_projects(&cli.repo)?,
            };
            if projects.is_empty() {
                warn!(repo = %cli.repo.display(), "no initialized projects found");
            }
            for layout in &projects {
                generate_project(layout, &renderer)?;
            }
        }
        Command::Compile { view_file } => {
            let content = std::fs::read_to_string(view_file)
                .with_context(|| format!("Could not read {}", view_file.display()))?;
            let view: View = serde_json::from_str(&content)
                .with_context(|| format!("Could not parse view {}", view_file.display()))?;
            let layout = init_project(&cli.repo, &view, &renderer)?;
            let written = generate_project(&layout, &renderer)?;
            for path in written {
                println!("{}", path.display());
            }
        }
        Command::Inspect { project, bucket } => {
            let kind: BucketKind = bucket.parse()?;
            let dbt = load_dbt_config(&ProjectLayout::new(&cli.repo, project.as_str()))?;
            println!("{}", serde_json::to_string_pretty(dbt.attributes.get(kind))?);
        }
        Command::TestConnection => {
            let client = cli.client()?;
            client.test_connection().await?;
            info!(url = %client.settings().base_url(), "connection ok");
        }
    }
    Ok(())
}
