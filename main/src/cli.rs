use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use job_engine::{EndpointRequest, ExportFormat};

#[derive(Debug, Parser)]
#[command(name = "datagen", about = "Generate synthetic JSON records from a prompt")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => Self::Json,
            FormatArg::Csv => Self::Csv,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EndpointArgs {
    /// Call the owner's own gateway instead of the configured endpoint
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    pub external: bool,

    /// Gateway base URL; falls back to the owner's saved settings
    #[arg(long)]
    pub base_url: Option<String>,

    /// Path appended to the base URL
    #[arg(long)]
    pub path: Option<String>,

    #[arg(long)]
    pub model: Option<String>,
}

impl From<EndpointArgs> for EndpointRequest {
    fn from(args: EndpointArgs) -> Self {
        Self {
            use_external_api: args.external,
            base_url: args.base_url,
            path: args.path,
            model: args.model,
            parameters: None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PromptArgs {
    #[arg(long, default_value = "local")]
    pub owner: String,

    /// What each record should describe
    #[arg(long)]
    pub prompt: String,

    /// Number of records to generate
    #[arg(long, default_value_t = 10)]
    pub count: u32,

    /// Add a classification label to every record
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    pub dataset: bool,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    pub format: FormatArg,

    /// Write to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a schema for a prompt and save it as a draft
    Draft {
        #[command(flatten)]
        prompt: PromptArgs,
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Where to write the draft
        #[arg(long, default_value = "draft.json")]
        out: PathBuf,
    },
    /// Regenerate the schema of a saved draft
    Refresh {
        #[arg(long, default_value = "draft.json")]
        draft: PathBuf,
    },
    /// Queue a job from a saved draft
    Confirm {
        #[arg(long, default_value = "draft.json")]
        draft: PathBuf,
        /// Comma-separated peer ids; defaults to the configured peers
        #[arg(long, value_delimiter = ',')]
        peers: Option<Vec<String>>,
    },
    /// Show a job with its shards
    Status { job_id: String },
    /// List jobs of an owner, or the pending jobs of a peer
    Jobs {
        #[arg(long, conflicts_with = "peer")]
        owner: Option<String>,
        #[arg(long)]
        peer: Option<String>,
    },
    /// Export the records of a finished job
    Export {
        job_id: String,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Draft, confirm and run a job on this process alone
    Generate {
        #[command(flatten)]
        prompt: PromptArgs,
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run a single-process task
    Task {
        #[command(flatten)]
        prompt: PromptArgs,
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// List the tasks of an owner
    Tasks {
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Export the records of a task
    TaskExport {
        task_id: String,
        #[arg(long, default_value = "local")]
        owner: String,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Show or update an owner's gateway settings
    Settings {
        #[arg(long, default_value = "local")]
        owner: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Print the global generation counters
    Metrics,
}
