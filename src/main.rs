use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tasklane::app::App;
use tasklane::config::Config;
use tasklane::models::Priority;

mod cmd;

#[derive(Parser)]
#[command(name = "tasklane")]
#[command(version, about = "Todo lists from the terminal")]
pub struct Cli {
    /// Verbose logging (overrides TASKLANE_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login { email: String },
    /// Create a new account
    Signup {
        email: String,
        /// Full name for the new profile
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out and discard the saved session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Request a password-reset mail
    ResetPassword { email: String },
    /// Show or manage lists
    Lists {
        #[command(subcommand)]
        command: Option<ListCommands>,
    },
    /// Show or manage the tasks of one list
    Tasks {
        /// The list: its id, 1-based position, or name
        list: String,
        #[command(subcommand)]
        command: Option<TaskCommands>,
    },
    /// Search tasks by title across all lists
    Search { query: String },
    /// Stream live changes from other devices
    Watch,
}

#[derive(Subcommand)]
pub enum ListCommands {
    /// Create a list at the end of the current order
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// 6-digit hex color, e.g. #10B981 (defaults to the first palette entry)
        #[arg(long)]
        color: Option<String>,
    },
    /// Edit a list's name, description, or color
    Edit {
        /// The list: its id, 1-based position, or name
        list: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a list (its tasks go with it)
    Rm {
        /// The list: its id, 1-based position, or name
        list: String,
    },
    /// Move a list between positions (1-based, as shown by `tasklane lists`)
    Move { from: usize, to: usize },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Add a task at the end of the list
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// high, medium, or low
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Toggle a task's completion
    Done {
        /// The task: its id, 1-based position, or title
        task: String,
    },
    /// Edit a task's title, description, or priority
    Edit {
        /// The task: its id, 1-based position, or title
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Delete a task
    Rm {
        /// The task: its id, 1-based position, or title
        task: String,
    },
    /// Move a task between positions (1-based)
    Move { from: usize, to: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("tasklane=debug")
    } else {
        EnvFilter::try_from_env("TASKLANE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Missing connectivity settings are fatal before any command runs.
    let config = Config::from_env()?;
    let app = App::new(config);

    match cli.command {
        Commands::Login { email } => cmd::cmd_login(&app, &email).await?,
        Commands::Signup { email, name } => cmd::cmd_signup(&app, &email, name.as_deref()).await?,
        Commands::Logout => cmd::cmd_logout(&app).await?,
        Commands::Whoami => cmd::cmd_whoami(&app).await?,
        Commands::ResetPassword { email } => cmd::cmd_reset_password(&app, &email).await?,
        Commands::Lists { command } => cmd::cmd_lists(&app, command).await?,
        Commands::Tasks { list, command } => cmd::cmd_tasks(&app, &list, command).await?,
        Commands::Search { query } => cmd::cmd_search(&app, &query).await?,
        Commands::Watch => cmd::cmd_watch(&app).await?,
    }

    Ok(())
}
