use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the mangasync binary.
#[derive(Debug, Parser)]
#[command(
    name = "mangasync",
    version,
    about = "Keep a manga platform query cache in sync with server pushes"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "MANGASYNC_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Follow the realtime channel and log cache changes until interrupted.
    Watch(WatchArgs),
    /// Read and write comment threads.
    Comments(CommentsArgs),
    /// Print a home page section.
    Sections(SectionsArgs),
    /// Print the platform ad intensity setting.
    #[command(name = "ad-intensity")]
    AdIntensity(AdIntensityArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the platform origin, e.g. https://example.com.
    #[arg(long = "origin", global = true, value_name = "URL")]
    pub origin: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the HTTP request timeout.
    #[arg(long = "http-timeout-seconds", global = true, value_name = "SECONDS")]
    pub http_timeout_seconds: Option<u64>,

    /// Act as this user id.
    #[arg(long = "as-user", global = true, value_name = "ID")]
    pub user_id: Option<String>,

    /// Username shown on optimistic comments.
    #[arg(long = "username", global = true, value_name = "NAME")]
    pub username: Option<String>,

    /// Role of the acting user (user|staff|admin|owner).
    #[arg(long = "role", global = true, value_name = "ROLE")]
    pub role: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WatchArgs {
    /// Toggle automatic reconnects.
    #[arg(
        long = "reconnect",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub reconnect: Option<bool>,

    /// Override the delay between reconnect attempts.
    #[arg(long = "reconnect-interval-ms", value_name = "MILLIS")]
    pub reconnect_interval_ms: Option<u64>,

    /// Override the keep-alive ping interval.
    #[arg(long = "heartbeat-interval-ms", value_name = "MILLIS")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Override the WebSocket path on the origin.
    #[arg(long = "ws-path", value_name = "PATH")]
    pub ws_path: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CommentsArgs {
    #[command(subcommand)]
    pub command: CommentsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommentsCommand {
    /// List a thread, newest first.
    List(ThreadArgs),
    /// Post a comment.
    Post(PostArgs),
    /// Replace the content of your comment.
    Edit(EditArgs),
    /// Delete a comment.
    Delete(DeleteArgs),
}

#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct ThreadArgs {
    /// Series whose thread to use.
    #[arg(long = "series", value_name = "ID")]
    pub series: Option<String>,

    /// Chapter whose thread to use.
    #[arg(long = "chapter", value_name = "ID")]
    pub chapter: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PostArgs {
    #[command(flatten)]
    pub thread: ThreadArgs,

    /// Comment text.
    #[arg(value_name = "CONTENT")]
    pub content: String,
}

#[derive(Debug, Args, Clone)]
pub struct EditArgs {
    #[command(flatten)]
    pub thread: ThreadArgs,

    #[arg(value_name = "COMMENT_ID")]
    pub comment_id: String,

    /// Replacement text.
    #[arg(value_name = "CONTENT")]
    pub content: String,
}

#[derive(Debug, Args, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub thread: ThreadArgs,

    #[arg(value_name = "COMMENT_ID")]
    pub comment_id: String,

    /// Skip the confirmation prompt.
    #[arg(long, short = 'y', action = clap::ArgAction::SetTrue)]
    pub yes: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SectionsArgs {
    /// featured, pinned or popular.
    #[arg(value_name = "SECTION")]
    pub section: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct AdIntensityArgs {
    /// Keep refetching on the configured interval until interrupted.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub watch: bool,

    /// Override the refetch interval.
    #[arg(long = "refetch-interval-seconds", value_name = "SECONDS")]
    pub refetch_interval_seconds: Option<u64>,
}
