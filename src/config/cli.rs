use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the willow binary.
#[derive(Debug, Parser)]
#[command(name = "willow", version, about = "Multi-tenant blogging server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WILLOW_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server and background workers.
    Serve(Box<ServeArgs>),
    /// Manage user accounts.
    #[command(subcommand)]
    Users(UsersCommand),
    /// Manage blogs.
    #[command(subcommand)]
    Blogs(BlogsCommand),
    /// Manage API tokens.
    #[command(subcommand)]
    Tokens(TokensCommand),
    /// Move posts in and out as frontmatter markdown.
    #[command(subcommand)]
    Posts(PostsCommand),
}

impl Command {
    /// The database override shared by every management command.
    pub fn database_override(&self) -> Option<&DatabaseOverride> {
        match self {
            Command::Serve(_) => None,
            Command::Users(UsersCommand::Create(args)) => Some(&args.database),
            Command::Blogs(BlogsCommand::Create(args)) => Some(&args.database),
            Command::Tokens(TokensCommand::Issue(args)) => Some(&args.database),
            Command::Tokens(TokensCommand::List(args)) => Some(&args.database),
            Command::Tokens(TokensCommand::Revoke(args)) => Some(&args.database),
            Command::Posts(PostsCommand::Export(args)) => Some(&args.database),
            Command::Posts(PostsCommand::Import(args)) => Some(&args.database),
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum UsersCommand {
    /// Create a user account.
    Create(CreateUserArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CreateUserArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[arg(long, value_name = "PASSWORD", env = "WILLOW_USER_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, Subcommand, Clone)]
pub enum BlogsCommand {
    /// Create a blog for an existing user.
    Create(CreateBlogArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CreateBlogArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Owner's email address.
    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    #[arg(long, value_name = "SUBDOMAIN")]
    pub subdomain: String,

    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    #[arg(long = "custom-domain", value_name = "DOMAIN")]
    pub custom_domain: Option<String>,

    /// Mark this blog as the owner's primary blog.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub primary: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum TokensCommand {
    /// Issue a new API token and print it once.
    Issue(IssueTokenArgs),
    /// List a user's tokens.
    List(ListTokensArgs),
    /// Revoke a token by name.
    Revoke(RevokeTokenArgs),
}

#[derive(Debug, Args, Clone)]
pub struct IssueTokenArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    #[arg(long, value_name = "NAME")]
    pub name: String,

    /// Days until the token expires; omit for a token that never expires.
    #[arg(long = "expires-in-days", value_name = "DAYS")]
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct ListTokensArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[arg(long, value_name = "EMAIL")]
    pub email: String,
}

#[derive(Debug, Args, Clone)]
pub struct RevokeTokenArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    #[arg(long, value_name = "NAME")]
    pub name: String,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PostsCommand {
    /// Print a post as a frontmatter markdown document.
    Export(ExportPostArgs),
    /// Create a post from a frontmatter markdown document.
    Import(ImportPostArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ExportPostArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Blog host, either `{subdomain}.{root_domain}` or a custom domain.
    #[arg(long, value_name = "DOMAIN")]
    pub domain: String,

    #[arg(long, value_name = "SLUG")]
    pub slug: String,
}

#[derive(Debug, Args, Clone)]
pub struct ImportPostArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Blog host, either `{subdomain}.{root_domain}` or a custom domain.
    #[arg(long, value_name = "DOMAIN")]
    pub domain: String,

    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the root domain blogs are served under.
    #[arg(long = "site-root-domain", value_name = "DOMAIN")]
    pub site_root_domain: Option<String>,

    /// Accept `*.localhost` hosts for local development.
    #[arg(
        long = "site-local-mode",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub site_local_mode: Option<bool>,

    /// Override the uploads directory.
    #[arg(long = "uploads-directory", value_name = "PATH")]
    pub uploads_directory: Option<PathBuf>,

    /// Override the maximum request size for uploads in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the API rate limit window size.
    #[arg(long = "api-rate-limit-window-seconds", value_name = "SECONDS")]
    pub api_rate_limit_window_seconds: Option<u64>,

    /// Override the API rate limit request ceiling.
    #[arg(long = "api-rate-limit-max-requests", value_name = "COUNT")]
    pub api_rate_limit_max_requests: Option<u64>,

    /// Override the image processing worker concurrency.
    #[arg(long = "jobs-image-processing-concurrency", value_name = "COUNT")]
    pub jobs_image_processing_concurrency: Option<u32>,
}
