use std::{process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use willow::{
    application::{
        accounts::{AccountError, AccountService},
        blog::{BlogService, HostTarget},
        domain_validation::DomainValidationService,
        error::AppError,
        jobs::{
            ImageProcessingJobPayload, JobQueue, JobWorkerContext, ProcessBlobJobPayload,
            PurgeTokensContext, process_blob_after_creation_job, process_image_job,
            process_purge_expired_tokens_job, purge_expired_tokens_schedule,
        },
        posts::{PostWriteError, PostWriteService},
        render::{MarkdownRenderer, render_service},
        repos::{
            BlobsRepo, BlogsRepo, HealthCheck, PostsRepo, PostsWriteRepo, TagsRepo, TokensRepo,
            UsersRepo,
        },
        site::SiteContext,
        sitemap::SitemapService,
        syndication::SyndicationService,
        tokens::{TokenError, TokenService},
        uploads::{UploadPolicy, UploadService},
    },
    config,
    domain::{blogs::BlogSettings, types::JobType},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiRateLimiter, ApiState, HttpState, RouterState},
        telemetry,
        uploads::UploadStorage,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Users(config::UsersCommand::Create(args)) => {
            run_create_user(settings, args).await
        }
        config::Command::Blogs(config::BlogsCommand::Create(args)) => {
            run_create_blog(settings, args).await
        }
        config::Command::Tokens(command) => run_tokens(settings, command).await,
        config::Command::Posts(command) => run_posts(settings, command).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    PostgresRepositories::setup_job_storage(job_repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::jobs(err.to_string())))?;

    if settings.uploads.signing_secret_is_default {
        warn!(
            target = "willow::serve",
            "uploads.signing_secret is not configured; using the development secret"
        );
    }

    let app = build_application_context(http_repositories, job_repositories.clone(), &settings)?;
    let monitor_handle = spawn_job_monitor(
        job_repositories,
        app.job_context.clone(),
        app.purge_context.clone(),
        &settings.jobs,
    );

    let result = serve_http(&settings, app.http_state, app.api_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_create_user(
    settings: config::Settings,
    args: config::CreateUserArgs,
) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let accounts = build_account_service(&repositories);

    let user = accounts
        .create_user(&args.email, &args.name, &args.password)
        .await
        .map_err(account_error)?;
    info!(target = "willow::cli", user_id = %user.id, email = %user.email, "Created user");
    println!("{}", user.id);
    Ok(())
}

async fn run_create_blog(
    settings: config::Settings,
    args: config::CreateBlogArgs,
) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let accounts = build_account_service(&repositories);

    let user = accounts.find_user(&args.email).await.map_err(account_error)?;
    let blog = accounts
        .create_blog(
            &user,
            BlogSettings {
                subdomain: args.subdomain,
                title: args.title,
                custom_domain: args.custom_domain,
                primary: args.primary,
                ..BlogSettings::default()
            },
        )
        .await
        .map_err(account_error)?;
    println!("{}", blog.domain(&settings.site.root_domain));
    Ok(())
}

async fn run_tokens(
    settings: config::Settings,
    command: config::TokensCommand,
) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let accounts = build_account_service(&repositories);
    let tokens = build_token_service(&repositories);

    match command {
        config::TokensCommand::Issue(args) => {
            let user = accounts.find_user(&args.email).await.map_err(account_error)?;
            let expires_at = args
                .expires_in_days
                .map(|days| OffsetDateTime::now_utc() + time::Duration::days(i64::from(days)));
            let record = tokens
                .issue(&user, &args.name, expires_at)
                .await
                .map_err(token_error)?;
            println!("{}", record.token);
        }
        config::TokensCommand::List(args) => {
            let user = accounts.find_user(&args.email).await.map_err(account_error)?;
            let now = OffsetDateTime::now_utc();
            for record in tokens.list(&user).await.map_err(token_error)? {
                let expiry = record
                    .expires_at
                    .map(|at| at.to_string())
                    .unwrap_or_else(|| "never".to_string());
                let status = if record.is_active(now) { "active" } else { "expired" };
                println!("{}\t{}\t{}\t{status}", record.id, record.name, expiry);
            }
        }
        config::TokensCommand::Revoke(args) => {
            let user = accounts.find_user(&args.email).await.map_err(account_error)?;
            let name = args.name.trim();
            let matching: Vec<_> = tokens
                .list(&user)
                .await
                .map_err(token_error)?
                .into_iter()
                .filter(|record| record.name == name)
                .collect();
            if matching.is_empty() {
                return Err(AppError::NotFound);
            }
            for record in matching {
                tokens.revoke(&user, record.id).await.map_err(token_error)?;
                info!(target = "willow::cli", token_id = %record.id, "Revoked API token");
            }
        }
    }
    Ok(())
}

async fn run_posts(
    settings: config::Settings,
    command: config::PostsCommand,
) -> Result<(), AppError> {
    let (repositories, _) = init_repositories(&settings).await?;
    let blogs = build_blog_service(&repositories, &settings);
    let posts = build_post_write_service(&repositories);

    let domain = match &command {
        config::PostsCommand::Export(args) => args.domain.clone(),
        config::PostsCommand::Import(args) => args.domain.clone(),
    };
    let ctx = match blogs.resolve(&domain).await {
        Ok(HostTarget::Blog(ctx)) => ctx,
        Ok(HostTarget::Root) => {
            return Err(AppError::validation(format!("`{domain}` is not a blog domain")));
        }
        Err(err) => return Err(AppError::unexpected(err.to_string())),
    };

    match command {
        config::PostsCommand::Export(args) => {
            let post = posts
                .find_in_blog(&ctx.blog, &args.slug)
                .await
                .map_err(post_error)?;
            print!("{}", posts.export_markdown(&post).map_err(post_error)?);
        }
        config::PostsCommand::Import(args) => {
            let text = tokio::fs::read_to_string(&args.file)
                .await
                .map_err(|err| AppError::from(InfraError::Io(err)))?;
            let post = posts
                .import_markdown(&ctx.owner, &ctx.blog, &text)
                .await
                .map_err(post_error)?;
            info!(
                target = "willow::cli",
                post_id = %post.id,
                slug = %post.slug,
                "Imported post"
            );
            println!("{}", post.slug);
        }
    }
    Ok(())
}

fn account_error(err: AccountError) -> AppError {
    match err {
        AccountError::Validation(errors) => AppError::validation(errors.to_string()),
        AccountError::UnknownUser(_) => AppError::NotFound,
        other => AppError::unexpected(other.to_string()),
    }
}

fn token_error(err: TokenError) -> AppError {
    match err {
        TokenError::Validation(errors) => AppError::validation(errors.to_string()),
        TokenError::NotFound => AppError::NotFound,
        other => AppError::unexpected(other.to_string()),
    }
}

fn post_error(err: PostWriteError) -> AppError {
    match err {
        PostWriteError::Validation(errors) => AppError::validation(errors.to_string()),
        PostWriteError::NotFound => AppError::NotFound,
        other => AppError::unexpected(other.to_string()),
    }
}

struct ApplicationContext {
    http_state: HttpState,
    api_state: ApiState,
    job_context: JobWorkerContext,
    purge_context: PurgeTokensContext,
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(InfraError::from)?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(InfraError::from)?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(InfraError::from)?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

fn site_context(settings: &config::Settings) -> SiteContext {
    SiteContext {
        root_domain: settings.site.root_domain.clone(),
        local_mode: settings.site.local_mode,
        local_port: settings
            .site
            .local_mode
            .then_some(settings.server.addr.port()),
    }
}

fn build_post_write_service(repositories: &Arc<PostgresRepositories>) -> PostWriteService {
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let blogs_repo: Arc<dyn BlogsRepo> = repositories.clone();
    let renderer: Arc<dyn MarkdownRenderer> = render_service();
    PostWriteService::new(posts_write_repo, blogs_repo, renderer)
}

fn build_account_service(repositories: &Arc<PostgresRepositories>) -> AccountService {
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let blogs_repo: Arc<dyn BlogsRepo> = repositories.clone();
    AccountService::new(
        users_repo,
        blogs_repo,
        build_post_write_service(repositories),
        render_service(),
    )
}

fn build_token_service(repositories: &Arc<PostgresRepositories>) -> TokenService {
    let tokens_repo: Arc<dyn TokensRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    TokenService::new(tokens_repo, users_repo)
}

fn build_blog_service(
    repositories: &Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> BlogService {
    let blogs_repo: Arc<dyn BlogsRepo> = repositories.clone();
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let tags_repo: Arc<dyn TagsRepo> = repositories.clone();
    BlogService::new(
        blogs_repo,
        users_repo,
        posts_repo,
        tags_repo,
        site_context(settings),
        settings.pagination.per_page.get(),
    )
}

fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let posts_repo: Arc<dyn PostsRepo> = http_repositories.clone();
    let tags_repo: Arc<dyn TagsRepo> = http_repositories.clone();
    let blogs_repo: Arc<dyn BlogsRepo> = http_repositories.clone();
    let blobs_repo: Arc<dyn BlobsRepo> = http_repositories.clone();
    let http_queue: Arc<dyn JobQueue> = http_repositories.clone();
    let health: Arc<dyn HealthCheck> = http_repositories.clone();
    let renderer: Arc<dyn MarkdownRenderer> = render_service();
    let site = site_context(settings);

    let upload_storage = Arc::new(
        UploadStorage::new(settings.uploads.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let upload_service = Arc::new(UploadService::new(
        blobs_repo,
        upload_storage.clone(),
        http_queue,
        UploadPolicy {
            signing_secret: settings.uploads.signing_secret.clone(),
            ttl: time::Duration::try_from(settings.uploads.direct_upload_ttl)
                .unwrap_or(time::Duration::minutes(5)),
            public_read_acl: settings.uploads.public_read_acl,
            max_bytes: settings.uploads.max_request_bytes.get(),
        },
    ));

    let token_service = Arc::new(build_token_service(&http_repositories));

    let http_state = HttpState {
        blogs: Arc::new(build_blog_service(&http_repositories, settings)),
        syndication: Arc::new(SyndicationService::new(
            posts_repo.clone(),
            renderer,
            site.clone(),
        )),
        sitemap: Arc::new(SitemapService::new(posts_repo, tags_repo, site.clone())),
        uploads: upload_service.clone(),
        health,
    };

    let rate_limiter = Arc::new(ApiRateLimiter::new(
        Duration::from_secs(u64::from(settings.api_rate_limit.window_seconds.get())),
        settings.api_rate_limit.max_requests.get(),
    ));

    let api_state = ApiState {
        tokens: token_service.clone(),
        posts: Arc::new(build_post_write_service(&http_repositories)),
        domains: Arc::new(DomainValidationService::new(
            blogs_repo,
            site.root_domain.clone(),
        )),
        uploads: upload_service,
        rate_limiter,
    };

    let job_blobs: Arc<dyn BlobsRepo> = job_repositories.clone();
    let job_queue: Arc<dyn JobQueue> = job_repositories;
    let job_context = JobWorkerContext {
        blobs: job_blobs,
        storage: upload_storage,
        queue: job_queue,
    };

    Ok(ApplicationContext {
        http_state,
        api_state,
        job_context,
        purge_context: PurgeTokensContext {
            tokens: token_service,
        },
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    purge_context: PurgeTokensContext,
    jobs: &config::JobsSettings,
) -> tokio::task::JoinHandle<()> {
    let intake_storage: PostgresStorage<ProcessBlobJobPayload> = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::ProcessBlobAfterCreation.as_str()),
    );
    let image_storage: PostgresStorage<ImageProcessingJobPayload> =
        PostgresStorage::new_with_config(
            repositories.pool().clone(),
            ApalisSqlConfig::new(JobType::ImageProcessing.as_str()),
        );

    let intake_concurrency = jobs.blob_intake_concurrency.get() as usize;
    let image_concurrency = jobs.image_processing_concurrency.get() as usize;

    let intake_worker = WorkerBuilder::new("blob-intake-worker")
        .concurrency(intake_concurrency)
        .data(context.clone())
        .backend(intake_storage)
        .build_fn(process_blob_after_creation_job);
    let image_worker = WorkerBuilder::new("image-processing-worker")
        .concurrency(image_concurrency)
        .data(context)
        .backend(image_storage)
        .build_fn(process_image_job);

    // Hourly sweep of expired API tokens
    let purge_worker = WorkerBuilder::new("purge-expired-tokens-worker")
        .data(purge_context)
        .backend(CronStream::new(purge_expired_tokens_schedule()))
        .build_fn(process_purge_expired_tokens_job);

    let monitor = Monitor::new()
        .register(intake_worker)
        .register(image_worker)
        .register(purge_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    api_state: ApiState,
) -> Result<(), AppError> {
    let router_state = RouterState {
        http: http_state,
        api: api_state,
    };
    let upload_body_limit =
        usize::try_from(settings.uploads.max_request_bytes.get()).unwrap_or(usize::MAX);
    let app = http::build_app(router_state, upload_body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;
    info!(target = "willow::serve", addr = %settings.server.addr, "Listening");

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result,
        () = shutdown_signal() => {
            info!(target = "willow::serve", "Shutting down");
            shutdown.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "willow::serve",
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    Ok(())
                }
            }
        }
    };

    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "willow::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "willow::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
