use std::{
    io::{self, BufRead, Write},
    process,
    str::FromStr,
    sync::Arc,
};

use mangasync::{
    application::{
        ad_intensity::{self, AdIntensityService},
        comments::{CommentService, CommentTarget},
        error::AppError,
        notifications::NotificationCenter,
        sections::{Section, SectionService},
    },
    cache::{CacheChange, QueryCache},
    config::{self, CommentsCommand, ThreadArgs},
    infra::{error::InfraError, http::ApiClient, telemetry},
    realtime::{EventRouter, RealtimeSync, TransportOptions, connect_with_router},
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

/// Shared handles every command runs against.
struct Session {
    settings: config::Settings,
    cache: QueryCache,
    notifications: NotificationCenter,
    client: Arc<ApiClient>,
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Watch(config::WatchArgs::default()));

    telemetry::init(&settings.logging)?;

    let client = Arc::new(ApiClient::new(
        settings.server.origin.as_str(),
        settings.http.timeout,
    )?);
    let session = Session {
        settings,
        cache: QueryCache::new(),
        notifications: NotificationCenter::new(),
        client,
    };

    match command {
        config::Command::Watch(_) => run_watch(&session).await,
        config::Command::Comments(args) => run_comments(&session, args.command).await,
        config::Command::Sections(args) => run_sections(&session, &args.section).await,
        config::Command::AdIntensity(args) => run_ad_intensity(&session, args.watch).await,
    }
}

async fn run_watch(session: &Session) -> Result<(), AppError> {
    let realtime = &session.settings.realtime;
    let router = EventRouter::new();
    let sync = RealtimeSync::new(
        router.clone(),
        session.cache.clone(),
        session.notifications.clone(),
    );
    sync.start();

    let ad_intensity = Arc::new(AdIntensityService::new(
        session.client.clone(),
        session.cache.clone(),
    ));
    let refetch = ad_intensity.spawn_refetch(session.settings.ad_intensity.refetch_interval);

    let options = TransportOptions {
        reconnect: realtime.reconnect,
        reconnect_interval: realtime.reconnect_interval,
        heartbeat_interval: realtime.heartbeat_interval,
        on_connect: Some(Arc::new(|| info!("Realtime channel connected"))),
        on_disconnect: Some(Arc::new(|| warn!("Realtime channel disconnected"))),
        on_error: None,
    };
    let transport = connect_with_router(realtime.url.as_str(), options, router)
        .map_err(InfraError::from)?;
    info!(url = %transport.url(), "Watching realtime channel; press Ctrl-C to stop");

    let mut changes = session.cache.subscribe();
    let mut notices = session.notifications.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.map_err(InfraError::from)?;
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => log_cache_change(&change),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Cache change log lagged"),
                Err(RecvError::Closed) => break,
            },
            notice = notices.recv() => match notice {
                Ok(notice) => print_json(&notice)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    sync.stop();
    transport.shutdown().await;
    refetch.stop().await;
    info!("Stopped watching");
    Ok(())
}

fn log_cache_change(change: &CacheChange) {
    match change {
        CacheChange::Updated { key, version } => debug!(key = %key, version, "Cache updated"),
        CacheChange::Invalidated { key } => info!(key = %key, "Cache entry marked stale"),
        CacheChange::Evicted { key } => info!(key = %key, "Cache entry evicted"),
        CacheChange::Restored { key } => info!(key = %key, "Cache entry restored"),
    }
}

async fn run_comments(session: &Session, command: CommentsCommand) -> Result<(), AppError> {
    let thread = match &command {
        CommentsCommand::List(thread) => thread,
        CommentsCommand::Post(args) => &args.thread,
        CommentsCommand::Edit(args) => &args.thread,
        CommentsCommand::Delete(args) => &args.thread,
    };
    let service = CommentService::new(
        session.client.clone(),
        session.cache.clone(),
        session.notifications.clone(),
        thread_target(thread)?,
        session.settings.viewer.clone(),
    );

    // Failures already surface as notifications; print those and exit non-zero.
    let outcome = match command {
        CommentsCommand::List(_) => {
            let comments = service.load().await?;
            return print_json(&comments);
        }
        CommentsCommand::Post(args) => {
            service.load().await?;
            service.post_text(&args.content).await
        }
        CommentsCommand::Edit(args) => {
            service.load().await?;
            service.edit_text(&args.comment_id, &args.content).await
        }
        CommentsCommand::Delete(args) => {
            service.load().await?;
            let yes = args.yes;
            service
                .delete(&args.comment_id, |prompt| yes || confirm(prompt))
                .await
                .map(drop)
        }
    };

    for notification in session.notifications.drain(usize::MAX) {
        print_json(&notification)?;
    }
    outcome.map_err(AppError::from)
}

fn thread_target(thread: &ThreadArgs) -> Result<CommentTarget, AppError> {
    match (&thread.series, &thread.chapter) {
        (Some(series), None) => Ok(CommentTarget::Series(series.clone())),
        (None, Some(chapter)) => Ok(CommentTarget::Chapter(chapter.clone())),
        _ => Err(AppError::unexpected(
            "exactly one of --series or --chapter is required",
        )),
    }
}

fn confirm(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    if io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

async fn run_sections(session: &Session, section: &str) -> Result<(), AppError> {
    let section = Section::from_str(section)?;
    let service = SectionService::new(session.client.clone(), session.cache.clone());
    match section {
        Section::PopularToday => print_json(&service.popular_today().await),
        other => print_json(&service.load(other).await),
    }
}

async fn run_ad_intensity(session: &Session, watch: bool) -> Result<(), AppError> {
    let service = Arc::new(AdIntensityService::new(
        session.client.clone(),
        session.cache.clone(),
    ));
    if !watch {
        return print_json(&service.refresh().await);
    }

    let key = ad_intensity::cache_key();
    let mut changes = session.cache.subscribe();
    let refetch = service.spawn_refetch(session.settings.ad_intensity.refetch_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.map_err(InfraError::from)?;
                break;
            }
            change = changes.recv() => match change {
                Ok(CacheChange::Updated { key: changed, .. }) if changed == key => {
                    print_json(&service.current())?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    refetch.stop().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
