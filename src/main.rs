use std::{process, sync::Arc};

use serde_json::json;
use tombola::{
    application::{
        error::AppError,
        extension::{CapabilityTable, RANDOM_NODES, RandomNodeExtension},
        random_nodes::{DrawDefaults, RandomNodeService},
        render::{DeferredRenderPipeline, LazyRandomNodes, RandomNodeSettings, RenderSession},
        repos::NodesRepo,
    },
    cache::{CacheConfig, MaxAge, MemoryCacheBackend, ResultCache},
    config::{self, DrawArgs, RenderArgs},
    domain::{
        draw::{BundleSelection, DrawCount, DrawRequest, DrawnIdSet, PropertyFilters},
        types::ViewMode,
    },
    infra::{db::PostgresRepositories, error::InfraError, memory::MemoryNodesRepo, telemetry},
    presentation::views::TemplateRenderer,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(
            error = %report.chain(),
            summary = error.presentation_message(),
            "application error"
        );
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(
            error = %report.chain(),
            summary = error.presentation_message(),
            "application error"
        );
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Draw(args) => run_draw(settings, args).await,
        config::Command::Demo(_) => run_demo(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_render(settings: config::Settings, args: RenderArgs) -> Result<(), AppError> {
    let nodes = init_nodes_repo(&settings, &args.draw).await?;
    let pipeline = build_pipeline(&settings, nodes);

    let request = draw_request(&args.draw);
    let view_mode = ViewMode::new(args.view_mode);
    let cache_keys = if args.cache_keys.is_empty() {
        vec![request.fingerprint(), format!("view_mode={view_mode}")]
    } else {
        args.cache_keys
    };
    let max_age = args
        .max_age
        .map(MaxAge::from_seconds)
        .unwrap_or_else(|| CacheConfig::from(&settings.cache).default_max_age());

    let element = LazyRandomNodes::build(
        RandomNodeSettings::for_request(request)
            .with_cache_keys(cache_keys)
            .with_max_age(max_age)
            .with_view_mode(view_mode),
    );

    let mut session = RenderSession::new();
    let hydrated = pipeline.render(element, &mut session).await?;

    info!(
        max_age = %session.metadata.max_age,
        tags = ?session.metadata.tags,
        contexts = ?session.metadata.contexts,
        drawn = session.drawn.len(),
        "rendered random nodes block"
    );
    println!("{}", hydrated.markup());
    Ok(())
}

async fn run_draw(settings: config::Settings, args: DrawArgs) -> Result<(), AppError> {
    let nodes = init_nodes_repo(&settings, &args).await?;
    let service = RandomNodeService::new(nodes, DrawDefaults::from(&settings.sampler));

    let request = draw_request(&args);
    let mut drawn = DrawnIdSet::new();
    let records = service.random_nodes(&request, &mut drawn).await?;

    let output = json!({
        "request": request.fingerprint(),
        "nodes": records,
    });
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to encode draw: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_demo(settings: config::Settings) -> Result<(), AppError> {
    let nodes: Arc<dyn NodesRepo> = Arc::new(MemoryNodesRepo::demo_catalog());
    let pipeline = build_pipeline(&settings, nodes);
    let extension = RandomNodeExtension::new(
        pipeline,
        CapabilityTable::register([RANDOM_NODES])?,
        settings.sampler.timezone,
    );

    let invocations = [
        vec![json!(2), json!(["article"]), json!("teaser")],
        vec![json!(3), json!({"event": 1, "page": true}), json!("full"), json!("today")],
        vec![json!(2), json!(["article"]), json!("teaser")],
    ];

    let mut session = RenderSession::new();
    for (index, args) in invocations.iter().enumerate() {
        let markup = extension.invoke(&mut session, RANDOM_NODES, args).await?;
        println!("<!-- {RANDOM_NODES}({}) -->", json!(args));
        println!("{markup}");
        info!(
            invocation = index + 1,
            drawn = session.drawn.len(),
            "demo invocation rendered"
        );
    }

    println!(
        "<!-- page max-age: {}, tags: {:?}, contexts: {:?} -->",
        session.metadata.max_age, session.metadata.tags, session.metadata.contexts
    );
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_pool(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;
    info!("database migrations applied");
    Ok(())
}

fn build_pipeline(settings: &config::Settings, nodes: Arc<dyn NodesRepo>) -> DeferredRenderPipeline {
    let cache_config = CacheConfig::from(&settings.cache);
    let backend = Arc::new(MemoryCacheBackend::new(&cache_config));
    DeferredRenderPipeline::new(
        RandomNodeService::new(nodes, DrawDefaults::from(&settings.sampler)),
        ResultCache::new(backend, &cache_config),
        Arc::new(TemplateRenderer),
    )
}

fn draw_request(args: &DrawArgs) -> DrawRequest {
    let bundles = if args.quotas.is_empty() {
        BundleSelection::only(args.bundles.iter().cloned())
    } else {
        BundleSelection::quotas(args.quotas.clone())
    };
    let filters: PropertyFilters = args.filters.iter().cloned().collect();

    DrawRequest::new(DrawCount::from_signed(args.count))
        .with_bundles(bundles)
        .with_filters(filters)
}

async fn init_nodes_repo(
    settings: &config::Settings,
    args: &DrawArgs,
) -> Result<Arc<dyn NodesRepo>, AppError> {
    if args.memory {
        return Ok(Arc::new(MemoryNodesRepo::demo_catalog()));
    }

    let pool = connect_pool(settings).await?;
    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    Ok(Arc::new(repositories))
}

async fn connect_pool(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}
