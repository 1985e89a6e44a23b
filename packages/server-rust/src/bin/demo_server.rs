//! Demo server: bootstraps a small users application over REST and GraphQL.
//!
//! ```text
//! TRELLIS_JWT_SECRET=dev cargo run --bin demo-server -- --port 3000 --prefix api
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use validator::Validate;

use trellis_core::args::Args;
use trellis_core::class::ClassMeta;
use trellis_core::error::KernelError;
use trellis_core::graphql::{
    ArgDescriptor, FieldDescriptor, ObjectTypeMeta, QueryDescriptor, ResolverMeta, ResolverMethod, TypeRef,
};
use trellis_core::handler::method_fn;
use trellis_core::module::{ModuleDescriptor, ModuleImport};
use trellis_core::registry::MetadataRegistry;
use trellis_core::route::{ControllerMeta, MethodMeta, ParamBinding};
use trellis_core::schema::{DtoType, FieldDef, FieldKind};
use trellis_core::types::Principal;
use trellis_server::service::config::AuthConfig;
use trellis_server::service::middleware::pipeline as decorators;
use trellis_server::service::middleware::CircuitBreakerConfig;
use trellis_server::{Application, JwtVerifier, KernelConfig, NetworkConfig, NetworkModule};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Framework kernel demo server.
#[derive(Parser, Debug)]
#[command(name = "demo-server", version, about = "Serves a sample users module over REST and GraphQL")]
struct Cli {
    #[arg(long, env = "TRELLIS_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "TRELLIS_PORT", default_value_t = 3000)]
    port: u16,

    /// Prefix prepended to every controller path.
    #[arg(long, env = "TRELLIS_PREFIX", default_value = "")]
    prefix: String,

    /// GraphQL endpoint path.
    #[arg(long, env = "TRELLIS_GRAPHQL_PATH", default_value = "/graphql")]
    graphql_path: String,

    /// HS256 secret for bearer tokens.
    #[arg(long, env = "TRELLIS_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Redact internal error messages.
    #[arg(long, env = "TRELLIS_PRODUCTION")]
    production: bool,

    /// Request timeout in seconds.
    #[arg(long, env = "TRELLIS_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    #[arg(long, env = "TRELLIS_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

// ---------------------------------------------------------------------------
// Users domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    email: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct CreateUserDto {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[validate(email)]
    email: String,
}

#[derive(Default)]
struct UsersService {
    users: RwLock<Vec<User>>,
}

impl UsersService {
    fn seeded() -> Self {
        let service = Self::default();
        service.create("Ada".into(), "ada@example.com".into());
        service
    }

    fn all(&self) -> Vec<User> {
        self.users.read().clone()
    }

    fn find(&self, id: i64) -> Option<User> {
        self.users.read().iter().find(|u| u.id == id).cloned()
    }

    fn create(&self, name: String, email: String) -> User {
        let mut users = self.users.write();
        let id = users.last().map_or(1, |u| u.id + 1);
        let user = User { id, name, email };
        users.push(user.clone());
        user
    }

    fn remove(&self, id: i64) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|u| u.id != id);
        users.len() != before
    }
}

struct UsersController {
    users: Arc<UsersService>,
}

struct UsersResolver {
    users: Arc<UsersService>,
}

struct UsersModule;
struct AppModule;

fn parse_id(args: &Args, index: usize) -> Result<i64, KernelError> {
    args.value(index)
        .and_then(|v| v.as_str().map(str::parse::<i64>).and_then(Result::ok).or_else(|| v.as_i64()))
        .ok_or_else(|| KernelError::bad_request("id must be an integer"))
}

fn to_reply(value: impl Serialize) -> Result<Option<serde_json::Value>, KernelError> {
    Ok(Some(serde_json::to_value(value).map_err(anyhow::Error::from)?))
}

fn users_controller() -> Arc<ControllerMeta> {
    let class = ClassMeta::builder::<UsersController>("UsersController")
        .depends_on::<UsersService>()
        .construct(|deps| Ok(UsersController { users: deps.get(0)? }));
    let create_dto = DtoType::of::<CreateUserDto>(
        "CreateUserDto",
        vec![
            FieldDef::required("name", FieldKind::String),
            FieldDef::required("email", FieldKind::String),
        ],
    );

    ControllerMeta::builder(class, "/users")
        .method(
            MethodMeta::builder("list")
                .get("/")
                .public()
                .decorate(decorators::metrics())
                .handler(method_fn(|this: Arc<UsersController>, _| async move {
                    to_reply(this.users.all())
                })),
        )
        .method(
            MethodMeta::builder("find_one")
                .get(":id")
                .public()
                .decorate(decorators::circuit_breaker(CircuitBreakerConfig::default()))
                .param(ParamBinding::param(0, "id"))
                .handler(method_fn(|this: Arc<UsersController>, args: Args| async move {
                    let id = parse_id(&args, 0)?;
                    let user = this
                        .users
                        .find(id)
                        .ok_or_else(|| KernelError::not_found(format!("User {id} not found")))?;
                    to_reply(user)
                })),
        )
        .method(
            MethodMeta::builder("create")
                .post("/")
                .param(ParamBinding::body(0).dto(create_dto))
                .handler(method_fn(|this: Arc<UsersController>, args: Args| async move {
                    let dto: CreateUserDto = args.parse(0)?;
                    to_reply(this.users.create(dto.name, dto.email))
                })),
        )
        .method(
            MethodMeta::builder("welcome")
                .post(":id/welcome")
                .status(http::StatusCode::ACCEPTED)
                .decorate(decorators::offload(2, 64))
                .param(ParamBinding::param(0, "id"))
                .handler(method_fn(|this: Arc<UsersController>, args: Args| async move {
                    let id = parse_id(&args, 0)?;
                    let user = this
                        .users
                        .find(id)
                        .ok_or_else(|| KernelError::not_found(format!("User {id} not found")))?;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    info!(email = %user.email, "welcome mail sent");
                    Ok(None)
                })),
        )
        .method(
            MethodMeta::builder("remove")
                .delete(":id")
                .roles(["admin"])
                .param(ParamBinding::param(0, "id"))
                .handler(method_fn(|this: Arc<UsersController>, args: Args| async move {
                    let id = parse_id(&args, 0)?;
                    if this.users.remove(id) {
                        Ok(None)
                    } else {
                        Err(KernelError::not_found(format!("User {id} not found")))
                    }
                })),
        )
        .build()
}

fn users_resolver() -> Arc<ResolverMeta> {
    let class = ClassMeta::builder::<UsersResolver>("UsersResolver")
        .depends_on::<UsersService>()
        .construct(|deps| Ok(UsersResolver { users: deps.get(0)? }));

    ResolverMeta::builder(class)
        .public()
        .method(
            ResolverMethod::builder("users")
                .query(QueryDescriptor::new(|| TypeRef::list(TypeRef::class::<User>())))
                .handler(method_fn(|this: Arc<UsersResolver>, _| async move { to_reply(this.users.all()) })),
        )
        .method(
            ResolverMethod::builder("user")
                .query(QueryDescriptor::new(|| TypeRef::class::<User>()).nullable())
                .arg(ArgDescriptor::named(0, "id", || TypeRef::Int))
                .handler(method_fn(|this: Arc<UsersResolver>, args: Args| async move {
                    to_reply(this.users.find(parse_id(&args, 0)?))
                })),
        )
        .method(
            ResolverMethod::builder("create")
                .mutation(QueryDescriptor::new(|| TypeRef::class::<User>()).named("createUser"))
                .arg(ArgDescriptor::args_object(0, || TypeRef::class::<CreateUserDto>()))
                .handler(method_fn(|this: Arc<UsersResolver>, args: Args| async move {
                    let dto: CreateUserDto = args.parse(0)?;
                    if let Err(err) = dto.validate() {
                        return Err(KernelError::bad_request(err.to_string()));
                    }
                    to_reply(this.users.create(dto.name, dto.email))
                })),
        )
        .build()
}

fn registry() -> Arc<MetadataRegistry> {
    let controller = users_controller();
    let resolver = users_resolver();

    let users = ModuleDescriptor::builder(ClassMeta::unit::<UsersModule>("UsersModule", || UsersModule))
        .provider(ClassMeta::unit::<UsersService>("UsersService", UsersService::seeded))
        .provider(Arc::clone(&resolver.class))
        .controller(Arc::clone(&controller.class))
        .build();
    let app = ModuleDescriptor::builder(ClassMeta::unit::<AppModule>("AppModule", || AppModule))
        .import(ModuleImport::class::<UsersModule>())
        .build();

    MetadataRegistry::builder()
        .object_type(
            ObjectTypeMeta::object::<User>("User")
                .field(FieldDescriptor::new("id", || TypeRef::Int))
                .field(FieldDescriptor::new("name", || TypeRef::String))
                .field(FieldDescriptor::new("email", || TypeRef::String)),
        )
        .object_type(
            ObjectTypeMeta::args::<CreateUserDto>("CreateUserArgs")
                .field(FieldDescriptor::new("name", || TypeRef::String))
                .field(FieldDescriptor::new("email", || TypeRef::String)),
        )
        .module(users)
        .module(app)
        .controller(controller)
        .resolver(resolver)
        .build()
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Some(secret) = &cli.jwt_secret {
        let token = JwtVerifier::new(Some(secret.clone())).sign(&Principal::new("admin", ["admin"]), 3600)?;
        info!(%token, "admin token valid for one hour");
    } else {
        warn!("no JWT secret configured; only public routes are reachable");
    }

    let config = KernelConfig {
        global_prefix: cli.prefix,
        graphql_path: Some(cli.graphql_path),
        production: cli.production,
        auth: AuthConfig {
            jwt_secret: cli.jwt_secret,
        },
        ..KernelConfig::default()
    };
    let app = Application::bootstrap(registry(), ModuleImport::class::<AppModule>(), config).await?;
    for (method, path) in app.routes() {
        info!(method = method.as_str(), %path, "route");
    }
    let container = app.container();

    let mut network = NetworkModule::new(NetworkConfig {
        host: cli.host,
        port: cli.port,
        request_timeout: Duration::from_secs(cli.request_timeout),
        ..NetworkConfig::default()
    });
    let port = network.start().await?;
    info!(port, "demo server listening");

    network
        .serve(app.into_router(), async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    container.clear();
    Ok(())
}
