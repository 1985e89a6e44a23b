//! Per-request pipeline: guard chain, parameter binding, handler invocation
//! and response shaping.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;
use http::StatusCode;
use serde_json::json;
use tower::ServiceExt;
use trellis_core::class::Instance;
use trellis_core::error::KernelError;
use trellis_core::handler::{BoxHandler, Invocation};
use trellis_core::http::{HttpMethod, HttpRequest, ResponseHandle};
use trellis_core::route::ParamBinding;
use trellis_core::traits::{ExecutionContext, Guard, GuardRef, HandlerInfo};
use trellis_core::types::Reply;

use super::binding::bind_params;
use super::filter::ErrorFilter;
use super::guards::builtin_guards;
use crate::error::RegistrationError;
use crate::service::container::Container;
use crate::service::middleware::SharedHandler;

pub const SUCCESS_MESSAGE: &str = "Operation completed successfully";

// ---------------------------------------------------------------------------
// Guard chain
// ---------------------------------------------------------------------------

/// Resolves the full guard chain of one handler: the built-in guards, then
/// class guards, then method guards. Guard classes missing from the
/// container are registered on first use.
///
/// # Errors
///
/// Fails when a guard class cannot be constructed or does not resolve to
/// its declared guard type.
pub fn resolve_guard_chain(
    container: &Container,
    class_guards: &[GuardRef],
    method_guards: &[GuardRef],
    handler: &str,
) -> Result<Vec<Arc<dyn Guard>>, RegistrationError> {
    builtin_guards()
        .iter()
        .chain(class_guards)
        .chain(method_guards)
        .map(|guard| {
            let token = guard.class().token();
            if !container.has(&token) {
                container.register_class(Arc::clone(guard.class()))?;
            }
            let instance = container.resolve(&token)?;
            guard.cast(instance).ok_or_else(|| RegistrationError::InvalidGuard {
                guard: guard.class().name().to_string(),
                handler: handler.to_string(),
            })
        })
        .collect()
}

/// Method roles replace class roles when the method declares any.
#[must_use]
pub fn effective_roles(class_roles: &[String], method_roles: &[String]) -> Vec<String> {
    if method_roles.is_empty() {
        class_roles.to_vec()
    } else {
        method_roles.to_vec()
    }
}

/// Runs `guards` in order; the first rejection aborts the chain.
///
/// Authentication and authorization errors pass through unchanged; any
/// other guard failure is reported as a 403.
///
/// # Errors
///
/// Returns the first guard's rejection.
pub async fn run_guards(
    guards: &[Arc<dyn Guard>],
    request: &mut HttpRequest,
    response: Option<&ResponseHandle>,
    handler: &HandlerInfo,
) -> Result<(), KernelError> {
    let mut ctx = ExecutionContext {
        request,
        response,
        handler,
    };
    for guard in guards {
        if let Err(err) = guard.can_activate(&mut ctx).await {
            return Err(if err.is_auth() {
                err
            } else {
                KernelError::forbidden(err.to_string())
            });
        }
    }
    Ok(())
}

/// Calls the composed handler, turning a panic into an internal error.
///
/// # Errors
///
/// Returns the handler's own error, or an internal error if it panicked.
pub async fn invoke(handler: BoxHandler, inv: Invocation) -> Result<Reply, KernelError> {
    let label = format!("{}.{}", inv.class_name, inv.method_name);
    AssertUnwindSafe(handler.oneshot(inv))
        .catch_unwind()
        .await
        .map_err(|_| KernelError::Internal(anyhow!("handler {label} panicked")))?
}

// ---------------------------------------------------------------------------
// RequestPipeline
// ---------------------------------------------------------------------------

/// Everything resolved at registration time for one installed route.
pub struct RequestPipeline {
    pub(crate) target: Instance,
    pub(crate) info: HandlerInfo,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    /// Sorted by index.
    pub(crate) params: Vec<ParamBinding>,
    pub(crate) status: StatusCode,
    pub(crate) handler: SharedHandler,
    pub(crate) filter: ErrorFilter,
}

impl RequestPipeline {
    /// Builds the pipeline of one route. Without an explicit `status`,
    /// POST routes answer 201 and everything else 200.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: Instance,
        info: HandlerInfo,
        guards: Vec<Arc<dyn Guard>>,
        mut params: Vec<ParamBinding>,
        method: HttpMethod,
        status: Option<StatusCode>,
        handler: SharedHandler,
        filter: ErrorFilter,
    ) -> Self {
        params.sort_by_key(|p| p.index);
        let status = status.unwrap_or(if method == HttpMethod::Post {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        });
        Self {
            target,
            info,
            guards,
            params,
            status,
            handler,
            filter,
        }
    }

    fn passthrough(&self) -> bool {
        self.params.iter().any(ParamBinding::is_passthrough)
    }

    /// Serves one request. Every failure is rendered by the error filter.
    pub async fn handle(&self, req: HttpRequest, res: ResponseHandle) {
        let path = req.path.clone();
        if let Err(err) = self.run(req, &res).await {
            self.filter.catch(&err, &path, &res);
        }
    }

    async fn run(&self, mut req: HttpRequest, res: &ResponseHandle) -> Result<(), KernelError> {
        run_guards(&self.guards, &mut req, Some(res), &self.info).await?;

        let req = Arc::new(req);
        let args = bind_params(&self.params, &req, res)?;
        let inv = Invocation::new(
            Arc::clone(&self.target),
            args,
            &self.info.class_name,
            &self.info.method_name,
        );
        let reply = invoke(self.handler.service(), inv).await?;
        self.shape(reply, res);
        Ok(())
    }

    fn shape(&self, reply: Reply, res: &ResponseHandle) {
        if res.headers_sent() {
            return;
        }
        if self.passthrough() {
            if let Some(value) = reply {
                res.status(self.status).json(value);
            }
            return;
        }
        let mut body = json!({
            "success": true,
            "message": SUCCESS_MESSAGE,
        });
        if let Some(data) = reply {
            body["data"] = data;
        }
        res.status(self.status).json(body);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::Method;
    use parking_lot::Mutex;
    use serde_json::Value;
    use trellis_core::args::Args;
    use trellis_core::class::ClassMeta;
    use trellis_core::handler::{method_fn, Decorator, MethodHandler};
    use trellis_core::http::ResponseBody;
    use trellis_core::traits::HandlerKind;
    use trellis_core::types::Principal;

    use super::*;
    use crate::routing::guards::{JwtVerifier, TOKEN_VERIFIER};
    use trellis_core::provider::ProviderDescriptor;
    use trellis_core::token::Token;

    struct Ledger;

    static ORDER: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    macro_rules! recording_guard {
        ($name:ident) => {
            struct $name;

            #[async_trait]
            impl Guard for $name {
                async fn can_activate(&self, _ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError> {
                    ORDER.lock().unwrap().push(stringify!($name));
                    Ok(())
                }
            }

            impl $name {
                fn guard() -> GuardRef {
                    GuardRef::of::<$name>(ClassMeta::unit::<$name>(stringify!($name), || $name))
                }
            }
        };
    }

    recording_guard!(GuardA);
    recording_guard!(GuardB);
    recording_guard!(GuardC);

    struct Failing;

    #[async_trait]
    impl Guard for Failing {
        async fn can_activate(&self, _ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError> {
            Err(KernelError::bad_request("tenant header missing"))
        }
    }

    fn container() -> Container {
        let container = Container::new();
        let verifier: Arc<dyn trellis_core::traits::TokenVerifier> =
            Arc::new(JwtVerifier::new(Some("k".into())));
        container
            .register(ProviderDescriptor::value(TOKEN_VERIFIER, verifier))
            .unwrap();
        container
    }

    fn info(public: bool) -> HandlerInfo {
        HandlerInfo {
            class_name: "LedgerController".into(),
            method_name: "entry".into(),
            kind: HandlerKind::Rest,
            roles: vec![],
            public,
        }
    }

    fn pipeline(
        handler: MethodHandler,
        params: Vec<ParamBinding>,
        method: HttpMethod,
        guards: Vec<Arc<dyn Guard>>,
    ) -> RequestPipeline {
        RequestPipeline::new(
            Arc::new(Ledger),
            info(true),
            guards,
            params,
            method,
            None,
            SharedHandler::compose(handler, &[]),
            ErrorFilter::default(),
        )
    }

    fn json_body(res: &ResponseHandle) -> (StatusCode, Value) {
        let state = res.snapshot();
        match state.body {
            Some(ResponseBody::Json(v)) => (state.status, v),
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[test]
    fn guard_chain_order_is_builtin_class_method() {
        let c = container();
        let chain = resolve_guard_chain(&c, &[GuardA::guard(), GuardB::guard()], &[GuardC::guard()], "x").unwrap();
        assert_eq!(chain.len(), 5);
        assert!(c.has(&Token::of::<GuardA>()));
        assert!(c.has(&Token::of::<crate::routing::guards::AuthGuard>()));
    }

    #[tokio::test]
    async fn guards_run_in_declared_order() {
        let c = container();
        let chain = resolve_guard_chain(&c, &[GuardA::guard(), GuardB::guard()], &[GuardC::guard()], "x").unwrap();
        ORDER.lock().unwrap().clear();
        let mut req = HttpRequest::new(Method::GET, "/");
        run_guards(&chain, &mut req, None, &info(true)).await.unwrap();
        assert_eq!(*ORDER.lock().unwrap(), vec!["GuardA", "GuardB", "GuardC"]);
    }

    /// Custom guard that records which user it saw, if it ran at all.
    struct Recorder {
        seen: Arc<Mutex<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl Guard for Recorder {
        async fn can_activate(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError> {
            self.seen.lock().push(ctx.request.user.as_ref().map(|u| u.id.clone()));
            Ok(())
        }
    }

    fn recorded_chain(c: &Container) -> (Vec<Arc<dyn Guard>>, Arc<Mutex<Vec<Option<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&seen);
        let class = ClassMeta::builder::<Recorder>("Recorder").construct(move |_| {
            Ok(Recorder {
                seen: Arc::clone(&shared),
            })
        });
        let chain = resolve_guard_chain(c, &[GuardRef::of::<Recorder>(class)], &[], "Ledger.entry").unwrap();
        (chain, seen)
    }

    fn protected(roles: &[&str]) -> HandlerInfo {
        HandlerInfo {
            roles: roles.iter().map(ToString::to_string).collect(),
            ..info(false)
        }
    }

    fn bearer(roles: &[&str]) -> String {
        let token = JwtVerifier::new(Some("k".into()))
            .sign(&Principal::new("u-1", roles.iter().copied()), 60)
            .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn auth_rejection_stops_before_custom_guards() {
        let c = container();
        let (chain, seen) = recorded_chain(&c);
        let mut req = HttpRequest::new(Method::GET, "/ledger/1");
        let err = run_guards(&chain, &mut req, None, &protected(&[])).await.unwrap_err();
        assert!(matches!(err, KernelError::Unauthorized(msg) if msg == "Missing bearer token"));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn role_rejection_stops_before_custom_guards() {
        let c = container();
        let (chain, seen) = recorded_chain(&c);
        let mut req = HttpRequest::new(Method::DELETE, "/ledger/1").with_header("authorization", &bearer(&["viewer"]));
        let err = run_guards(&chain, &mut req, None, &protected(&["admin"])).await.unwrap_err();
        assert!(matches!(err, KernelError::Forbidden(msg) if msg.contains("admin")));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn custom_guards_see_the_authenticated_user() {
        let c = container();
        let (chain, seen) = recorded_chain(&c);
        let mut req = HttpRequest::new(Method::DELETE, "/ledger/1").with_header("authorization", &bearer(&["admin"]));
        run_guards(&chain, &mut req, None, &protected(&["admin"])).await.unwrap();
        assert_eq!(*seen.lock(), vec![Some("u-1".to_string())]);
    }

    #[tokio::test]
    async fn non_auth_guard_failure_becomes_forbidden() {
        let guards: Vec<Arc<dyn Guard>> = vec![Arc::new(Failing)];
        let mut req = HttpRequest::new(Method::GET, "/");
        let err = run_guards(&guards, &mut req, None, &info(true)).await.unwrap_err();
        assert!(matches!(err, KernelError::Forbidden(msg) if msg == "tenant header missing"));
    }

    #[tokio::test]
    async fn reply_is_wrapped_in_envelope() {
        let p = pipeline(
            method_fn(|_: Arc<Ledger>, _| async { Ok(Some(json!({"id": 1}))) }),
            vec![],
            HttpMethod::Get,
            vec![],
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/ledger/1"), res.clone()).await;
        let (status, body) = json_body(&res);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"success": true, "data": {"id": 1}, "message": SUCCESS_MESSAGE})
        );
    }

    #[tokio::test]
    async fn post_defaults_to_created_and_empty_reply_omits_data() {
        let p = pipeline(method_fn(|_: Arc<Ledger>, _| async { Ok(None) }), vec![], HttpMethod::Post, vec![]);
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::POST, "/ledger"), res.clone()).await;
        let (status, body) = json_body(&res);
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn passthrough_response_bypasses_envelope() {
        let p = pipeline(
            method_fn(|_: Arc<Ledger>, args: Args| async move {
                if let Some(res) = args.response(0) {
                    res.status(StatusCode::ACCEPTED).json(json!({"raw": true}));
                }
                Ok(Some(json!("ignored")))
            }),
            vec![ParamBinding::response(0, true)],
            HttpMethod::Get,
            vec![],
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/raw"), res.clone()).await;
        assert_eq!(json_body(&res), (StatusCode::ACCEPTED, json!({"raw": true})));
    }

    #[tokio::test]
    async fn passthrough_without_write_sends_raw_value() {
        let p = pipeline(
            method_fn(|_: Arc<Ledger>, _| async { Ok(Some(json!([1, 2]))) }),
            vec![ParamBinding::response(0, true)],
            HttpMethod::Get,
            vec![],
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/raw"), res.clone()).await;
        assert_eq!(json_body(&res).1, json!([1, 2]));
    }

    #[tokio::test]
    async fn handler_errors_reach_the_filter() {
        let p = pipeline(
            method_fn(|_: Arc<Ledger>, _| async { Err(KernelError::not_found("entry 9 not found")) }),
            vec![],
            HttpMethod::Get,
            vec![],
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/ledger/9"), res.clone()).await;
        let (status, body) = json_body(&res);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "entry 9 not found");
        assert_eq!(body["path"], "/ledger/9");
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let p = pipeline(
            method_fn(|_: Arc<Ledger>, args: Args| async move {
                if args.is_empty() {
                    panic!("ledger corrupted");
                }
                Ok(None)
            }),
            vec![],
            HttpMethod::Get,
            vec![],
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/boom"), res.clone()).await;
        assert_eq!(json_body(&res).0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn guard_rejection_skips_the_handler() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let handler = method_fn(move |_: Arc<Ledger>, _| {
            *counter.lock() += 1;
            async { Ok(None) }
        });
        let c = container();
        let guards = resolve_guard_chain(&c, &[], &[], "LedgerController.entry").unwrap();
        let p = RequestPipeline::new(
            Arc::new(Ledger),
            info(false),
            guards,
            vec![],
            HttpMethod::Get,
            None,
            SharedHandler::compose(handler, &[]),
            ErrorFilter::default(),
        );
        let res = ResponseHandle::new();
        p.handle(HttpRequest::new(Method::GET, "/ledger"), res.clone()).await;
        assert_eq!(json_body(&res).0, StatusCode::UNAUTHORIZED);
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn bound_user_reaches_the_handler() {
        let jwt = JwtVerifier::new(Some("k".into()));
        let token = jwt.sign(&Principal::new("u7", ["clerk"]), 60).unwrap();
        let c = container();
        let guards = resolve_guard_chain(&c, &[], &[], "LedgerController.entry").unwrap();
        let mut info = info(false);
        info.roles = vec!["clerk".into()];
        let p = RequestPipeline::new(
            Arc::new(Ledger),
            info,
            guards,
            vec![ParamBinding::user(0)],
            HttpMethod::Get,
            None,
            SharedHandler::compose(
                method_fn(|_: Arc<Ledger>, args: Args| async move {
                    Ok(args.user(0).map(|u| json!(u.id)))
                }),
                &[Decorator::new("noop", |inner| inner)],
            ),
            ErrorFilter::default(),
        );
        let res = ResponseHandle::new();
        let req = HttpRequest::new(Method::GET, "/ledger").with_header("authorization", &format!("Bearer {token}"));
        p.handle(req, res.clone()).await;
        assert_eq!(json_body(&res).1["data"], "u7");
    }

    #[test]
    fn method_roles_override_class_roles() {
        let class = vec!["admin".to_string()];
        assert_eq!(effective_roles(&class, &[]), class);
        assert_eq!(effective_roles(&class, &["clerk".to_string()]), vec!["clerk"]);
    }
}
