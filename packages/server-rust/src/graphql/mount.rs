//! Installs a schema on an [`HttpHost`].

use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use serde_json::json;
use tracing::info;
use trellis_core::http::{HttpMethod, HttpRequest, ResponseHandle};

use super::executor::{execute, GraphQLRequest};
use super::schema::Schema;
use crate::network::host::HttpHost;
use crate::service::router::RouteHandler;

/// Installs `POST path` (execute) and `GET path` (SDL). Returns `false`
/// when either route was already taken.
pub fn mount_graphql(host: &mut dyn HttpHost, path: &str, schema: Arc<Schema>, production: bool) -> bool {
    let exec_schema = Arc::clone(&schema);
    let execute_handler: RouteHandler = Arc::new(move |req: HttpRequest, res: ResponseHandle| {
        let schema = Arc::clone(&exec_schema);
        async move {
            let request: GraphQLRequest = match serde_json::from_value(req.body.clone()) {
                Ok(request) => request,
                Err(err) => {
                    res.status(StatusCode::BAD_REQUEST)
                        .json(json!({ "errors": [{ "message": format!("Invalid GraphQL request: {err}") }] }));
                    return;
                }
            };
            let response = execute(&schema, request, &req, production).await;
            match serde_json::to_value(&response) {
                Ok(body) => res.json(body),
                Err(err) => {
                    res.status(StatusCode::INTERNAL_SERVER_ERROR)
                        .json(json!({ "errors": [{ "message": err.to_string() }] }));
                }
            }
        }
        .boxed()
    });

    let sdl = Arc::new(schema.to_sdl());
    let sdl_handler: RouteHandler = Arc::new(move |_req: HttpRequest, res: ResponseHandle| {
        let sdl = Arc::clone(&sdl);
        async move { res.text(sdl.as_str()) }.boxed()
    });

    let posted = host.route(HttpMethod::Post, path, execute_handler);
    let got = host.route(HttpMethod::Get, path, sdl_handler);
    info!(path, "GraphQL endpoint mounted");
    posted && got
}
