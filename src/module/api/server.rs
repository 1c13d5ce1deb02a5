use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::net::SocketAddr;
use tracing::info;
use warp::Filter;

use super::handlers;
use crate::library::EmptyResult;
use crate::module::BrokerContext;

/// Every route of the HTTP interface
pub fn routes(
    context: BrokerContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let with_context = warp::any().map(move || context.clone());

    let publish_route = warp::post()
        .and(
            warp::path!("event" / "publisher")
                .or(warp::path!("api" / "v1" / "pubsub"))
                .unify(),
        )
        .and(warp::body::json())
        .and(with_context.clone())
        .and_then(handlers::publish)
        .with(warp::trace::named("publish"));

    let register_route = warp::post()
        .and(warp::path!("event" / "consumer"))
        .and(warp::body::json())
        .and(with_context.clone())
        .and_then(handlers::register)
        .with(warp::trace::named("register"));

    let update_route = warp::patch()
        .and(warp::path!("event" / String))
        .and(warp::body::json())
        .and(with_context.clone())
        .and_then(handlers::update)
        .with(warp::trace::named("update"));

    let disable_route = warp::delete()
        .and(warp::path!("event" / String))
        .and(with_context.clone())
        .and_then(handlers::disable)
        .with(warp::trace::named("disable"));

    let list_route = warp::get()
        .and(warp::path!("events"))
        .and(warp::query())
        .and(with_context.clone())
        .and_then(handlers::list)
        .with(warp::trace::named("list"));

    let get_route = warp::get()
        .and(warp::path!("events" / String))
        .and(with_context.clone())
        .and_then(handlers::get)
        .with(warp::trace::named("get"));

    let insights_route = warp::get()
        .and(warp::path!("insights"))
        .and(with_context.clone())
        .and_then(handlers::insights)
        .with(warp::trace::named("insights"));

    let archived_route = warp::get()
        .and(warp::path!("tasks" / "archived" / String))
        .and(warp::query())
        .and(with_context)
        .and_then(handlers::archived)
        .with(warp::trace::named("archived"));

    let ping_route = warp::get().and(warp::path!("ping")).map(|| "pong");

    publish_route
        .or(register_route)
        .or(update_route)
        .or(disable_route)
        .or(list_route)
        .or(get_route)
        .or(insights_route)
        .or(archived_route)
        .or(ping_route)
        .with(warp::trace::request())
}

/// Job serving the HTTP interface until it is terminated
pub struct ServerJob {
    port: u16,
    context: BrokerContext,
}

impl ServerJob {
    /// Creates a new instance from raw parts
    pub fn new(port: u16, context: BrokerContext) -> Self {
        Self { port, context }
    }
}

#[async_trait]
impl Job for ServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let routes = routes(self.context.clone());

        let source_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let (addr, server) = warp::serve(routes)
            .bind_with_graceful_shutdown(source_addr, manager.termination_signal());

        info!(?addr, "Serving broker API");
        manager.ready().await;
        server.await;

        Ok(())
    }
}
