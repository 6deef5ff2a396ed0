//! HTTP status API of the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer};

use crate::dispatcher::Dispatcher;
use crate::messages::StatusResponse;

/// `GET /status`: reachability of every storage node, in routing order.
pub async fn api_get_status(dispatcher: web::Data<Arc<Dispatcher>>) -> HttpResponse {
    let status = dispatcher.node_status().await;
    HttpResponse::Ok().json(StatusResponse { status })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(api_get_status));
}

pub async fn run_status_server(
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let data = web::Data::new(dispatcher);
    tracing::info!(%addr, "status API listening");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .workers(1)
        .bind(addr)?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{NodeEntry, RoutingTable};
    use actix_web::test;
    use std::time::Duration;

    #[actix_rt::test]
    async fn status_lists_nodes_in_routing_order() {
        let live = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let routing = RoutingTable::new(
            ".c",
            vec![
                NodeEntry {
                    name: "spdf".to_string(),
                    extension: ".pdf".to_string(),
                    address: live.local_addr().unwrap(),
                },
                NodeEntry {
                    name: "stext".to_string(),
                    extension: ".txt".to_string(),
                    address: dead_addr,
                },
            ],
        );
        let root = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            routing,
            root.path(),
            Duration::from_millis(10),
            Duration::from_millis(500),
        ));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(dispatcher))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::get().uri("/status").to_request();
        let body: StatusResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.status.len(), 2);
        assert!(body.status[0].starts_with("spdf (.pdf)"));
        assert!(body.status[0].ends_with("reachable") && !body.status[0].ends_with("unreachable"));
        assert!(body.status[1].starts_with("stext (.txt)"));
        assert!(body.status[1].ends_with("unreachable"));
    }
}
