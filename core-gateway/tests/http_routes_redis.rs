//! Redis-dependent route integration tests, driven through the real
//! `actix_web::App` built the same way `worker::build` assembles it (session
//! middleware, error mapping, every route table). Gated behind `REDIS_URL`
//! since they need a live server the same way `core-session`'s tests do;
//! `cargo test` skips them by default.

use actix_web::{middleware, test, web, App};
use core_gateway::pipeline::session_stage::session_stage;
use core_gateway::routes::configure_routes;
use core_gateway::state::AppState;
use core_shared::config::AppConfig;

async fn state() -> AppState {
    std::env::var("REDIS_URL").expect("REDIS_URL must be set for this test");
    std::env::set_var("APP__REDIS__KEY_PREFIX", "test-core-gateway");
    let mut config = AppConfig::from_env().expect("config loads from environment");
    config.network.admin_networks = vec!["127.0.0.0/8".to_string()];
    AppState::new(config).await.expect("app state connects to redis")
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn status_route_reports_ok_when_redis_is_reachable() {
    let state_data = web::Data::new(state().await);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .wrap(middleware::Logger::default())
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/status/").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn unauthenticated_request_reports_not_authenticated() {
    let state_data = web::Data::new(state().await);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/session/authenticated").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["authenticated"], false);
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn login_with_valid_basic_auth_sets_a_session_cookie() {
    let state_data = web::Data::new(state().await);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .configure(configure_routes),
    )
    .await;

    let credentials = base64_basic("admin", "admin");
    let req = test::TestRequest::get()
        .uri("/session/login")
        .insert_header(("authorization", format!("Basic {credentials}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp.headers().get("set-cookie").is_some());
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn login_with_wrong_password_is_rejected() {
    let state_data = web::Data::new(state().await);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .configure(configure_routes),
    )
    .await;

    let credentials = base64_basic("admin", "not-the-password");
    let req = test::TestRequest::get()
        .uri("/session/login")
        .insert_header(("authorization", format!("Basic {credentials}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn rpc_call_without_credentials_is_rejected() {
    let state_data = web::Data::new(state().await);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/rpc")
        .set_json(serde_json::json!({"jsonrpc": "2.0", "method": "backend_info", "id": 1}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
#[ignore = "requires REDIS_URL"]
async fn overloaded_state_sheds_non_exempt_requests() {
    let state = state().await;
    state.overload.set_overload(30);
    let state_data = web::Data::new(state);
    let app = test::init_service(
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/session/authenticated")
        .peer_addr("203.0.113.9:12345".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    assert!(resp.headers().get("retry-after").is_some());
}

fn base64_basic(username: &str, password: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}
