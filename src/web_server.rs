use actix_web::{App, HttpServer, dev::Server, middleware, web};
use sqlx::sqlite::SqlitePool;

use crate::config::Config;
use crate::routes::{
    get_challenge_handler, json_error_handler, post_execute_handler, post_submission_handler,
    query_error_handler,
};
use crate::sandbox::SandboxExecutor;
use crate::security::SecurityAnalyzer;

pub fn build_server(
    config: &Config,
    db_pool: SqlitePool,
    analyzer: SecurityAnalyzer,
    executor: SandboxExecutor,
) -> std::io::Result<Server> {
    let db_pool = web::Data::new(db_pool);
    let analyzer = web::Data::new(analyzer);
    let executor = web::Data::new(executor);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(db_pool.clone())
            .app_data(analyzer.clone())
            .app_data(executor.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(get_challenge_handler)
            .service(post_submission_handler)
            .service(post_execute_handler)
    })
    .bind((
        config
            .server
            .bind_address
            .clone()
            .unwrap_or("127.0.0.1".to_string()),
        config.server.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
