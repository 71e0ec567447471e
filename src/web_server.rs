use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::routes::{
    json_error_handler, post_artifact_handler, post_identity_handler, run_session_handler,
};
use crate::session::SessionMap;

pub fn build_server(config: ServerConfig, sessions: SessionMap) -> std::io::Result<Server> {
    let sessions = web::Data::new(sessions);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(sessions.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_identity_handler)
            .service(post_artifact_handler)
            .service(run_session_handler)
    })
    .bind((
        config.bind_address.unwrap_or("127.0.0.1".to_string()),
        config.bind_port.unwrap_or(8080),
    ))?
    .run();

    Ok(server)
}
