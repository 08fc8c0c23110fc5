use actix_files::NamedFile;
use actix_web::{error::JsonPayloadError, http::header, web, App, HttpRequest, HttpResponse, HttpServer};
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use crate::analyzer::LocationAnalyzer;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::intake::ImageIntake;
use crate::reconcile::Reconciler;
use crate::session::AnalysisSession;

pub struct AppState {
    pub session: AnalysisSession,
    pub analyzer: Arc<dyn LocationAnalyzer>,
    pub intake: ImageIntake,
}

impl AppState {
    pub fn new(config: &AppConfig, analyzer: Arc<dyn LocationAnalyzer>) -> Self {
        Self {
            session: AnalysisSession::new(Reconciler::default(), config.language),
            analyzer,
            intake: ImageIntake::new(config.max_upload_bytes),
        }
    }
}

#[derive(Deserialize, Debug)]
struct PasteRequest {
    data_uri: String,
}

async fn index(app_config: web::Data<AppConfig>) -> Result<NamedFile, AppError> {
    let path = Path::new(&app_config.static_directory).join("index.html");
    NamedFile::open_async(&path).await.map_err(|e| {
        log::error!("Error serving {:?}: {}", path, e);
        AppError::Io(e)
    })
}

async fn upload_image(
    req: HttpRequest,
    mut payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let limit = state.intake.max_bytes();
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidImage(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(AppError::TooLarge { size: body.len() + chunk.len(), limit });
        }
        body.extend_from_slice(&chunk);
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    log::debug!("Received image upload: {} bytes, content type {:?}", body.len(), content_type);

    let image = state.intake.from_bytes(&body, content_type)?;
    state.session.select_image(image)?;
    Ok(HttpResponse::Ok().json(state.session.snapshot()?))
}

async fn paste_image(
    paste: web::Json<PasteRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    log::debug!("Received pasted image ({} chars)", paste.data_uri.len());
    let image = state.intake.from_data_uri(&paste.data_uri)?;
    state.session.select_image(image)?;
    Ok(HttpResponse::Ok().json(state.session.snapshot()?))
}

async fn clear_image(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.session.clear()?;
    Ok(HttpResponse::Ok().json(state.session.snapshot()?))
}

async fn analyze(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    log::debug!("Received analysis request");
    let snapshot = state.session.analyze(state.analyzer.as_ref()).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

async fn get_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.session.snapshot()?))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::OverflowKnownLength { length, limit } => {
            AppError::TooLarge { size: length, limit }
        }
        JsonPayloadError::Overflow { limit } => AppError::TooLarge { size: limit + 1, limit },
        other => AppError::InvalidImage(other.to_string()),
    };
    log::debug!("Rejected pasted payload: {}", app_err);
    app_err.into()
}

pub fn configure(cfg: &mut web::ServiceConfig, max_upload_bytes: usize) {
    // base64 inflates pasted payloads by 4/3
    let pasted_limit = max_upload_bytes / 3 * 4 + 1024;

    cfg.app_data(
        web::JsonConfig::default()
            .limit(pasted_limit)
            .error_handler(json_error),
    )
        .service(
            web::resource("/api/image")
                .route(web::put().to(upload_image))
                .route(web::delete().to(clear_image)),
        )
        .service(web::resource("/api/image/paste").route(web::post().to(paste_image)))
        .service(web::resource("/api/analyze").route(web::post().to(analyze)))
        .service(web::resource("/api/session").route(web::get().to(get_session)));
}

pub async fn start_web_server(
    config: Arc<AppConfig>,
    analyzer: Arc<dyn LocationAnalyzer>,
) -> std::io::Result<()> {
    let port = config.web_port;
    let max_upload_bytes = config.max_upload_bytes;
    let static_dir = config.static_directory.clone();
    let state_data = web::Data::new(AppState::new(&config, analyzer));
    let config_data = web::Data::from(config);

    log::info!("Starting web server on port: {}", port);
    log::debug!("Serving static files from {} directory.", static_dir);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(state_data.clone())
            .configure(|cfg| configure(cfg, max_upload_bytes))
            .service(actix_files::Files::new("/static", &static_dir))
            .default_service(web::to(index)) // Serve index.html for any unmatched route
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
