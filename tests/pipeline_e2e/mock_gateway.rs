//! Mock repository gateway for E2E tests.
//!
//! Starts an in-process HTTP server implementing the catalog and fileset
//! ingestion endpoints the HTTP repository adapter talks to.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, delete, get, post, put, web};
use image_import_lib::services::http_repository::{
    ATTACHMENT_NAME_HEADER, ContainerDto, ImageDto, OpenFilesetRequest, OpenFilesetResponse,
    VerifyRequest, VerifyResponse,
};
use image_import_lib::services::remote::RemoteObject;
use serde::Deserialize;
use sha1::{Digest, Sha1};

pub const VALID_TOKEN: &str = "valid-session";

#[derive(Debug, Clone)]
pub struct StoredContainer {
    pub id: i64,
    pub name: String,
    pub parent: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: i64,
    pub dataset: i64,
    pub name: String,
    pub acquisition_date: Option<String>,
}

#[derive(Debug, Default)]
pub struct Upload {
    pub request: Option<OpenFilesetRequest>,
    pub files: HashMap<usize, Vec<u8>>,
    pub aborted: bool,
}

/// Shared state for the mock gateway.
#[derive(Debug, Default)]
pub struct GatewayState {
    next_id: i64,
    pub containers: Vec<StoredContainer>,
    pub images: Vec<StoredImage>,
    pub uploads: HashMap<String, Upload>,
    pub attachments: Vec<(i64, String, usize)>,
    /// Reject this many verification requests regardless of the digests.
    pub reject_verifications: u32,
    pub container_posts: usize,
}

impl GatewayState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

type State = web::Data<Arc<Mutex<GatewayState>>>;

fn authorized(req: &HttpRequest) -> bool {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", VALID_TOKEN))
}

macro_rules! require_auth {
    ($req:expr) => {
        if !authorized(&$req) {
            return HttpResponse::Unauthorized().finish();
        }
    };
}

#[derive(Deserialize)]
struct NameQuery {
    name: Option<String>,
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
struct OffsetQuery {
    offset: u64,
}

fn list_containers(state: &GatewayState, parent: Option<i64>, name: Option<&str>) -> Vec<ContainerDto> {
    state
        .containers
        .iter()
        .filter(|c| c.parent == parent && name.is_none_or(|n| c.name == n))
        .map(|c| ContainerDto {
            id: c.id,
            name: c.name.clone(),
        })
        .collect()
}

fn create_container(state: &mut GatewayState, parent: Option<i64>, name: String) -> ContainerDto {
    state.container_posts += 1;
    let id = state.allocate();
    state.containers.push(StoredContainer {
        id,
        name: name.clone(),
        parent,
    });
    ContainerDto { id, name }
}

#[get("/api/session")]
async fn session(req: HttpRequest) -> HttpResponse {
    require_auth!(req);
    HttpResponse::Ok().json(serde_json::json!({ "user": "alice" }))
}

#[get("/api/projects")]
async fn get_projects(req: HttpRequest, query: web::Query<NameQuery>, state: State) -> HttpResponse {
    require_auth!(req);
    let state = state.lock().unwrap();
    HttpResponse::Ok().json(list_containers(&state, None, query.name.as_deref()))
}

#[post("/api/projects")]
async fn post_project(req: HttpRequest, body: web::Json<NameBody>, state: State) -> HttpResponse {
    require_auth!(req);
    let mut state = state.lock().unwrap();
    HttpResponse::Created().json(create_container(&mut state, None, body.into_inner().name))
}

#[get("/api/projects/{id}/datasets")]
async fn get_datasets(
    req: HttpRequest,
    path: web::Path<i64>,
    query: web::Query<NameQuery>,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let state = state.lock().unwrap();
    HttpResponse::Ok().json(list_containers(&state, Some(*path), query.name.as_deref()))
}

#[post("/api/projects/{id}/datasets")]
async fn post_dataset(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<NameBody>,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let mut state = state.lock().unwrap();
    HttpResponse::Created().json(create_container(&mut state, Some(*path), body.into_inner().name))
}

#[get("/api/containers/{id}")]
async fn get_container(req: HttpRequest, path: web::Path<i64>, state: State) -> HttpResponse {
    require_auth!(req);
    let state = state.lock().unwrap();
    match state.containers.iter().find(|c| c.id == *path) {
        Some(c) => HttpResponse::Ok().json(ContainerDto {
            id: c.id,
            name: c.name.clone(),
        }),
        None => HttpResponse::NotFound().finish(),
    }
}

fn image_dto(image: &StoredImage) -> ImageDto {
    ImageDto {
        id: image.id,
        name: image.name.clone(),
        acquisition_date: image.acquisition_date.clone(),
    }
}

#[get("/api/datasets/{id}/images")]
async fn get_images(req: HttpRequest, path: web::Path<i64>, state: State) -> HttpResponse {
    require_auth!(req);
    let state = state.lock().unwrap();
    let images: Vec<ImageDto> = state
        .images
        .iter()
        .filter(|i| i.dataset == *path)
        .map(image_dto)
        .collect();
    HttpResponse::Ok().json(images)
}

#[get("/api/images/{id}")]
async fn get_image(req: HttpRequest, path: web::Path<i64>, state: State) -> HttpResponse {
    require_auth!(req);
    let state = state.lock().unwrap();
    match state.images.iter().find(|i| i.id == *path) {
        Some(image) => HttpResponse::Ok().json(image_dto(image)),
        None => HttpResponse::NotFound().finish(),
    }
}

#[post("/api/images/{id}/attachments")]
async fn post_attachment(
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Bytes,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let name = req
        .headers()
        .get(ATTACHMENT_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .lock()
        .unwrap()
        .attachments
        .push((*path, name, body.len()));
    HttpResponse::Created().finish()
}

#[post("/api/import/filesets")]
async fn open_fileset(
    req: HttpRequest,
    body: web::Json<OpenFilesetRequest>,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let mut state = state.lock().unwrap();
    let handle = format!("h{}", state.allocate());
    state.uploads.insert(
        handle.clone(),
        Upload {
            request: Some(body.into_inner()),
            ..Default::default()
        },
    );
    HttpResponse::Ok().json(OpenFilesetResponse { handle })
}

#[put("/api/import/filesets/{handle}/files/{index}")]
async fn write_block(
    req: HttpRequest,
    path: web::Path<(String, usize)>,
    query: web::Query<OffsetQuery>,
    body: web::Bytes,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let (handle, index) = path.into_inner();
    let mut state = state.lock().unwrap();
    let Some(upload) = state.uploads.get_mut(&handle) else {
        return HttpResponse::NotFound().finish();
    };

    let file = upload.files.entry(index).or_default();
    if file.len() as u64 != query.offset {
        return HttpResponse::Conflict().body("offset mismatch");
    }
    file.extend_from_slice(&body);
    HttpResponse::NoContent().finish()
}

#[post("/api/import/filesets/{handle}/verify")]
async fn verify(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<VerifyRequest>,
    state: State,
) -> HttpResponse {
    require_auth!(req);
    let mut state = state.lock().unwrap();

    if state.reject_verifications > 0 {
        state.reject_verifications -= 1;
        return HttpResponse::UnprocessableEntity().body("checksum mismatch");
    }

    let Some(upload) = state.uploads.get(path.as_str()) else {
        return HttpResponse::NotFound().finish();
    };
    let Some(request) = upload.request.clone() else {
        return HttpResponse::NotFound().finish();
    };

    let actual: Vec<String> = (0..request.fileset.files.len())
        .map(|i| hex::encode(Sha1::digest(upload.files.get(&i).cloned().unwrap_or_default())))
        .collect();
    if actual != body.digests {
        return HttpResponse::UnprocessableEntity().body("checksum mismatch");
    }

    let id = state.allocate();
    state.images.push(StoredImage {
        id,
        dataset: request.destination.dataset,
        name: request.fileset.name.clone(),
        acquisition_date: Some(request.destination.acquisition_date.clone()),
    });
    HttpResponse::Ok().json(VerifyResponse {
        objects: vec![RemoteObject::image(id)],
    })
}

#[delete("/api/import/filesets/{handle}")]
async fn discard(req: HttpRequest, path: web::Path<String>, state: State) -> HttpResponse {
    require_auth!(req);
    if let Some(upload) = state.lock().unwrap().uploads.get_mut(path.as_str()) {
        upload.aborted = true;
    }
    HttpResponse::NoContent().finish()
}

/// Mock gateway on an ephemeral port.
pub struct MockGateway {
    pub url: String,
    pub state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    /// Start the mock gateway. Lives as long as the test's runtime.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(GatewayState::default()));

        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{}", port);

        let state_data = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state_data.clone()))
                .app_data(web::PayloadConfig::new(16 * 1024 * 1024))
                .service(session)
                .service(get_projects)
                .service(post_project)
                .service(get_datasets)
                .service(post_dataset)
                .service(get_container)
                .service(get_images)
                .service(get_image)
                .service(post_attachment)
                .service(open_fileset)
                .service(write_block)
                .service(verify)
                .service(discard)
        })
        .workers(1)
        .listen(listener)
        .expect("failed to listen")
        .disable_signals()
        .run();

        tokio::spawn(server);

        MockGateway { url, state }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }
}
