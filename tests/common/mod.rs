use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use helpdesk::auth::jwt::JwtService;
use helpdesk::auth::password::hash_password;
use helpdesk::config::AppConfig;
use helpdesk::db;
use helpdesk::models::{
    Attachment, Category, Comment, NewAttachment, NewComment, NewTicket, NewUser, Role, Ticket,
    TicketChanges, TicketStatus, User,
};
use helpdesk::repo::{
    CategoryRegistry, RepoError, RepoResult, TicketFilter, TicketRepository, TicketScope,
    UserDirectory,
};
use helpdesk::routes;
use helpdesk::state::AppState;
use helpdesk::storage::ObjectStorage;
use helpdesk::tickets::TicketService;
use http_body_util::BodyExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, User>,
    categories: HashMap<Uuid, Category>,
    tickets: HashMap<Uuid, Ticket>,
    comments: Vec<Comment>,
    attachments: Vec<Attachment>,
    comment_seq: i64,
    attachment_seq: i64,
}

/// In-memory stand-in for the diesel-backed store. Lets the suite drive the
/// full router without a live database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    async fn add_category(&self, category: Category) {
        let mut inner = self.inner.lock().await;
        inner.categories.insert(category.id, category);
    }
}

fn unique_username_violation() -> RepoError {
    RepoError::Database(diesel::result::Error::DatabaseError(
        diesel::result::DatabaseErrorKind::UniqueViolation,
        Box::new("duplicate key value violates unique constraint \"users_username_key\"".to_string()),
    ))
}

#[async_trait]
impl TicketRepository for MemoryStore {
    async fn insert_ticket(&self, ticket: NewTicket) -> RepoResult<Ticket> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now().naive_utc();
        let row = Ticket {
            id: ticket.id,
            subject: ticket.subject,
            description: ticket.description,
            status: ticket.status,
            customer_id: ticket.customer_id,
            assigned_to: ticket.assigned_to,
            category_id: ticket.category_id,
            created_at: now,
            updated_at: now,
        };
        inner.tickets.insert(row.id, row.clone());
        Ok(row)
    }

    async fn ticket_by_id(&self, id: Uuid) -> RepoResult<Option<Ticket>> {
        let inner = self.inner.lock().await;
        Ok(inner.tickets.get(&id).cloned())
    }

    async fn list_tickets(
        &self,
        scope: TicketScope,
        filter: Option<TicketFilter>,
    ) -> RepoResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|ticket| match scope {
                TicketScope::All => true,
                TicketScope::AssignedTo(user_id) => ticket.assigned_to == Some(user_id),
            })
            .filter(|ticket| match filter {
                Some(TicketFilter::Unassigned) => ticket.assigned_to.is_none(),
                Some(TicketFilter::WithStatus(status)) => ticket.status == status,
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_ticket(&self, id: Uuid, changes: TicketChanges) -> RepoResult<Ticket> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .tickets
            .get_mut(&id)
            .ok_or(diesel::result::Error::NotFound)?;
        if let Some(subject) = changes.subject {
            ticket.subject = subject;
        }
        if let Some(description) = changes.description {
            ticket.description = description;
        }
        if let Some(status) = changes.status {
            ticket.status = status;
        }
        if let Some(assigned_to) = changes.assigned_to {
            ticket.assigned_to = assigned_to;
        }
        if let Some(category_id) = changes.category_id {
            ticket.category_id = category_id;
        }
        ticket.updated_at = Utc::now().naive_utc();
        Ok(ticket.clone())
    }

    async fn delete_ticket(&self, id: Uuid) -> RepoResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.tickets.remove(&id).is_none() {
            return Ok(false);
        }
        inner.comments.retain(|comment| comment.ticket_id != id);
        inner
            .attachments
            .retain(|attachment| attachment.ticket_id != id);
        Ok(true)
    }

    async fn insert_comment(&self, comment: NewComment) -> RepoResult<Comment> {
        let mut inner = self.inner.lock().await;
        inner.comment_seq += 1;
        let row = Comment {
            id: comment.id,
            ticket_id: comment.ticket_id,
            seq: inner.comment_seq,
            author_id: comment.author_id,
            author_name: comment.author_name,
            author_role: comment.author_role,
            content: comment.content,
            created_at: Utc::now().naive_utc(),
        };
        let ticket_id = row.ticket_id;
        inner.comments.push(row.clone());
        if let Some(ticket) = inner.tickets.get_mut(&ticket_id) {
            ticket.updated_at = Utc::now().naive_utc();
        }
        Ok(row)
    }

    async fn comments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Comment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .comments
            .iter()
            .filter(|comment| comment.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn insert_attachment(&self, attachment: NewAttachment) -> RepoResult<Attachment> {
        let mut inner = self.inner.lock().await;
        inner.attachment_seq += 1;
        let row = Attachment {
            id: attachment.id,
            ticket_id: attachment.ticket_id,
            seq: inner.attachment_seq,
            file_name: attachment.file_name,
            link: attachment.link,
            content_type: attachment.content_type,
            size_bytes: attachment.size_bytes,
            checksum: attachment.checksum,
            created_at: Utc::now().naive_utc(),
        };
        let ticket_id = row.ticket_id;
        inner.attachments.push(row.clone());
        if let Some(ticket) = inner.tickets.get_mut(&ticket_id) {
            ticket.updated_at = Utc::now().naive_utc();
        }
        Ok(row)
    }

    async fn attachments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Attachment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attachments
            .iter()
            .filter(|attachment| attachment.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn unresolved_assigned_count(&self, user_id: Uuid) -> RepoResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .values()
            .filter(|ticket| {
                ticket.assigned_to == Some(user_id) && ticket.status != TicketStatus::Resolved
            })
            .count() as i64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> RepoResult<User> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|existing| existing.username == user.username)
        {
            return Err(unique_username_violation());
        }
        let now = Utc::now().naive_utc();
        let row = User {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn user_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn update_role(&self, id: Uuid, role: Role) -> RepoResult<User> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or(diesel::result::Error::NotFound)?;
        user.role = role;
        user.updated_at = Utc::now().naive_utc();
        Ok(user.clone())
    }
}

#[async_trait]
impl CategoryRegistry for MemoryStore {
    async fn category_by_id(&self, id: Uuid) -> RepoResult<Option<Category>> {
        let inner = self.inner.lock().await;
        Ok(inner.categories.get(&id).cloned())
    }
}

pub struct TestApp {
    router: Router,
    storage: Arc<FakeStorage>,
    store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        let config = AppConfig {
            database_url: "postgres://unused".to_string(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            attachment_url_expiry_minutes: 5,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
        };

        let store = Arc::new(MemoryStore::default());
        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let tickets = TicketService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            storage_for_state,
            Duration::from_secs(config.attachment_url_expiry_minutes * 60),
        );
        let state = AppState::new(config, tickets, store.clone(), jwt);
        let router = routes::create_router(state);

        Ok(Self {
            router,
            storage,
            store,
        })
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, role: Role) -> Result<Uuid> {
        let password_hash = hash_password(password)?;
        let user = self
            .store
            .insert_user(NewUser {
                id: Uuid::new_v4(),
                username: username.to_string(),
                password_hash,
                role,
            })
            .await?;
        Ok(user.id)
    }

    #[allow(dead_code)]
    pub async fn seed_category(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .add_category(Category {
                id,
                name: name.to_string(),
                created_at: Utc::now().naive_utc(),
            })
            .await;
        id
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_attachment(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        self.upload_field(path, "file", filename, content_type, data, token)
            .await
    }

    #[allow(dead_code)]
    pub async fn upload_field(
        &self,
        path: &str,
        field_name: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field_name, filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"));

        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}
