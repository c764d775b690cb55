use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Attachment, Comment, Role, Ticket, TicketStatus},
    repo::TicketFilter,
    state::AppState,
    tickets::patch::UpdateTicketBody,
};

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub description: String,
    pub category: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct TicketListQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignTicketRequest {
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AddCommentRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub customer: Uuid,
    pub assigned_to: Option<Uuid>,
    pub category: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_attachments: Option<Vec<Uuid>>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct TicketDetailResponse {
    pub ticket: TicketResponse,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author: Uuid,
    pub author_name: String,
    pub author_role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub file_name: String,
    pub link: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: String,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<TicketResponse>)> {
    let CreateTicketRequest {
        subject,
        description,
        category,
    } = payload;

    let ticket = state
        .tickets
        .create_ticket(&user, subject, description, category)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(to_ticket_response(ticket, None, None)),
    ))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TicketResponse>>> {
    let filter = match params.status.as_deref() {
        Some(raw) => Some(
            TicketFilter::parse(raw)
                .ok_or_else(|| AppError::validation(format!("unknown status filter: {raw}")))?,
        ),
        None => None,
    };

    let rows = state.tickets.list_tickets(&user, filter).await?;
    Ok(Json(
        rows.into_iter()
            .map(|ticket| to_ticket_response(ticket, None, None))
            .collect(),
    ))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TicketDetailResponse>> {
    let detail = state.tickets.ticket_detail(&user, ticket_id).await?;
    Ok(Json(TicketDetailResponse {
        ticket: to_ticket_response(
            detail.ticket,
            Some(detail.comment_ids),
            Some(detail.attachment_ids),
        ),
    }))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateTicketBody>,
) -> AppResult<Json<TicketResponse>> {
    let patch = body.classify()?;
    let ticket = state.tickets.update_ticket(&user, ticket_id, patch).await?;
    Ok(Json(to_ticket_response(ticket, None, None)))
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AssignTicketRequest>,
) -> AppResult<Json<TicketResponse>> {
    let ticket = state
        .tickets
        .assign_ticket(&user, ticket_id, payload.assigned_to)
        .await?;
    Ok(Json(to_ticket_response(ticket, None, None)))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    state.tickets.delete_ticket(&user, ticket_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AddCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let comment = state
        .tickets
        .add_comment(&user, ticket_id, payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(to_comment_response(comment))))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let rows = state.tickets.list_comments(&user, ticket_id).await?;
    Ok(Json(rows.into_iter().map(to_comment_response).collect()))
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::validation(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            file_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::validation(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::validation("file field is required"))?;
    let file_name = file_name.ok_or_else(|| AppError::validation("filename is required"))?;

    let attachment = state
        .tickets
        .add_attachment(&user, ticket_id, file_name, content_type, file_bytes)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(to_attachment_response(attachment, None)),
    ))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AttachmentResponse>>> {
    let downloads = state.tickets.list_attachments(&user, ticket_id).await?;
    Ok(Json(
        downloads
            .into_iter()
            .map(|download| to_attachment_response(download.record, Some(download.url)))
            .collect(),
    ))
}

fn to_ticket_response(
    ticket: Ticket,
    comments: Option<Vec<Uuid>>,
    file_attachments: Option<Vec<Uuid>>,
) -> TicketResponse {
    TicketResponse {
        id: ticket.id,
        subject: ticket.subject,
        description: ticket.description,
        status: ticket.status,
        customer: ticket.customer_id,
        assigned_to: ticket.assigned_to,
        category: ticket.category_id,
        comments,
        file_attachments,
        created_at: to_iso(ticket.created_at),
        updated_at: to_iso(ticket.updated_at),
    }
}

fn to_comment_response(comment: Comment) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        ticket_id: comment.ticket_id,
        author: comment.author_id,
        author_name: comment.author_name,
        author_role: comment.author_role,
        content: comment.content,
        created_at: to_iso(comment.created_at),
    }
}

fn to_attachment_response(attachment: Attachment, url: Option<String>) -> AttachmentResponse {
    AttachmentResponse {
        id: attachment.id,
        ticket_id: attachment.ticket_id,
        file_name: attachment.file_name,
        link: attachment.link,
        content_type: attachment.content_type,
        size_bytes: attachment.size_bytes,
        checksum: attachment.checksum,
        url,
        created_at: to_iso(attachment.created_at),
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
