use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Comment, NewAttachment, NewComment, NewTicket, Role, Ticket, TicketChanges,
    TicketStatus, User,
};
use crate::repo::{CategoryRegistry, TicketFilter, TicketRepository, TicketScope, UserDirectory};
use crate::storage::ObjectStorage;
use crate::tickets::access::{can_access, AccessIntent};
use crate::tickets::patch::{FullPatch, StatusPatch, TicketPatch};

/// The ticket lifecycle engine. Owns every rule about who may do what to a
/// ticket and when status moves; handlers stay thin adapters over it.
#[derive(Clone)]
pub struct TicketService {
    tickets: Arc<dyn TicketRepository>,
    users: Arc<dyn UserDirectory>,
    categories: Arc<dyn CategoryRegistry>,
    storage: Arc<dyn ObjectStorage>,
    attachment_url_expiry: Duration,
}

/// A ticket together with the ordered ids of its sub-resources.
pub struct TicketDetail {
    pub ticket: Ticket,
    pub comment_ids: Vec<Uuid>,
    pub attachment_ids: Vec<Uuid>,
}

/// An attachment record paired with a freshly presigned download URL.
pub struct AttachmentDownload {
    pub record: Attachment,
    pub url: String,
}

impl TicketService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        users: Arc<dyn UserDirectory>,
        categories: Arc<dyn CategoryRegistry>,
        storage: Arc<dyn ObjectStorage>,
        attachment_url_expiry: Duration,
    ) -> Self {
        Self {
            tickets,
            users,
            categories,
            storage,
            attachment_url_expiry,
        }
    }

    pub async fn create_ticket(
        &self,
        requester: &AuthenticatedUser,
        subject: String,
        description: String,
        category: Option<Uuid>,
    ) -> AppResult<Ticket> {
        require_text("subject", &subject)?;
        require_text("description", &description)?;
        if let Some(category_id) = category {
            self.ensure_category(category_id).await?;
        }

        let ticket = self
            .tickets
            .insert_ticket(NewTicket {
                id: Uuid::new_v4(),
                subject,
                description,
                status: TicketStatus::Unassigned,
                customer_id: requester.user_id,
                assigned_to: None,
                category_id: category,
            })
            .await?;

        info!(ticket_id = %ticket.id, customer = %requester.user_id, "ticket created");
        Ok(ticket)
    }

    pub async fn ticket_by_id(
        &self,
        requester: &AuthenticatedUser,
        id: Uuid,
    ) -> AppResult<Ticket> {
        self.authorized_ticket(requester, id, AccessIntent::Read)
            .await
    }

    pub async fn ticket_detail(
        &self,
        requester: &AuthenticatedUser,
        id: Uuid,
    ) -> AppResult<TicketDetail> {
        let ticket = self
            .authorized_ticket(requester, id, AccessIntent::Read)
            .await?;
        let comment_ids = self
            .tickets
            .comments_for_ticket(id)
            .await?
            .into_iter()
            .map(|comment| comment.id)
            .collect();
        let attachment_ids = self
            .tickets
            .attachments_for_ticket(id)
            .await?
            .into_iter()
            .map(|attachment| attachment.id)
            .collect();

        Ok(TicketDetail {
            ticket,
            comment_ids,
            attachment_ids,
        })
    }

    /// Staff see only tickets assigned to them; admins see everything;
    /// customers have no listing surface at all.
    pub async fn list_tickets(
        &self,
        requester: &AuthenticatedUser,
        filter: Option<TicketFilter>,
    ) -> AppResult<Vec<Ticket>> {
        let scope = match requester.role {
            Role::Admin => TicketScope::All,
            Role::Staff => TicketScope::AssignedTo(requester.user_id),
            Role::Customer => {
                return Err(AppError::forbidden(
                    "ticket listing is restricted to staff and admins",
                ))
            }
        };

        Ok(self.tickets.list_tickets(scope, filter).await?)
    }

    pub async fn update_ticket(
        &self,
        requester: &AuthenticatedUser,
        id: Uuid,
        patch: TicketPatch,
    ) -> AppResult<Ticket> {
        let ticket = self.require_ticket(id).await?;

        let changes = match patch {
            TicketPatch::Status(StatusPatch { status }) => {
                if !can_access(&ticket, requester, AccessIntent::MutateStatusOnly) {
                    return Err(AppError::forbidden(AccessIntent::MutateStatusOnly.denial()));
                }
                TicketChanges {
                    status: Some(status),
                    ..Default::default()
                }
            }
            TicketPatch::Full(full) => {
                if !can_access(&ticket, requester, AccessIntent::MutateFull) {
                    return Err(AppError::forbidden(AccessIntent::MutateFull.denial()));
                }
                self.full_patch_changes(full).await?
            }
        };

        let updated = self.tickets.update_ticket(id, changes).await?;
        info!(ticket_id = %updated.id, actor = %requester.user_id, "ticket updated");
        Ok(updated)
    }

    pub async fn assign_ticket(
        &self,
        requester: &AuthenticatedUser,
        id: Uuid,
        assignee: Option<Uuid>,
    ) -> AppResult<Ticket> {
        let ticket = self.require_ticket(id).await?;
        if !can_access(&ticket, requester, AccessIntent::MutateFull) {
            return Err(AppError::forbidden("only staff or admins may assign tickets"));
        }
        if let Some(assignee_id) = assignee {
            self.ensure_assignable(assignee_id).await?;
        }

        let mut changes = TicketChanges {
            assigned_to: Some(assignee),
            ..Default::default()
        };
        // The single implied status move: a non-null assignee on an
        // unassigned ticket starts progress. Unassigning never moves status.
        if assignee.is_some() && ticket.status == TicketStatus::Unassigned {
            changes.status = Some(TicketStatus::InProgress);
        }

        let updated = self.tickets.update_ticket(id, changes).await?;
        info!(
            ticket_id = %updated.id,
            assignee = ?assignee,
            actor = %requester.user_id,
            "ticket assignment changed"
        );
        Ok(updated)
    }

    pub async fn delete_ticket(&self, requester: &AuthenticatedUser, id: Uuid) -> AppResult<()> {
        let ticket = self
            .authorized_ticket(requester, id, AccessIntent::Delete)
            .await?;
        let attachments = self.tickets.attachments_for_ticket(id).await?;

        if !self.tickets.delete_ticket(id).await? {
            return Err(AppError::not_found());
        }

        for attachment in &attachments {
            if let Err(err) = self.storage.delete_object(&attachment.link).await {
                warn!(
                    ticket_id = %id,
                    key = %attachment.link,
                    error = %err,
                    "failed to delete attachment object"
                );
            }
        }

        info!(ticket_id = %ticket.id, actor = %requester.user_id, "ticket deleted");
        Ok(())
    }

    pub async fn add_comment(
        &self,
        requester: &AuthenticatedUser,
        ticket_id: Uuid,
        content: String,
    ) -> AppResult<Comment> {
        require_text("content", &content)?;
        self.authorized_ticket(requester, ticket_id, AccessIntent::Comment)
            .await?;

        let comment = self
            .tickets
            .insert_comment(NewComment {
                id: Uuid::new_v4(),
                ticket_id,
                author_id: requester.user_id,
                author_name: requester.username.clone(),
                author_role: requester.role,
                content,
            })
            .await?;

        info!(
            ticket_id = %ticket_id,
            comment_id = %comment.id,
            author = %requester.user_id,
            "comment added"
        );
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        requester: &AuthenticatedUser,
        ticket_id: Uuid,
    ) -> AppResult<Vec<Comment>> {
        self.authorized_ticket(requester, ticket_id, AccessIntent::Read)
            .await?;
        Ok(self.tickets.comments_for_ticket(ticket_id).await?)
    }

    pub async fn add_attachment(
        &self,
        requester: &AuthenticatedUser,
        ticket_id: Uuid,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> AppResult<Attachment> {
        require_text("file name", &file_name)?;
        if bytes.is_empty() {
            return Err(AppError::validation("uploaded file is empty"));
        }
        self.authorized_ticket(requester, ticket_id, AccessIntent::Attach)
            .await?;

        let attachment_id = Uuid::new_v4();
        let link = format!("tickets/{ticket_id}/attachments/{attachment_id}");
        let checksum = hex::encode(Sha256::digest(&bytes));
        let size_bytes = bytes.len() as i64;
        let content_type = content_type.or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|mime| mime.to_string())
        });
        let content_disposition = inline_content_disposition(&file_name);

        self.storage
            .put_object(&link, bytes, content_type.clone(), content_disposition)
            .await
            .map_err(|err| {
                error!(key = %link, error = %err, "failed to store attachment");
                AppError::unavailable(format!("failed to store attachment: {err}"))
            })?;

        let attachment = self
            .tickets
            .insert_attachment(NewAttachment {
                id: attachment_id,
                ticket_id,
                file_name,
                link,
                content_type,
                size_bytes,
                checksum,
            })
            .await?;

        info!(
            ticket_id = %ticket_id,
            attachment_id = %attachment.id,
            size_bytes,
            "attachment uploaded"
        );
        Ok(attachment)
    }

    pub async fn list_attachments(
        &self,
        requester: &AuthenticatedUser,
        ticket_id: Uuid,
    ) -> AppResult<Vec<AttachmentDownload>> {
        self.authorized_ticket(requester, ticket_id, AccessIntent::Read)
            .await?;
        let records = self.tickets.attachments_for_ticket(ticket_id).await?;

        let mut downloads = Vec::with_capacity(records.len());
        for record in records {
            let url = self
                .storage
                .presign_get_object(&record.link, self.attachment_url_expiry)
                .await
                .map_err(|err| {
                    error!(key = %record.link, error = %err, "failed to presign attachment download");
                    AppError::unavailable(format!("failed to presign attachment download: {err}"))
                })?;
            downloads.push(AttachmentDownload { record, url });
        }

        Ok(downloads)
    }

    /// Role changes are admin-only. A change away from `staff` is blocked
    /// while the target still has unresolved assigned tickets, except when
    /// an admin changes their own role.
    pub async fn change_user_role(
        &self,
        requester: &AuthenticatedUser,
        target_id: Uuid,
        new_role: Role,
    ) -> AppResult<User> {
        if requester.role != Role::Admin {
            return Err(AppError::forbidden("only admins may change user roles"));
        }

        let target = self
            .users
            .user_by_id(target_id)
            .await?
            .ok_or_else(AppError::not_found)?;

        let leaving_staff = target.role == Role::Staff && new_role != Role::Staff;
        let self_change = requester.user_id == target.id;
        if leaving_staff && !self_change {
            let open = self.tickets.unresolved_assigned_count(target.id).await?;
            if open > 0 {
                return Err(AppError::conflict("unresolved tickets assigned"));
            }
        }

        let updated = self.users.update_role(target_id, new_role).await?;
        info!(
            user_id = %updated.id,
            from = %target.role,
            to = %new_role,
            actor = %requester.user_id,
            "user role changed"
        );
        Ok(updated)
    }

    /// Validates a full patch and maps it onto column changes. A direct
    /// `assigned_to` edit here never moves status; that transition belongs
    /// to the assignment operation alone.
    async fn full_patch_changes(&self, patch: FullPatch) -> AppResult<TicketChanges> {
        if let Some(subject) = patch.subject.as_deref() {
            require_text("subject", subject)?;
        }
        if let Some(description) = patch.description.as_deref() {
            require_text("description", description)?;
        }
        if let Some(Some(assignee)) = patch.assigned_to {
            self.ensure_assignable(assignee).await?;
        }
        if let Some(Some(category_id)) = patch.category {
            self.ensure_category(category_id).await?;
        }

        Ok(TicketChanges {
            subject: patch.subject,
            description: patch.description,
            status: patch.status,
            assigned_to: patch.assigned_to,
            category_id: patch.category,
        })
    }

    async fn require_ticket(&self, id: Uuid) -> AppResult<Ticket> {
        self.tickets
            .ticket_by_id(id)
            .await?
            .ok_or_else(AppError::not_found)
    }

    async fn authorized_ticket(
        &self,
        requester: &AuthenticatedUser,
        id: Uuid,
        intent: AccessIntent,
    ) -> AppResult<Ticket> {
        let ticket = self.require_ticket(id).await?;
        if !can_access(&ticket, requester, intent) {
            return Err(AppError::forbidden(intent.denial()));
        }
        Ok(ticket)
    }

    async fn ensure_assignable(&self, assignee: Uuid) -> AppResult<()> {
        let user = self
            .users
            .user_by_id(assignee)
            .await?
            .ok_or_else(|| AppError::validation("assignee does not exist"))?;
        if !matches!(user.role, Role::Staff | Role::Admin) {
            return Err(AppError::validation("assignee must be a staff or admin user"));
        }
        Ok(())
    }

    async fn ensure_category(&self, category_id: Uuid) -> AppResult<()> {
        self.categories
            .category_by_id(category_id)
            .await?
            .ok_or_else(|| AppError::validation("unknown category"))?;
        Ok(())
    }
}

fn require_text(field: &'static str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn inline_content_disposition(file_name: &str) -> Option<String> {
    if file_name.is_empty() {
        return None;
    }

    let sanitized: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}
