use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Attachment, Category, Comment, NewAttachment, NewComment, NewTicket, NewUser, Role, Ticket,
    TicketChanges, TicketStatus, User,
};

pub mod postgres;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

/// Row visibility for ticket listings. The engine derives the scope from the
/// requester's role; repositories apply it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    AssignedTo(Uuid),
}

/// Optional listing filter. `Unassigned` is the synthetic filter meaning
/// `assigned_to IS NULL`; the literal status value is not separately
/// filterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketFilter {
    Unassigned,
    WithStatus(TicketStatus),
}

impl TicketFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "unassigned" {
            return Some(TicketFilter::Unassigned);
        }
        TicketStatus::parse(raw).map(TicketFilter::WithStatus)
    }
}

#[async_trait]
pub trait TicketRepository: Send + Sync + 'static {
    async fn insert_ticket(&self, ticket: NewTicket) -> RepoResult<Ticket>;

    async fn ticket_by_id(&self, id: Uuid) -> RepoResult<Option<Ticket>>;

    async fn list_tickets(
        &self,
        scope: TicketScope,
        filter: Option<TicketFilter>,
    ) -> RepoResult<Vec<Ticket>>;

    /// Applies `changes` atomically and returns the updated row. Fails with
    /// `diesel::result::Error::NotFound` when the ticket is gone.
    async fn update_ticket(&self, id: Uuid, changes: TicketChanges) -> RepoResult<Ticket>;

    /// Returns `true` when a row was deleted. Comments and attachments go
    /// with the ticket (`ON DELETE CASCADE`).
    async fn delete_ticket(&self, id: Uuid) -> RepoResult<bool>;

    /// Appends a comment and refreshes the parent ticket's `updated_at` in
    /// the same transaction.
    async fn insert_comment(&self, comment: NewComment) -> RepoResult<Comment>;

    /// Comments in exact append order, oldest first.
    async fn comments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Comment>>;

    /// Appends an attachment record and refreshes the parent ticket's
    /// `updated_at` in the same transaction.
    async fn insert_attachment(&self, attachment: NewAttachment) -> RepoResult<Attachment>;

    /// Attachments in exact append order, oldest first.
    async fn attachments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Attachment>>;

    /// Number of tickets assigned to `user_id` whose status is not
    /// `resolved`. Drives the role-transition guard.
    async fn unresolved_assigned_count(&self, user_id: Uuid) -> RepoResult<i64>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn insert_user(&self, user: NewUser) -> RepoResult<User>;

    async fn user_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;

    async fn user_by_username(&self, username: &str) -> RepoResult<Option<User>>;

    async fn update_role(&self, id: Uuid, role: Role) -> RepoResult<User>;
}

#[async_trait]
pub trait CategoryRegistry: Send + Sync + 'static {
    async fn category_by_id(&self, id: Uuid) -> RepoResult<Option<Category>>;
}
