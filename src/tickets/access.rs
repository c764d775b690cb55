use crate::auth::AuthenticatedUser;
use crate::models::{Role, Ticket};

/// The category of access being requested against a ticket. Comments and
/// attachments delegate to the parent ticket's rule rather than carrying
/// rules of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Comment,
    Attach,
    MutateFull,
    MutateStatusOnly,
    Delete,
}

impl AccessIntent {
    /// Message returned when the predicate denies this intent.
    pub fn denial(&self) -> &'static str {
        match self {
            AccessIntent::Read => "not allowed to view this ticket",
            AccessIntent::Comment => "not allowed to comment on this ticket",
            AccessIntent::Attach => "not allowed to attach files to this ticket",
            AccessIntent::MutateFull => "not allowed to edit ticket fields",
            AccessIntent::MutateStatusOnly => "not allowed to change this ticket's status",
            AccessIntent::Delete => "only admins may delete tickets",
        }
    }
}

/// The single authorization predicate gating every ticket operation.
///
/// Staff and admin act on any ticket; the owning customer may read, comment,
/// attach, and change status on their own; only admins delete.
pub fn can_access(ticket: &Ticket, requester: &AuthenticatedUser, intent: AccessIntent) -> bool {
    let staff_or_admin = matches!(requester.role, Role::Staff | Role::Admin);
    let owner = requester.user_id == ticket.customer_id;

    match intent {
        AccessIntent::Read | AccessIntent::Comment | AccessIntent::Attach => {
            staff_or_admin || owner
        }
        AccessIntent::MutateFull => staff_or_admin,
        AccessIntent::MutateStatusOnly => staff_or_admin || owner,
        AccessIntent::Delete => requester.role == Role::Admin,
    }
}
