use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::TicketStatus;

/// Wire payload for a ticket update. All keys are optional; `assigned_to`
/// and `category` distinguish an absent key from an explicit `null` so a
/// patch can clear them.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketBody {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<Uuid>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A classified ticket patch. The variant carries the authorization
/// requirement: `Status` is the owner-permitted path, `Full` requires staff
/// or admin. Classification is by key presence: a payload whose only key is
/// `status` is a `Status` patch; any other present key makes it `Full`.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketPatch {
    Status(StatusPatch),
    Full(FullPatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: TicketStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullPatch {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<TicketStatus>,
    pub assigned_to: Option<Option<Uuid>>,
    pub category: Option<Option<Uuid>>,
}

impl UpdateTicketBody {
    pub fn classify(self) -> AppResult<TicketPatch> {
        let UpdateTicketBody {
            subject,
            description,
            status,
            assigned_to,
            category,
        } = self;

        let status = match status {
            Some(raw) => Some(
                TicketStatus::parse(&raw)
                    .ok_or_else(|| AppError::validation(format!("unknown status: {raw}")))?,
            ),
            None => None,
        };

        let has_full_key = subject.is_some()
            || description.is_some()
            || assigned_to.is_some()
            || category.is_some();

        if !has_full_key {
            return match status {
                Some(status) => Ok(TicketPatch::Status(StatusPatch { status })),
                None => Err(AppError::validation("patch must contain at least one field")),
            };
        }

        Ok(TicketPatch::Full(FullPatch {
            subject,
            description,
            status,
            assigned_to,
            category,
        }))
    }
}
