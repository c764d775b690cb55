pub mod access;
pub mod patch;
mod service;

pub use service::{AttachmentDownload, TicketDetail, TicketService};
