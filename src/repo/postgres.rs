use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{
    Attachment, Category, Comment, NewAttachment, NewComment, NewTicket, NewUser, Role, Ticket,
    TicketChanges, TicketStatus, User,
};
use crate::repo::{
    CategoryRegistry, RepoError, RepoResult, TicketFilter, TicketRepository, TicketScope,
    UserDirectory,
};
use crate::schema::{attachments, categories, comments, tickets, users};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Postgres-backed implementation of the repository traits. One store serves
/// tickets, users, and categories; every method is a short transaction
/// against the pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> RepoResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| RepoError::Unavailable(format!("database pool error: {err}")))
    }
}

#[async_trait]
impl TicketRepository for PgStore {
    async fn insert_ticket(&self, ticket: NewTicket) -> RepoResult<Ticket> {
        let mut conn = self.conn()?;
        let inserted = diesel::insert_into(tickets::table)
            .values(&ticket)
            .get_result::<Ticket>(&mut conn)?;
        Ok(inserted)
    }

    async fn ticket_by_id(&self, id: Uuid) -> RepoResult<Option<Ticket>> {
        let mut conn = self.conn()?;
        let ticket = tickets::table
            .filter(tickets::id.eq(id))
            .first::<Ticket>(&mut conn)
            .optional()?;
        Ok(ticket)
    }

    async fn list_tickets(
        &self,
        scope: TicketScope,
        filter: Option<TicketFilter>,
    ) -> RepoResult<Vec<Ticket>> {
        let mut conn = self.conn()?;
        let mut query = tickets::table.into_boxed();

        if let TicketScope::AssignedTo(user_id) = scope {
            query = query.filter(tickets::assigned_to.eq(user_id));
        }

        match filter {
            Some(TicketFilter::Unassigned) => {
                query = query.filter(tickets::assigned_to.is_null());
            }
            Some(TicketFilter::WithStatus(status)) => {
                query = query.filter(tickets::status.eq(status));
            }
            None => {}
        }

        let rows = query
            .order(tickets::created_at.desc())
            .load::<Ticket>(&mut conn)?;
        Ok(rows)
    }

    async fn update_ticket(&self, id: Uuid, changes: TicketChanges) -> RepoResult<Ticket> {
        let mut conn = self.conn()?;
        let now = Utc::now().naive_utc();
        let affected = diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set((changes, tickets::updated_at.eq(now)))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(diesel::result::Error::NotFound.into());
        }
        let ticket = tickets::table
            .filter(tickets::id.eq(id))
            .first::<Ticket>(&mut conn)?;
        Ok(ticket)
    }

    async fn delete_ticket(&self, id: Uuid) -> RepoResult<bool> {
        let mut conn = self.conn()?;
        let affected =
            diesel::delete(tickets::table.filter(tickets::id.eq(id))).execute(&mut conn)?;
        Ok(affected > 0)
    }

    async fn insert_comment(&self, comment: NewComment) -> RepoResult<Comment> {
        let mut conn = self.conn()?;
        let inserted = conn.transaction::<Comment, diesel::result::Error, _>(|conn| {
            let inserted = diesel::insert_into(comments::table)
                .values(&comment)
                .get_result::<Comment>(conn)?;
            touch_ticket(conn, inserted.ticket_id)?;
            Ok(inserted)
        })?;
        Ok(inserted)
    }

    async fn comments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Comment>> {
        let mut conn = self.conn()?;
        let rows = comments::table
            .filter(comments::ticket_id.eq(ticket_id))
            .order(comments::seq.asc())
            .load::<Comment>(&mut conn)?;
        Ok(rows)
    }

    async fn insert_attachment(&self, attachment: NewAttachment) -> RepoResult<Attachment> {
        let mut conn = self.conn()?;
        let inserted = conn.transaction::<Attachment, diesel::result::Error, _>(|conn| {
            let inserted = diesel::insert_into(attachments::table)
                .values(&attachment)
                .get_result::<Attachment>(conn)?;
            touch_ticket(conn, inserted.ticket_id)?;
            Ok(inserted)
        })?;
        Ok(inserted)
    }

    async fn attachments_for_ticket(&self, ticket_id: Uuid) -> RepoResult<Vec<Attachment>> {
        let mut conn = self.conn()?;
        let rows = attachments::table
            .filter(attachments::ticket_id.eq(ticket_id))
            .order(attachments::seq.asc())
            .load::<Attachment>(&mut conn)?;
        Ok(rows)
    }

    async fn unresolved_assigned_count(&self, user_id: Uuid) -> RepoResult<i64> {
        let mut conn = self.conn()?;
        let count = tickets::table
            .filter(tickets::assigned_to.eq(user_id))
            .filter(tickets::status.ne(TicketStatus::Resolved))
            .count()
            .get_result::<i64>(&mut conn)?;
        Ok(count)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn insert_user(&self, user: NewUser) -> RepoResult<User> {
        let mut conn = self.conn()?;
        let inserted = diesel::insert_into(users::table)
            .values(&user)
            .get_result::<User>(&mut conn)?;
        Ok(inserted)
    }

    async fn user_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let mut conn = self.conn()?;
        let user = users::table
            .filter(users::id.eq(id))
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let mut conn = self.conn()?;
        let user = users::table
            .filter(users::username.eq(username))
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    async fn update_role(&self, id: Uuid, role: Role) -> RepoResult<User> {
        let mut conn = self.conn()?;
        let now = Utc::now().naive_utc();
        let affected = diesel::update(users::table.filter(users::id.eq(id)))
            .set((users::role.eq(role), users::updated_at.eq(now)))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(diesel::result::Error::NotFound.into());
        }
        let user = users::table
            .filter(users::id.eq(id))
            .first::<User>(&mut conn)?;
        Ok(user)
    }
}

#[async_trait]
impl CategoryRegistry for PgStore {
    async fn category_by_id(&self, id: Uuid) -> RepoResult<Option<Category>> {
        let mut conn = self.conn()?;
        let category = categories::table
            .filter(categories::id.eq(id))
            .first::<Category>(&mut conn)
            .optional()?;
        Ok(category)
    }
}

fn touch_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> QueryResult<()> {
    diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
        .set(tickets::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}
