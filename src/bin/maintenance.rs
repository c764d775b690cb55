use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use helpdesk::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    models::{NewUser, Role, User},
    schema::users,
};

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("create-admin") => {
            let username = args.next().context("missing <username>")?;
            let password = args.next().context("missing <password>")?;
            create_admin(&username, &password)?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance create-admin <username> <password>");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance create-admin <username> <password>");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Creates the given user as an admin, or promotes an existing account.
/// Role changes through the API require an admin, so the first one has to
/// come from here.
fn create_admin(username: &str, password: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let existing: Option<User> = users::table
        .filter(users::username.eq(username))
        .first(&mut conn)
        .optional()
        .context("failed to look up user")?;

    if let Some(user) = existing {
        if user.role == Role::Admin {
            println!("User {username} is already an admin.");
            return Ok(());
        }
        diesel::update(users::table.filter(users::id.eq(user.id)))
            .set((
                users::role.eq(Role::Admin),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .context("failed to promote user")?;
        println!("Promoted {username} to admin.");
        return Ok(());
    }

    let password_hash = hash_password(password)?;
    diesel::insert_into(users::table)
        .values(NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role: Role::Admin,
        })
        .execute(&mut conn)
        .context("failed to create admin user")?;

    println!("Created admin user {username}.");
    Ok(())
}
