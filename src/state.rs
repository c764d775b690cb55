use std::sync::Arc;

use crate::{
    auth::jwt::JwtService, config::AppConfig, repo::UserDirectory, tickets::TicketService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tickets: TicketService,
    pub users: Arc<dyn UserDirectory>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        tickets: TicketService,
        users: Arc<dyn UserDirectory>,
        jwt: JwtService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            tickets,
            users,
            jwt,
        }
    }
}
