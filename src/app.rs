//! Application context: one place that owns every store and client.
//!
//! Nothing here is a global. Whoever owns the process (the CLI, a UI shell,
//! a test) constructs an `App` from a `Config`, passes it around, and drops
//! it on shutdown. Each test builds its own instance against its own
//! backend, which keeps the stores independently testable.

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::auth::AuthClient;
use crate::gateway::{BearerToken, Gateway};
use crate::store::{AuthStore, ListStore, TaskStore};

pub struct App {
    pub config: Config,
    pub gateway: Arc<Gateway>,
    pub auth_client: Arc<AuthClient>,
    pub auth: Arc<AuthStore>,
    pub lists: Arc<ListStore>,
    pub tasks: Arc<TaskStore>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let bearer = Arc::new(BearerToken::default());
        let gateway = Arc::new(Gateway::new(&config, bearer.clone()));
        let auth_client = AuthClient::new(&config, bearer);
        let auth = AuthStore::new(auth_client.clone(), gateway.clone(), &config);
        let lists = ListStore::new(gateway.clone());
        let tasks = TaskStore::new(gateway.clone());
        Self {
            config,
            gateway,
            auth_client,
            auth,
            lists,
            tasks,
        }
    }
}
