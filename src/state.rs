use std::sync::Arc;

use crate::{config::AppConfig, db::OrmConn, storage::FileStorage};

#[derive(Clone)]
pub struct AppState {
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub storage: Arc<FileStorage>,
}

impl AppState {
    pub fn new(orm: OrmConn, config: AppConfig) -> Self {
        let storage = FileStorage::new(
            &config.storage_root,
            &config.jwt_secret,
            &config.public_base_url,
            config.presign_ttl_secs,
        );
        Self {
            orm,
            config: Arc::new(config),
            storage: Arc::new(storage),
        }
    }
}
