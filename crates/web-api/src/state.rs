use std::sync::Arc;

use application::{ActionDispatcher, BlobStorage, ChatService, RegistryHandle};
use config::SessionConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub registry: RegistryHandle,
    pub dispatcher: Arc<ActionDispatcher>,
    pub blob_storage: Arc<dyn BlobStorage>,
    pub jwt_service: Arc<JwtService>,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        registry: RegistryHandle,
        blob_storage: Arc<dyn BlobStorage>,
        jwt_service: Arc<JwtService>,
        session: SessionConfig,
    ) -> Self {
        let dispatcher = Arc::new(ActionDispatcher::new(
            chat_service.clone(),
            registry.clone(),
        ));
        Self {
            chat_service,
            registry,
            dispatcher,
            blob_storage,
            jwt_service,
            session,
        }
    }
}
