use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{domain::AccountName, ports::TelegramClient};

/// One live client handle per account name.
#[derive(Default)]
pub struct AccountRegistry {
    clients: Mutex<HashMap<AccountName, Arc<dyn TelegramClient>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &AccountName) -> Option<Arc<dyn TelegramClient>> {
        self.clients.lock().await.get(name).cloned()
    }

    /// Install a handle, returning the one it replaced.
    pub async fn put(
        &self,
        name: AccountName,
        client: Arc<dyn TelegramClient>,
    ) -> Option<Arc<dyn TelegramClient>> {
        self.clients.lock().await.insert(name, client)
    }

    pub async fn remove(&self, name: &AccountName) -> Option<Arc<dyn TelegramClient>> {
        self.clients.lock().await.remove(name)
    }

    pub async fn names(&self) -> Vec<AccountName> {
        let mut names: Vec<_> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
