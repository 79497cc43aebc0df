use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;
}

/// Signed-in identity for a single chat session.
#[derive(Debug, Default)]
pub struct SessionAuth {
    user: RwLock<Option<UserIdentity>>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: UserIdentity) -> Self {
        Self {
            user: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: UserIdentity) {
        if let Ok(mut user) = self.user.write() {
            *user = Some(identity);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut user) = self.user.write() {
            *user = None;
        }
    }
}

impl AuthProvider for SessionAuth {
    fn current_user(&self) -> Option<UserIdentity> {
        self.user.read().ok().and_then(|user| user.clone())
    }
}
