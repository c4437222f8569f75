use tempfile::TempDir;

use crate::auth::{NewUser, Role, UserInfo};
use crate::config::{AppState, ChatServerConfig};

/// Fresh state over a throw-away database. Keep the directory alive for the
/// duration of the test.
pub async fn setup() -> (TempDir, AppState) {
    let dir = TempDir::new().unwrap();
    let mut config = ChatServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;
    let state = AppState::build(config).await.unwrap();
    (dir, state)
}

pub async fn register(state: &AppState, name: &str) -> UserInfo {
    state
        .auth
        .register(NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password: "hunter22".to_string(),
            role: Role::Customer,
        })
        .await
        .unwrap()
}
