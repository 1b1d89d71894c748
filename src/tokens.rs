// SPDX-License-Identifier: MIT
//! Workspace installation tokens.
//!
//! Populated by the lifecycle surface when the addon is installed into a
//! workspace. The engine only reads: a missing token means mutations for that
//! workspace are skipped with a precondition failure.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the installation token for a workspace.
    pub fn put(&self, workspace_id: impl Into<String>, token: impl Into<String>) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(workspace_id.into(), token.into());
    }

    pub fn get(&self, workspace_id: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens.get(workspace_id).cloned()
    }

    /// Remove a workspace's token (uninstall).
    pub fn remove(&self, workspace_id: &str) -> bool {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(workspace_id).is_some()
    }
}
