use std::collections::HashMap;

use crate::pgguard::error::{Error, Result};

/// Parsed key/value payload of a v3 startup packet, per §4.1: a NUL-separated list
/// terminated by an empty key, required to contain a non-empty `user`.
#[derive(Debug, Clone, Default)]
pub struct StartupParams {
    params: HashMap<String, String>,
}

impl StartupParams {
    pub fn parse(pairs: Vec<(String, String)>) -> Result<Self> {
        let params: HashMap<String, String> = pairs.into_iter().collect();
        let user = params.get("user").map(|s| s.as_str()).unwrap_or("");
        if user.is_empty() {
            return Err(Error::auth_invalid("user is required in startup packet"));
        }
        Ok(StartupParams { params })
    }

    pub fn user(&self) -> &str {
        self.params.get("user").map(|s| s.as_str()).unwrap_or("")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}
