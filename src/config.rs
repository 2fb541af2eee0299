/// Server URL used when `COMFYUI_URL` is unset.
pub const DEFAULT_URL: &str = "http://localhost:8188";

pub const URL_VAR: &str = "COMFYUI_URL";
pub const USERNAME_VAR: &str = "COMFYUI_USERNAME";
pub const PASSWORD_VAR: &str = "COMFYUI_PASSWORD";

/// Where to reach the ComfyUI server and how to authenticate.
///
/// Credentials are sent as HTTP basic auth when `username` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Read the connection from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the connection from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            url: lookup(URL_VAR).unwrap_or_else(|| DEFAULT_URL.to_string()),
            username: lookup(USERNAME_VAR),
            password: lookup(PASSWORD_VAR),
        }
    }

    /// Override the server URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }
}
