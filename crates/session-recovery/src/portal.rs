use serde::{Deserialize, Serialize};

/// Portal login credentials. Debug output never includes the password.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// URLs and selectors of the target portal surfaces the core touches:
/// the authenticated landing page used for probing and the login form.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub landing_url: String,
    pub login_url: String,
    /// Present only while a session is authenticated.
    pub authenticated_marker: String,
    /// Present only on the logged-out surfaces.
    pub unauthenticated_marker: String,
    pub username_field: String,
    pub password_field: String,
    pub challenge_image: String,
    pub challenge_field: String,
    pub submit_button: String,
    pub credentials: Credentials,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            landing_url: "https://agent.example-insurer.com/workbench".to_string(),
            login_url: "https://agent.example-insurer.com/login".to_string(),
            authenticated_marker: "#user-menu a.logout".to_string(),
            unauthenticated_marker: "form#login-form".to_string(),
            username_field: "#username".to_string(),
            password_field: "#password".to_string(),
            challenge_image: "img#captcha".to_string(),
            challenge_field: "#captcha-answer".to_string(),
            submit_button: "button[type=submit]".to_string(),
            credentials: Credentials::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials {
            username: "agent007".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("agent007"));
        assert!(!rendered.contains("hunter2"));
    }
}
