use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserProfile {
    pub fn role_display(&self) -> &str {
        self.role.as_deref().unwrap_or("member")
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub token: String,
    pub user: UserProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{"token":"abc.def.ghi","user":{"id":7,"name":"Ana Lima","email":"ana@dojo.test","role":"instructor"}}"#;
        let resp: LoginResponse = serde_json::from_str(json).expect("Failed to parse login JSON");
        assert_eq!(resp.token, "abc.def.ghi");
        assert_eq!(resp.user.id, 7);
        assert_eq!(resp.user.role_display(), "instructor");
    }

    #[test]
    fn test_parse_access_token_alias_and_missing_role() {
        let json = r#"{"accessToken":"t0k","user":{"id":1,"name":"Kenji","email":"k@dojo.test"}}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token, "t0k");
        assert_eq!(resp.user.role, None);
        assert_eq!(resp.user.role_display(), "member");
    }

    #[test]
    fn test_user_profile_round_trips_without_role() {
        let user = UserProfile {
            id: 3,
            name: "Mei".to_string(),
            email: "mei@dojo.test".to_string(),
            role: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("role"));
        assert_eq!(serde_json::from_str::<UserProfile>(&json).unwrap(), user);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("ana@dojo.test", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("ana@dojo.test"));
        assert!(!debug.contains("hunter2"));
    }
}
