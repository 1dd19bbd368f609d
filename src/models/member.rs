//! Membership and profile models.

use serde::{Deserialize, Serialize};

/// Role held on a board or workspace. Ordered `Viewer < Member < Admin < Owner`.
///
/// Unknown role strings read as `Viewer` so a malformed row never grants more access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Role::Viewer),
            "member" => Some(Role::Member),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::from_str(&s).unwrap_or(Role::Viewer)
    }
}

/// Public profile of a user, as stored in `profiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Profile {
    pub const COLLECTION: &'static str = "profiles";

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

/// A row of `board_members` or `workspace_members`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub role: Role,
    /// Joined in memory from `profiles`
    #[serde(skip)]
    pub profile: Option<Profile>,
}

impl Membership {
    pub const BOARD_COLLECTION: &'static str = "board_members";
    pub const WORKSPACE_COLLECTION: &'static str = "workspace_members";

    pub fn for_board(board_id: impl Into<String>, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            board_id: Some(board_id.into()),
            workspace_id: None,
            role,
            profile: None,
        }
    }

    pub fn for_workspace(
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            board_id: None,
            workspace_id: Some(workspace_id.into()),
            role,
            profile: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Viewer < Role::Member);
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn test_unknown_role_reads_as_viewer() {
        let m: Membership = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "user_id": "u1",
            "board_id": "b1",
            "role": "superuser"
        }))
        .unwrap();
        assert_eq!(m.role, Role::Viewer);
    }

    #[test]
    fn test_role_serde_uses_lowercase_names() {
        let value = serde_json::to_value(Role::Admin).unwrap();
        assert_eq!(value, serde_json::json!("admin"));
        let role: Role = serde_json::from_value(serde_json::json!("owner")).unwrap();
        assert_eq!(role, Role::Owner);
    }

    #[test]
    fn test_profile_skipped_when_serializing() {
        let mut m = Membership::for_board("b1", "u1", Role::Member);
        m.profile = Some(Profile {
            id: "u1".into(),
            email: "u1@example.com".into(),
            full_name: None,
            avatar_url: None,
        });
        let value = serde_json::to_value(&m).unwrap();
        assert!(value.get("profile").is_none());
        assert!(value.get("workspace_id").is_none());
    }
}
