//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{role::RoleName, text_enum};

/// Principal tier of a user row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    SuperUser,
    CompanyUser,
    /// Exists for uniform principal typing; never logs in interactively.
    DeviceUser,
}

text_enum!(UserType, "user type", {
    SuperUser => "SUPER_USER",
    CompanyUser => "COMPANY_USER",
    DeviceUser => "DEVICE_USER",
});

/// User status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
}

text_enum!(UserStatus, "user status", {
    Active => "active",
    Suspended => "suspended",
    Pending => "pending",
});

/// User account. Never deleted; deactivated through `status`.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub user_type: UserType,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: &str,
        password_hash: String,
        display_name: &str,
        user_type: UserType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            display_name: display_name.trim().to_string(),
            user_type,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Emails are unique case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User response (without sensitive info)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub user_type: UserType,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            user_type: user.user_type,
            status: user.status,
            created_at: user.created_at,
        }
    }
}

/// Create a company user together with its first (primary) role binding
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCompanyUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub display_name: String,
    pub password: String,
    pub role: RoleName,
}

/// Update user status request
#[derive(Debug, Deserialize)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&UserType::CompanyUser).unwrap(),
            r#""COMPANY_USER""#
        );
        assert_eq!("DEVICE_USER".parse::<UserType>().unwrap(), UserType::DeviceUser);
        assert!("company_user".parse::<UserType>().is_err());
    }

    #[test]
    fn test_new_user_normalizes_email() {
        let user = User::new(" Ops@Acme.COM ", "hash".into(), "Ops", UserType::CompanyUser);
        assert_eq!(user.email, "ops@acme.com");
        assert!(user.is_active());
    }
}
