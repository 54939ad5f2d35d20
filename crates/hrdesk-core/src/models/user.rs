use serde::{Deserialize, Serialize};

/// Identity snapshot stored alongside the tokens so a client can render
/// the signed-in user without another round trip.
///
/// Serialized in the `userData` layout (`profilePic` for the image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(
        rename = "profilePic",
        alias = "profileImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_image: Option<String>,
}

impl UserSnapshot {
    pub fn to_legacy(&self) -> LegacyUser {
        LegacyUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            employee_id: self.employee_id.clone(),
            position: self.position.clone(),
            profile_image: self.profile_image.clone(),
        }
    }

    /// Display label, e.g. "Ada Lovelace (HR)"
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{} ({})", self.email, self.role)
        } else {
            format!("{} ({})", self.name, self.role)
        }
    }
}

/// The older `user` storage layout, kept for clients that still read it.
/// Identical to [`UserSnapshot`] except the image is `profileImage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// User object as returned by the backend auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "employeeId", default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(rename = "profileImage", alias = "profilePic", default)]
    pub profile_image: Option<String>,
}

impl ApiUser {
    /// Validate the identity fields and convert into a snapshot.
    pub fn into_snapshot(self) -> Result<UserSnapshot, String> {
        if self.id.trim().is_empty() {
            return Err("user id is empty".to_string());
        }
        if self.email.trim().is_empty() {
            return Err("user email is empty".to_string());
        }
        if self.role.trim().is_empty() {
            return Err("user role is empty".to_string());
        }
        Ok(UserSnapshot {
            id: self.id,
            name: self.name,
            email: self.email,
            role: self.role,
            employee_id: self.employee_id.filter(|s| !s.is_empty()),
            position: self.position.filter(|s| !s.is_empty()),
            profile_image: self.profile_image.filter(|s| !s.is_empty()),
        })
    }
}
