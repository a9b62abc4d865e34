use std::{fmt, str::FromStr};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::UnknownBloodGroup;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(DonationId);

impl UserId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl DonationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::APositive,
        BloodGroup::ANegative,
        BloodGroup::BPositive,
        BloodGroup::BNegative,
        BloodGroup::AbPositive,
        BloodGroup::AbNegative,
        BloodGroup::OPositive,
        BloodGroup::ONegative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BloodGroup::APositive => "A+",
            BloodGroup::ANegative => "A-",
            BloodGroup::BPositive => "B+",
            BloodGroup::BNegative => "B-",
            BloodGroup::AbPositive => "AB+",
            BloodGroup::AbNegative => "AB-",
            BloodGroup::OPositive => "O+",
            BloodGroup::ONegative => "O-",
        }
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodGroup {
    type Err = UnknownBloodGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        BloodGroup::ALL
            .into_iter()
            .find(|group| group.as_str() == normalized)
            .ok_or_else(|| UnknownBloodGroup(s.to_string()))
    }
}

/// A registered user and donor profile, stored at `users/<uid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub blood_group: BloodGroup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default)]
    pub is_donor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_donation_date: Option<Millis>,
    #[serde(default)]
    pub total_donations: u32,
    pub created_at: Millis,
    pub updated_at: Millis,
}

impl User {
    pub fn new(
        uid: UserId,
        full_name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
        blood_group: BloodGroup,
    ) -> Self {
        let now = now_millis();
        Self {
            uid,
            full_name: full_name.into(),
            email: email.into(),
            phone: phone.into(),
            blood_group,
            location: None,
            date_of_birth: None,
            age: None,
            is_donor: false,
            profile_image_url: None,
            last_donation_date: None,
            total_donations: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_donor(mut self, is_donor: bool) -> Self {
        self.is_donor = is_donor;
        self
    }
}

/// Field-level profile edit. Only fields set to `Some` are written; everything
/// else keeps its stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_donor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_donation_date: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_donations: Option<u32>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self == &UserPatch::default()
    }

    /// Document fields touched by this patch, keyed by their stored names.
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

/// A single donation event, stored at `donations/<id>`.
///
/// `blood_group` is copied from the donor when the record is created and is not
/// updated if the donor's profile changes later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: DonationId,
    pub user_id: UserId,
    pub date: Millis,
    pub location: String,
    pub blood_group: BloodGroup,
}

impl Donation {
    pub fn for_user(user: &User, location: impl Into<String>, date: Millis) -> Self {
        Self {
            id: DonationId::generate(),
            user_id: user.uid.clone(),
            date,
            location: location.into(),
            blood_group: user.blood_group,
        }
    }
}
