use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::store::StoreError;

pub const MIN_TRUST_SCORE: u8 = 1;
pub const MAX_TRUST_SCORE: u8 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar_seed: String,
    pub bio: String,
    pub is_certified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certification_org: Option<String>,
    pub trust_score: u8,
}

impl User {
    pub fn avatar_url(&self, size: u32) -> String {
        format!(
            "https://picsum.photos/seed/{}/{size}/{size}",
            urlencoding::encode(&self.avatar_seed)
        )
    }
}

/// Everything on a profile except its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEdit {
    pub name: String,
    pub avatar_seed: String,
    pub bio: String,
    pub is_certified: bool,
    pub certification_org: Option<String>,
    pub trust_score: u8,
}

impl ProfileEdit {
    pub fn from_user(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            avatar_seed: user.avatar_seed.clone(),
            bio: user.bio.clone(),
            is_certified: user.is_certified,
            certification_org: user.certification_org.clone(),
            trust_score: user.trust_score,
        }
    }

    pub fn into_user(self, id: UserId) -> Result<User, StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Validation("name must not be empty".to_string()));
        }
        if !(MIN_TRUST_SCORE..=MAX_TRUST_SCORE).contains(&self.trust_score) {
            return Err(StoreError::Validation(format!(
                "trust score must be between {MIN_TRUST_SCORE} and {MAX_TRUST_SCORE}, got {}",
                self.trust_score
            )));
        }

        let certification_org = if self.is_certified {
            self.certification_org
                .map(|org| org.trim().to_string())
                .filter(|org| !org.is_empty())
        } else {
            None
        };

        Ok(User {
            id,
            name: self.name.trim().to_string(),
            avatar_seed: self.avatar_seed,
            bio: self.bio,
            is_certified: self.is_certified,
            certification_org,
            trust_score: self.trust_score,
        })
    }
}

#[derive(Debug)]
pub struct ProfileStore {
    current: User,
}

impl ProfileStore {
    pub fn new(initial: ProfileEdit) -> Result<Self, StoreError> {
        let current = initial.into_user(UserId::new())?;
        debug!(user_id = %current.id, name = %current.name, "profile created");
        Ok(Self { current })
    }

    pub fn get(&self) -> &User {
        &self.current
    }

    #[instrument(skip_all, fields(user_id = %self.current.id))]
    pub fn replace(&mut self, edit: ProfileEdit) -> Result<&User, StoreError> {
        let next = edit.into_user(self.current.id)?;
        self.current = next;
        debug!(name = %self.current.name, trust = self.current.trust_score, "profile replaced");
        Ok(&self.current)
    }
}
