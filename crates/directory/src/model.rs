//! Domain types: profiles, change-sets, and token rows.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Defines an `i64` newtype with the standard derives, `From` conversions in
/// both directions, and a `Display` that prints the inner value.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Partition-local surrogate id of a profile.
    ///
    /// Unique only within the partition that allocated it; the external id
    /// is the global key.
    ProfileId
);

/// Error returned when parsing an enum from its wire name fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Declares a string-backed enum with SCREAMING_SNAKE_CASE wire names.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])* $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Wire name of the variant.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_owned() }),
                }
            }
        }
    };
}

wire_enum!(
    /// Account role.
    Role, "role" {
        /// Owns the premises.
        Owner => "OWNER",
        /// Lives on the premises.
        Resident => "RESIDENT",
        /// Guest-class access.
        #[default]
        Guest => "GUEST",
    }
);

wire_enum!(
    /// Account lifecycle state.
    ///
    /// ```text
    /// NEW ──confirm──► CONFIRMED
    ///  │                  │
    ///  └──────┬───────────┘
    ///         ▼
    ///      BLOCKED        (privileged update)
    ///
    /// any ──delete──► DELETED   (soft delete, terminal)
    /// ```
    ProfileState, "profile state" {
        /// Created, registration not yet confirmed.
        #[default]
        New => "NEW",
        /// Registration confirmed; the only state that may log in.
        Confirmed => "CONFIRMED",
        /// Administratively blocked.
        Blocked => "BLOCKED",
        /// Soft-deleted.
        Deleted => "DELETED",
    }
);

/// A stored identity record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Partition-local surrogate id.
    pub id: ProfileId,
    /// Globally unique identity key; decides the owning partition.
    pub external_id: String,
    /// Login name.
    pub login: String,
    /// Email, unique among non-deleted profiles.
    pub email: String,
    /// Opaque password hash produced by the hashing collaborator.
    pub password_hash: Zeroizing<String>,
    /// Account role.
    pub role: Role,
    /// Lifecycle state.
    pub state: ProfileState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Returns `true` once the profile has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == ProfileState::Deleted
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("external_id", &self.external_id)
            .field("login", &self.login)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Input for profile creation.
///
/// ```
/// use identity_directory::{NewProfile, ProfileState, Role};
///
/// let profile = NewProfile::builder()
///     .external_id("3f2c9a7e-0000-4000-8000-000000000001")
///     .login("alice")
///     .email("alice@example.com")
///     .password_hash("$argon2id$...")
///     .role(Role::Resident)
///     .build();
/// assert_eq!(profile.state, ProfileState::New);
/// ```
#[derive(Clone, bon::Builder)]
pub struct NewProfile {
    /// Globally unique identity key.
    #[builder(into)]
    pub external_id: String,
    /// Login name.
    #[builder(into)]
    pub login: String,
    /// Email address.
    #[builder(into)]
    pub email: String,
    /// Opaque password hash.
    #[builder(with = |hash: impl Into<String>| Zeroizing::new(hash.into()))]
    pub password_hash: Zeroizing<String>,
    /// Account role.
    #[builder(default)]
    pub role: Role,
    /// Initial state.
    #[builder(default)]
    pub state: ProfileState,
}

impl fmt::Debug for NewProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewProfile")
            .field("external_id", &self.external_id)
            .field("login", &self.login)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Partial profile update: only the fields that are set are applied.
///
/// An empty change-set is valid and only refreshes `updated_at`.
///
/// ```
/// use identity_directory::{ProfileChanges, ProfileState};
///
/// let confirm = ProfileChanges::builder().state(ProfileState::Confirmed).build();
/// assert!(confirm.login.is_none());
/// assert!(!confirm.is_empty());
/// ```
#[derive(Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct ProfileChanges {
    /// New login name.
    #[builder(into)]
    pub login: Option<String>,
    /// New email address.
    #[builder(into)]
    pub email: Option<String>,
    /// New password hash.
    #[builder(with = |hash: impl Into<String>| Zeroizing::new(hash.into()))]
    pub password_hash: Option<Zeroizing<String>>,
    /// New role.
    pub role: Option<Role>,
    /// New state.
    pub state: Option<ProfileState>,
}

impl ProfileChanges {
    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.login.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.state.is_none()
    }

    /// Merges the set fields into `profile` and stamps `updated_at`.
    pub fn apply_to(&self, profile: &mut Profile, now: DateTime<Utc>) {
        if let Some(login) = &self.login {
            profile.login.clone_from(login);
        }
        if let Some(email) = &self.email {
            profile.email.clone_from(email);
        }
        if let Some(hash) = &self.password_hash {
            profile.password_hash = hash.clone();
        }
        if let Some(role) = self.role {
            profile.role = role;
        }
        if let Some(state) = self.state {
            profile.state = state;
        }
        profile.updated_at = now;
    }
}

impl fmt::Debug for ProfileChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileChanges")
            .field("login", &self.login)
            .field("email", &self.email)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "[REDACTED]"))
            .field("role", &self.role)
            .field("state", &self.state)
            .finish()
    }
}

/// Workflow a token belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenPurpose {
    /// Registration confirmation link.
    Registration,
    /// Password restoration link.
    RestorePassword,
}

impl TokenPurpose {
    /// Key segment for this purpose.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::RestorePassword => "restore-password",
        }
    }

    /// Whether a profile in `state` may complete this purpose's workflow.
    /// Registration only confirms `NEW` accounts; a restore link is refused
    /// once the account is blocked.
    #[must_use]
    pub fn accepts(self, state: ProfileState) -> bool {
        match self {
            Self::Registration => state == ProfileState::New,
            Self::RestorePassword => {
                matches!(state, ProfileState::New | ProfileState::Confirmed)
            },
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored registration or restore-password token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Owning profile, in the same partition.
    pub profile_id: ProfileId,
    /// Workflow the token drives.
    pub purpose: TokenPurpose,
    /// Opaque token value.
    pub token: String,
    /// Instant after which the token is expired.
    pub expire_at: DateTime<Utc>,
    /// Creation time of the row.
    pub created_at: DateTime<Utc>,
    /// Last refresh time of the row.
    pub updated_at: DateTime<Utc>,
    /// When the token completed its workflow, if it has.
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Returns `true` if `expire_at` is not after `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Classifies the token at `now`. Consumption wins over expiry.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.consumed_at.is_some() {
            TokenStatus::Consumed
        } else if self.is_expired(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("profile_id", &self.profile_id)
            .field("purpose", &self.purpose)
            .field("token", &"[REDACTED]")
            .field("expire_at", &self.expire_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("consumed_at", &self.consumed_at)
            .finish()
    }
}

/// Verification outcome for a token that exists.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// Usable.
    Active,
    /// Past `expire_at`; the workflow must be restarted.
    Expired,
    /// Already completed its workflow.
    Consumed,
}

/// A token row together with its owning profile and status at verification
/// time.
#[derive(Clone, Debug)]
pub struct VerifiedToken {
    /// The stored row.
    pub record: TokenRecord,
    /// The owning profile.
    pub profile: Profile,
    /// Status at verification time.
    pub status: TokenStatus,
}

impl VerifiedToken {
    /// Returns `true` only for [`TokenStatus::Active`].
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status == TokenStatus::Active
    }
}
