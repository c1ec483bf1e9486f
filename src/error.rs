//! Unified error handling for blockip.
//!
//! Every failure a caller can observe is one [`ServiceError`] variant with
//! its own payload. Variants group into an [`ErrorKind`], which decides how
//! the failure is logged and how the HTTP layer renders it.

use crate::auth::RoleSourceError;
use crate::net::{AddressError, NetworkPrefix};
use crate::rules::duration::DurationError;
use crate::rules::model::RuleRecord;
use crate::store::StoreError;
use thiserror::Error;

/// Broad error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is invalid.
    Request,
    /// The mutation would break the active-rule invariants.
    Integrity,
    /// Well-formed request with nothing to act on.
    NothingToDo,
    Authorization,
    /// Store or directory trouble.
    Environment,
    Unexpected,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    // ------------------------------------------------------------------
    // Request errors
    // ------------------------------------------------------------------
    #[error("The parameter \"{address}\" is not a valid IP address.")]
    MalformedAddress { address: String },

    #[error("The IP address \"{address}\" has host bits set.")]
    HostBitsSet { address: String },

    #[error("The value given for 'for' ('{interval}') is invalid.")]
    MalformedInterval { interval: String },

    #[error("The value given for 'until' ('{timestamp}') is invalid.")]
    MalformedTimestamp { timestamp: String },

    #[error("The time period the blacklist entry is to be active for is already over.")]
    EmptyDuration,

    #[error(
        "The request specifies the duration using both \"for\" (\"{for_value}\") and \"until\" (\"{until_value}\")."
    )]
    MultipleDurations {
        for_value: String,
        until_value: String,
    },

    #[error("The request does not contain a comment that explains the purpose of the operation.")]
    MissingComment,

    // ------------------------------------------------------------------
    // Integrity errors
    // ------------------------------------------------------------------
    #[error("The address {address} cannot be blacklisted because it's already whitelisted.")]
    AddressCannotBeBlacklisted {
        address: NetworkPrefix,
        conflicting_whitelist_entries: Vec<RuleRecord>,
    },

    #[error("The address {address} cannot be whitelisted because it's already blacklisted.")]
    AddressCannotBeWhitelisted {
        address: NetworkPrefix,
        conflicting_blacklist_entries: Vec<RuleRecord>,
    },

    #[error(
        "The address {address} is already blacklisted for a period that exceeds the requested period."
    )]
    AddressAlreadyBlacklisted {
        address: NetworkPrefix,
        existing_blacklist_entries: Vec<RuleRecord>,
    },

    #[error("The address {address} is already whitelisted.")]
    AddressAlreadyWhitelisted {
        address: NetworkPrefix,
        existing_whitelist_entries: Vec<RuleRecord>,
    },

    // ------------------------------------------------------------------
    // Nothing to do
    // ------------------------------------------------------------------
    #[error("The address {address} isn't actually blacklisted.")]
    AddressNotBlacklisted { address: NetworkPrefix },

    #[error("The address {address} isn't actually whitelisted.")]
    AddressNotWhitelisted { address: NetworkPrefix },

    // ------------------------------------------------------------------
    // Authorization errors
    // ------------------------------------------------------------------
    #[error("You need to be logged in to use this service.")]
    NotLoggedIn,

    #[error("The user name and password you provided were not valid.")]
    BadCredentials,

    #[error("You do not have the role {role}, which is required to access this resource.")]
    InsufficientRights { user_name: String, role: String },

    // ------------------------------------------------------------------
    // Environment errors
    // ------------------------------------------------------------------
    #[error("There was an issue connecting to the database. Please contact the Database team.")]
    CannotTalkToDatabase { original_message: String },

    #[error("There was an issue connecting to the directory. Please contact the System team.")]
    CannotTalkToDirectory { original_message: String },

    #[error("There was an unexpected error.")]
    Unexpected { original_message: String },
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedAddress { .. }
            | Self::HostBitsSet { .. }
            | Self::MalformedInterval { .. }
            | Self::MalformedTimestamp { .. }
            | Self::EmptyDuration
            | Self::MultipleDurations { .. }
            | Self::MissingComment => ErrorKind::Request,

            Self::AddressCannotBeBlacklisted { .. }
            | Self::AddressCannotBeWhitelisted { .. }
            | Self::AddressAlreadyBlacklisted { .. }
            | Self::AddressAlreadyWhitelisted { .. } => ErrorKind::Integrity,

            Self::AddressNotBlacklisted { .. } | Self::AddressNotWhitelisted { .. } => {
                ErrorKind::NothingToDo
            }

            Self::NotLoggedIn | Self::BadCredentials | Self::InsufficientRights { .. } => {
                ErrorKind::Authorization
            }

            Self::CannotTalkToDatabase { .. } | Self::CannotTalkToDirectory { .. } => {
                ErrorKind::Environment
            }

            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedAddress { .. } => "malformed_address",
            Self::HostBitsSet { .. } => "host_bits_set",
            Self::MalformedInterval { .. } => "malformed_interval",
            Self::MalformedTimestamp { .. } => "malformed_timestamp",
            Self::EmptyDuration => "empty_duration",
            Self::MultipleDurations { .. } => "multiple_durations",
            Self::MissingComment => "missing_comment",
            Self::AddressCannotBeBlacklisted { .. } => "address_cannot_be_blacklisted",
            Self::AddressCannotBeWhitelisted { .. } => "address_cannot_be_whitelisted",
            Self::AddressAlreadyBlacklisted { .. } => "address_already_blacklisted",
            Self::AddressAlreadyWhitelisted { .. } => "address_already_whitelisted",
            Self::AddressNotBlacklisted { .. } => "address_not_blacklisted",
            Self::AddressNotWhitelisted { .. } => "address_not_whitelisted",
            Self::NotLoggedIn => "not_logged_in",
            Self::BadCredentials => "bad_credentials",
            Self::InsufficientRights { .. } => "insufficient_rights",
            Self::CannotTalkToDatabase { .. } => "cannot_talk_to_database",
            Self::CannotTalkToDirectory { .. } => "cannot_talk_to_directory",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyDuration => ServiceError::EmptyDuration,
            StoreError::Sqlx(_) | StoreError::Migration(_) => ServiceError::CannotTalkToDatabase {
                original_message: err.to_string(),
            },
            StoreError::ExpiringWhitelist
            | StoreError::CorruptRow { .. }
            | StoreError::TransactionFinished
            | StoreError::ReadOnly(_) => ServiceError::Unexpected {
                original_message: err.to_string(),
            },
        }
    }
}

impl From<DurationError> for ServiceError {
    fn from(err: DurationError) -> Self {
        match err {
            DurationError::MalformedInterval(interval) => ServiceError::MalformedInterval { interval },
            DurationError::MalformedTimestamp(timestamp) => {
                ServiceError::MalformedTimestamp { timestamp }
            }
            DurationError::MultipleDurations {
                for_value,
                until_value,
            } => ServiceError::MultipleDurations {
                for_value,
                until_value,
            },
        }
    }
}

impl From<AddressError> for ServiceError {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::Malformed(address) => ServiceError::MalformedAddress { address },
            AddressError::HostBitsSet(address) => ServiceError::HostBitsSet { address },
        }
    }
}

impl From<RoleSourceError> for ServiceError {
    fn from(err: RoleSourceError) -> Self {
        match err {
            RoleSourceError::BadCredentials => ServiceError::BadCredentials,
            RoleSourceError::Unavailable(original_message) => {
                ServiceError::CannotTalkToDirectory { original_message }
            }
        }
    }
}
