use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Configured direction for breakpoint reconciliation.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SyncDirectionSetting {
    /// Make the remote VM mirror the local breakpoint set.
    ResetRemote,
    /// Make the local breakpoint set mirror the remote VM.
    ResetLocal,
    /// Link matching breakpoints and create missing counterparts on both
    /// sides without deleting anything.
    #[default]
    Merge,
}

/// Errors encountered while parsing a [`SyncDirectionSetting`] from text.
pub type SyncDirectionParseError = strum::ParseError;
