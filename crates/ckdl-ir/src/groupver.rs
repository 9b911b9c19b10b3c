//! Group-version descriptions.

use crate::types::Documentation;
use prost::Message;

/// Identity, documentation, and markers for a group-version.
///
/// Separate from the declaration-carrying [`crate::GroupVersion`] so that
/// back ends can list available group-versions without touching types.
#[derive(Clone, PartialEq, Message)]
pub struct GroupVersion {
    #[prost(string, tag = "1")]
    pub group: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(message, optional, tag = "3")]
    pub docs: Option<Documentation>,
    #[prost(message, repeated, tag = "4")]
    pub attributes: Vec<prost_types::Any>,
}
