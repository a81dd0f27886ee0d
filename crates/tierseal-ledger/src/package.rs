//! Names in the platform's on-chain package.
//!
//! Targets and type tags are always `<package id>::<module>::<name>`; the
//! package id comes from configuration.

pub const SUBSCRIPTION_MODULE: &str = "subscription";
pub const CREATOR_PROFILE_MODULE: &str = "creator_profile";
pub const CONTENT_MODULE: &str = "content";

/// Subscription credential struct.
pub const SUBSCRIPTION_STRUCT: &str = "Subscription";
pub const CREATOR_PROFILE_STRUCT: &str = "CreatorProfile";
pub const TIER_STRUCT: &str = "Tier";
pub const CONTENT_STRUCT: &str = "Content";

pub const PROFILE_CREATED_EVENT: &str = "ProfileCreated";
pub const CONTENT_PUBLISHED_EVENT: &str = "ContentPublished";

/// `(credential, content, clock)`
pub const CREATE_ACCESS_PROOF: &str = "create_access_proof";

/// `(profile, content)`
pub const CREATE_CREATOR_ACCESS_PROOF: &str = "create_creator_access_proof";

/// `(profile, title, blob_id, key_material, policy_id, is_public, tier, content_type)`
pub const PUBLISH_CONTENT: &str = "publish_content";

/// `<package>::<module>::<name>`
pub fn qualified(package: &str, module: &str, name: &str) -> String {
    format!("{}::{}::{}", package, module, name)
}

pub fn subscription_type(package: &str) -> String {
    qualified(package, SUBSCRIPTION_MODULE, SUBSCRIPTION_STRUCT)
}

pub fn profile_created_event(package: &str) -> String {
    qualified(package, CREATOR_PROFILE_MODULE, PROFILE_CREATED_EVENT)
}
