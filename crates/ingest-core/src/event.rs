// Copyright 2024 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Canonical event model (spec.md §3, §4.1).

use serde::{Deserialize, Serialize};

/// Well-known container name for bucket-lifecycle events (spec.md §3).
pub const USERS_BUCKET: &str = "users..bucket";
/// Well-known container name for bucket-metadata events (spec.md §3).
pub const METASTORE: &str = "metastore";
/// Separator between an object key and its version id in composite keys.
pub const VID_SEP: &str = "\u{0}";
/// Separator used inside `users..bucket` keys: `<ownerId>..|..<prefix>-<bucket>`.
pub const USERS_BUCKET_KEY_SEP: &str = "..|..";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Put,
    Del,
}

impl Default for EventType {
    /// `type` defaults to `put` if unspecified upstream (spec.md §3).
    fn default() -> Self {
        EventType::Put
    }
}

/// A `{type, bucket, key, value}` record emitted on the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub bucket: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl CanonicalEvent {
    /// Object put event: `(metadata, targetBucket) -> {put, target, key, value}`.
    /// `value` is `None` when the upstream entry carried a key but no value.
    pub fn object_put(target_bucket: &str, object_key: &str, value: Option<String>) -> Self {
        Self {
            event_type: EventType::Put,
            bucket: target_bucket.to_string(),
            key: object_key.to_string(),
            value,
        }
    }

    /// Versioned object put event: key becomes `<key><VID_SEP><versionId>`.
    pub fn object_put_versioned(
        target_bucket: &str,
        object_key: &str,
        version_id: &str,
        value: Option<String>,
    ) -> Self {
        Self {
            event_type: EventType::Put,
            bucket: target_bucket.to_string(),
            key: format!("{object_key}{VID_SEP}{version_id}"),
            value,
        }
    }

    pub fn object_delete(target_bucket: &str, object_key: &str) -> Self {
        Self {
            event_type: EventType::Del,
            bucket: target_bucket.to_string(),
            key: object_key.to_string(),
            value: None,
        }
    }

    /// Bucket-listing put event for the users-bucket container. `target_bucket`
    /// is the already-resolved name of the bucket the listing describes.
    pub fn bucket_listing_put(owner_id: &str, target_bucket: &str, creation_date: Option<String>) -> Self {
        Self {
            event_type: EventType::Put,
            bucket: USERS_BUCKET.to_string(),
            key: format!("{owner_id}{USERS_BUCKET_KEY_SEP}{target_bucket}"),
            value: creation_date,
        }
    }

    /// Bucket-metadata put event. `target_bucket` doubles as both the
    /// metastore container and the key, one metadata blob per bucket.
    pub fn bucket_metadata_put(target_bucket: &str, value: Option<String>) -> Self {
        Self {
            event_type: EventType::Put,
            bucket: target_bucket.to_string(),
            key: target_bucket.to_string(),
            value,
        }
    }

    /// Invariant check: non-empty bucket, type is one of the two values
    /// (enforced by the type system already, kept here for the property
    /// tests described in spec.md §8).
    pub fn is_well_formed(&self) -> bool {
        !self.bucket.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_put_has_non_empty_bucket_and_put_type() {
        let e = CanonicalEvent::object_put("zenkobucket-bucket1", "object1", Some("{}".into()));
        assert!(e.is_well_formed());
        assert_eq!(e.event_type, EventType::Put);
        assert_eq!(e.key, "object1");
    }

    #[test]
    fn object_put_preserves_absent_value() {
        let e = CanonicalEvent::object_put("zenkobucket-bucket1", "object1", None);
        assert_eq!(e.value, None);
    }

    #[test]
    fn versioned_key_embeds_separator() {
        let e = CanonicalEvent::object_put_versioned("t", "k", "v1", Some("{}".into()));
        assert_eq!(e.key, format!("k{VID_SEP}v1"));
    }

    #[test]
    fn bucket_listing_put_targets_users_bucket() {
        let e = CanonicalEvent::bucket_listing_put("owner1", "zenkobucket-bucket1", Some("2020-01-01".into()));
        assert_eq!(e.bucket, USERS_BUCKET);
        assert_eq!(e.key, "owner1..|..zenkobucket-bucket1");
    }

    #[test]
    fn bucket_metadata_put_uses_target_as_both_bucket_and_key() {
        let e = CanonicalEvent::bucket_metadata_put("zenkobucket-bucket1", Some("{}".into()));
        assert_eq!(e.bucket, "zenkobucket-bucket1");
        assert_eq!(e.key, "zenkobucket-bucket1");
    }

    #[test]
    fn delete_event_has_no_value() {
        let e = CanonicalEvent::object_delete("t", "k");
        assert_eq!(e.event_type, EventType::Del);
        assert!(e.value.is_none());
    }
}
