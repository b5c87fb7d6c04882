//! Tape buckets and the file buckets they own.

use std::collections::{BTreeMap, BTreeSet};

use tapestore_error::{Result, TapeError};

/// Read-only mapping between tape buckets and file buckets. Every file bucket
/// belongs to exactly one tape bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketTopology {
    buckets: BTreeMap<String, BTreeSet<String>>,
    owners: BTreeMap<String, String>,
}

impl BucketTopology {
    /// Build and validate a topology from `(bucket, file_buckets)` pairs.
    pub fn new<B, F>(buckets: B) -> Result<Self>
    where
        B: IntoIterator<Item = (String, F)>,
        F: IntoIterator<Item = String>,
    {
        let mut topology = Self::default();
        for (bucket, file_buckets) in buckets {
            validate_name("bucket", &bucket)?;
            if topology.buckets.contains_key(&bucket) {
                return Err(TapeError::config(format!("bucket {bucket} declared twice")));
            }
            let mut owned = BTreeSet::new();
            for file_bucket in file_buckets {
                validate_name("file bucket", &file_bucket)?;
                if let Some(owner) = topology.owners.get(&file_bucket) {
                    return Err(TapeError::config(format!(
                        "file bucket {file_bucket} belongs to both {owner} and {bucket}"
                    )));
                }
                topology
                    .owners
                    .insert(file_bucket.clone(), bucket.clone());
                owned.insert(file_bucket);
            }
            if owned.is_empty() {
                return Err(TapeError::config(format!(
                    "bucket {bucket} declares no file bucket"
                )));
            }
            topology.buckets.insert(bucket, owned);
        }
        Ok(topology)
    }

    pub fn list_buckets(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }

    /// Every file bucket of every tape bucket.
    pub fn list_file_buckets(&self) -> BTreeSet<String> {
        self.owners.keys().cloned().collect()
    }

    pub fn file_buckets_of(&self, bucket: &str) -> Option<&BTreeSet<String>> {
        self.buckets.get(bucket)
    }

    /// Tape bucket owning `file_bucket`.
    pub fn bucket_for_file_bucket(&self, file_bucket: &str) -> Result<&str> {
        self.owners
            .get(file_bucket)
            .map(String::as_str)
            .ok_or_else(|| TapeError::UnknownFileBucket {
                name: file_bucket.to_owned(),
            })
    }
}

/// Bucket names end up in paths: lowercase ascii, digits, `-` and `_` only.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapeError::config(format!("empty {kind} name")));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    {
        return Err(TapeError::config(format!(
            "invalid {kind} name '{name}': expected [a-z0-9_-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> BucketTopology {
        BucketTopology::new([
            (
                "test".to_owned(),
                vec!["test-objects".to_owned(), "test-metadata".to_owned()],
            ),
            ("admin".to_owned(), vec!["admin-objects".to_owned()]),
        ])
        .expect("valid topology")
    }

    #[test]
    fn test_lookup() {
        let topology = topology();
        assert_eq!(topology.list_buckets(), ["admin", "test"]);
        assert_eq!(topology.list_file_buckets().len(), 3);
        assert_eq!(
            topology.bucket_for_file_bucket("test-metadata").expect("known"),
            "test"
        );
        assert_eq!(
            topology.file_buckets_of("admin").map(BTreeSet::len),
            Some(1)
        );
    }

    #[test]
    fn test_unknown_file_bucket_is_configuration_error() {
        let err = topology()
            .bucket_for_file_bucket("nope")
            .expect_err("unknown");
        assert!(matches!(err, TapeError::UnknownFileBucket { .. }));
    }

    #[test]
    fn test_file_bucket_owned_twice_is_rejected() {
        let err = BucketTopology::new([
            ("a".to_owned(), vec!["shared".to_owned()]),
            ("b".to_owned(), vec!["shared".to_owned()]),
        ])
        .expect_err("shared file bucket");
        assert!(matches!(err, TapeError::Config { .. }));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        for name in ["", "Upper", "with space", "../escape"] {
            let result = BucketTopology::new([("bucket".to_owned(), vec![name.to_owned()])]);
            assert!(result.is_err(), "{name:?} must be rejected");
        }
    }
}
