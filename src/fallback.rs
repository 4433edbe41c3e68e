//! Ordered fallback over payload sources.
//!
//! The fallback policy is data: an ordered slice of sources, each returning
//! a typed optional result, consumed by one combinator that stops at the
//! first hit. A source error is logged and treated as a miss for that tier
//! so a flaky tier never blocks the next one.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::models::SourceTier;

/// One tier that may hold a document's payload.
#[async_trait]
pub trait ByteSource: Send + Sync {
    fn tier(&self) -> SourceTier;

    /// `Ok(None)` is a clean miss; `Err` is a tier failure and the chain
    /// moves on.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Try each source in order, returning the first hit and its tier.
pub async fn first_hit(
    sources: &[&dyn ByteSource],
    key: &str,
) -> Option<(SourceTier, Vec<u8>)> {
    for source in sources {
        match source.fetch(key).await {
            Ok(Some(bytes)) => return Some((source.tier(), bytes)),
            Ok(None) => {}
            Err(e) => {
                warn!(key, tier = source.tier().as_str(), error = %e, "source failed, trying next");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(SourceTier, Option<Vec<u8>>);

    #[async_trait]
    impl ByteSource for Fixed {
        fn tier(&self) -> SourceTier {
            self.0
        }

        async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.1.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl ByteSource for Failing {
        fn tier(&self) -> SourceTier {
            SourceTier::Archive
        }

        async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("tier down")
        }
    }

    #[tokio::test]
    async fn stops_at_first_hit() {
        let a = Fixed(SourceTier::Cache, Some(b"cached".to_vec()));
        let b = Fixed(SourceTier::Archive, Some(b"archived".to_vec()));
        let hit = first_hit(&[&a, &b], "k").await.unwrap();
        assert_eq!(hit.0, SourceTier::Cache);
        assert_eq!(hit.1, b"cached");
    }

    #[tokio::test]
    async fn skips_misses_in_order() {
        let a = Fixed(SourceTier::Cache, None);
        let b = Fixed(SourceTier::Archive, Some(b"archived".to_vec()));
        let hit = first_hit(&[&a, &b], "k").await.unwrap();
        assert_eq!(hit.0, SourceTier::Archive);
    }

    #[tokio::test]
    async fn tier_failure_does_not_block_the_chain() {
        let a = Failing;
        let b = Fixed(SourceTier::Archive, Some(b"archived".to_vec()));
        assert!(first_hit(&[&a, &b], "k").await.is_some());
    }

    #[tokio::test]
    async fn all_misses_is_none() {
        let a = Fixed(SourceTier::Cache, None);
        let b = Fixed(SourceTier::Archive, None);
        assert!(first_hit(&[&a, &b], "k").await.is_none());
    }
}
