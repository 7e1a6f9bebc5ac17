//! Shard index resolution
//!
//! An explicit shard index always wins. Without one, the index is inferred
//! from the runtime environment; a replica that cannot work out its shard
//! must not start.

use kestrel::{Error, Result};
use tracing::{debug, info, warn};

/// Source of a shard index when none is configured
pub trait ShardInference: Send + Sync {
    fn infer(&self) -> Result<u32>;

    fn name(&self) -> &'static str;
}

/// Reads the ordinal suffix of the pod hostname (`kestrel-controller-2` -> 2)
#[derive(Debug, Default, Clone, Copy)]
pub struct HostnameInference;

impl ShardInference for HostnameInference {
    fn infer(&self) -> Result<u32> {
        let hostname = hostname::get()
            .map_err(|e| Error::ShardInference(format!("Failed to read hostname: {}", e)))?
            .into_string()
            .map_err(|raw| {
                Error::ShardInference(format!("Hostname {:?} is not valid UTF-8", raw))
            })?;
        debug!("Inferring shard from hostname {}", hostname);
        parse_ordinal(&hostname)
    }

    fn name(&self) -> &'static str {
        "hostname"
    }
}

/// Always yields the same shard
#[derive(Debug, Clone, Copy)]
pub struct FixedInference(pub u32);

impl ShardInference for FixedInference {
    fn infer(&self) -> Result<u32> {
        Ok(self.0)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Parse the StatefulSet ordinal after the last `-` of a hostname
pub fn parse_ordinal(hostname: &str) -> Result<u32> {
    // Pod hostnames may come fully qualified
    let short = hostname.split('.').next().unwrap_or(hostname);
    let (_, suffix) = short.rsplit_once('-').ok_or_else(|| {
        Error::ShardInference(format!(
            "Hostname '{}' has no ordinal suffix; set the shard explicitly",
            hostname
        ))
    })?;

    suffix.parse::<u32>().map_err(|_| {
        Error::ShardInference(format!(
            "Hostname '{}' ends in '{}', which is not a shard ordinal",
            hostname, suffix
        ))
    })
}

/// Resolve this replica's shard index
///
/// `configured_shard >= 0` is returned unchanged. A negative value means
/// unset and triggers inference; the inferred ordinal is reduced modulo
/// `replicas`.
pub fn resolve_shard(
    replicas: u32,
    configured_shard: i32,
    source: &dyn ShardInference,
) -> Result<u32> {
    if configured_shard >= 0 {
        debug!("Using configured shard {}", configured_shard);
        return Ok(configured_shard as u32);
    }
    if replicas <= 1 {
        return Ok(0);
    }

    let inferred = source.infer()?;
    let shard = inferred % replicas;
    if shard != inferred {
        warn!(
            "Inferred ordinal {} exceeds replica count {}, using shard {}",
            inferred, replicas, shard
        );
    }
    info!("Inferred shard {} using {} source", shard, source.name());
    Ok(shard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInference {
        value: u32,
        calls: AtomicUsize,
    }

    impl ShardInference for CountingInference {
        fn infer(&self) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct FailingInference;

    impl ShardInference for FailingInference {
        fn infer(&self) -> Result<u32> {
            Err(Error::ShardInference("no ordinal".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_parse_ordinal() {
        assert_eq!(parse_ordinal("kestrel-controller-0").unwrap(), 0);
        assert_eq!(parse_ordinal("kestrel-controller-12").unwrap(), 12);
        assert_eq!(
            parse_ordinal("kestrel-controller-3.kestrel.svc.cluster.local").unwrap(),
            3
        );
    }

    #[test]
    fn test_parse_ordinal_failures() {
        assert!(matches!(parse_ordinal("controller"), Err(Error::ShardInference(_))));
        assert!(matches!(
            parse_ordinal("kestrel-controller-7d9f8b6c4-x2x9z"),
            Err(Error::ShardInference(_))
        ));
        assert!(matches!(parse_ordinal("controller-"), Err(Error::ShardInference(_))));
    }

    #[test]
    fn test_explicit_shard_unchanged() {
        let source = CountingInference {
            value: 9,
            calls: AtomicUsize::new(0),
        };
        for replicas in [2, 3, 5, 10] {
            for shard in 0..replicas as i32 {
                assert_eq!(resolve_shard(replicas, shard, &source).unwrap(), shard as u32);
            }
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_inferred_shard_deterministic() {
        let source = FixedInference(1);
        let first = resolve_shard(3, -1, &source).unwrap();
        let second = resolve_shard(3, -1, &source).unwrap();
        assert_eq!(first, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_inferred_ordinal_wraps() {
        assert_eq!(resolve_shard(3, -1, &FixedInference(4)).unwrap(), 1);
    }

    #[test]
    fn test_inference_failure_is_fatal() {
        let err = resolve_shard(2, -1, &FailingInference).unwrap_err();
        assert_eq!(err.category(), kestrel::ErrorCategory::FatalInference);
    }

    #[test]
    fn test_single_replica_skips_inference() {
        assert_eq!(resolve_shard(1, -1, &FailingInference).unwrap(), 0);
        assert_eq!(resolve_shard(0, -1, &FailingInference).unwrap(), 0);
    }
}
