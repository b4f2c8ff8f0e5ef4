use crate::error::Error;
use crate::Result;

pub const DEFAULT_TTL_SECONDS: i64 = 3600;
pub const MIN_TTL_SECONDS: i64 = 30;
pub const MAX_TTL_SECONDS: i64 = 86_400;

/// Region and TTL rules every create/update path goes through.
#[derive(Debug, Clone)]
pub struct ComputePolicy {
    pub allowed_regions: Vec<String>,
    pub default_ttl_seconds: i64,
    pub min_ttl_seconds: i64,
    pub max_ttl_seconds: i64,
}

impl Default for ComputePolicy {
    fn default() -> Self {
        Self {
            allowed_regions: vec!["us-east".into(), "us-west".into(), "eu-west".into()],
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            min_ttl_seconds: MIN_TTL_SECONDS,
            max_ttl_seconds: MAX_TTL_SECONDS,
        }
    }
}

impl ComputePolicy {
    /// No region means no placement constraint.
    pub fn validate_region(&self, region: Option<&str>) -> Result<Option<String>> {
        match region {
            None => Ok(None),
            Some(region) if self.allowed_regions.iter().any(|allowed| allowed == region) => {
                Ok(Some(region.to_string()))
            }
            Some(region) => Err(Error::bad_request(format!(
                "Region '{}' is not allowed. Allowed regions: {}",
                region,
                self.allowed_regions.join(", ")
            ))),
        }
    }

    /// `None` (omitted) yields the default, `Some(None)` runs indefinitely.
    pub fn validate_ttl_seconds(&self, ttl_seconds: Option<Option<i64>>) -> Result<Option<i64>> {
        match ttl_seconds {
            None => Ok(Some(self.default_ttl_seconds)),
            Some(None) => Ok(None),
            Some(Some(ttl)) if ttl < self.min_ttl_seconds => Err(Error::bad_request(format!(
                "ttl_seconds must be at least {} seconds",
                self.min_ttl_seconds
            ))),
            Some(Some(ttl)) if ttl > self.max_ttl_seconds => Err(Error::bad_request(format!(
                "ttl_seconds must be at most {} seconds; set it to null to run indefinitely",
                self.max_ttl_seconds
            ))),
            Some(Some(ttl)) => Ok(Some(ttl)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_rules() {
        let policy = ComputePolicy::default();
        assert_eq!(policy.validate_region(None).unwrap(), None);
        assert_eq!(
            policy.validate_region(Some("us-east")).unwrap().as_deref(),
            Some("us-east")
        );

        let err = policy.validate_region(Some("mars-1")).unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref message) if message.contains("mars-1")));
    }

    #[test]
    fn ttl_rules() {
        let policy = ComputePolicy::default();
        assert_eq!(policy.validate_ttl_seconds(None).unwrap(), Some(3600));
        assert_eq!(policy.validate_ttl_seconds(Some(None)).unwrap(), None);
        for ttl in [30, 40, 86_400] {
            assert_eq!(policy.validate_ttl_seconds(Some(Some(ttl))).unwrap(), Some(ttl));
        }
        for ttl in [-1, 0, 10, 29, 86_401] {
            assert!(matches!(
                policy.validate_ttl_seconds(Some(Some(ttl))),
                Err(Error::BadRequest(_))
            ));
        }
    }

    #[test]
    fn upper_bound_message_mentions_null() {
        let err = ComputePolicy::default()
            .validate_ttl_seconds(Some(Some(100_000)))
            .unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn bounds_come_from_configuration() {
        let policy = ComputePolicy {
            allowed_regions: vec!["local".into()],
            default_ttl_seconds: 120,
            min_ttl_seconds: 60,
            max_ttl_seconds: 600,
        };
        assert_eq!(policy.validate_ttl_seconds(None).unwrap(), Some(120));
        assert!(policy.validate_ttl_seconds(Some(Some(30))).is_err());
        assert!(policy.validate_region(Some("us-east")).is_err());
    }
}
