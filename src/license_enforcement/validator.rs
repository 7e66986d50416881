use serde::{Deserialize, Serialize};

use super::{
    Plan,
    license::{LicenseLookup, is_well_formed_key},
};

/// Policy breach recorded in the tracking log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ViolationReason {
    InvalidLicenseFormat,
    UnauthorizedDomain,
    InvalidLicenseKeyFormat,
    UnauthorizedPremiumAccess,
    WatermarkRemoval,
    ProtectionScriptsRemoved,
    DevtoolsAccessed,
}

impl ViolationReason {
    pub(crate) fn code(self) -> &'static str {
        match self {
            ViolationReason::InvalidLicenseFormat => "invalid_license_format",
            ViolationReason::UnauthorizedDomain => "unauthorized_domain",
            ViolationReason::InvalidLicenseKeyFormat => "invalid_license_key_format",
            ViolationReason::UnauthorizedPremiumAccess => "unauthorized_premium_access",
            ViolationReason::WatermarkRemoval => "watermark_removal",
            ViolationReason::ProtectionScriptsRemoved => "protection_scripts_removed",
            ViolationReason::DevtoolsAccessed => "devtools_accessed",
        }
    }

    pub(crate) fn message(self) -> &'static str {
        match self {
            ViolationReason::InvalidLicenseFormat => "Invalid license format",
            ViolationReason::UnauthorizedDomain => "Unauthorized domain usage",
            ViolationReason::InvalidLicenseKeyFormat => "Invalid license key format",
            ViolationReason::UnauthorizedPremiumAccess => "Unauthorized premium feature access",
            ViolationReason::WatermarkRemoval => "Watermark removal detected",
            ViolationReason::ProtectionScriptsRemoved => "Protection scripts removed",
            ViolationReason::DevtoolsAccessed => "Developer tools accessed",
        }
    }
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Result of validating the stored license against the current origin.
///
/// `plan` is the record's plan when authorized and [`Plan::Free`] otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Validation {
    pub(crate) authorized: bool,
    pub(crate) plan: Plan,
    pub(crate) license_key: Option<String>,
    pub(crate) reason: Option<ViolationReason>,
}

impl Validation {
    fn unauthorized(license_key: Option<String>, reason: Option<ViolationReason>) -> Self {
        Self {
            authorized: false,
            plan: Plan::Free,
            license_key,
            reason,
        }
    }
}

/// Decides whether `lookup` authorizes `origin`. Checks run in order and stop
/// at the first failure: presence, parse, domain, key format.
pub(crate) fn validate(lookup: &LicenseLookup, origin: &str) -> Validation {
    let record = match lookup {
        LicenseLookup::Absent => return Validation::unauthorized(None, None),
        LicenseLookup::Malformed(_) => {
            return Validation::unauthorized(None, Some(ViolationReason::InvalidLicenseFormat));
        }
        LicenseLookup::Present(record) => record,
    };

    let license_key = record.key.clone();

    if record.domains.is_empty() || !record.covers(origin) {
        return Validation::unauthorized(license_key, Some(ViolationReason::UnauthorizedDomain));
    }

    if !record.key.as_deref().is_some_and(is_well_formed_key) {
        return Validation::unauthorized(
            license_key,
            Some(ViolationReason::InvalidLicenseKeyFormat),
        );
    }

    Validation {
        authorized: true,
        plan: record.plan,
        license_key,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        license_enforcement::license::{LicenseRecord, LicenseStore},
        store::{KeyValueStore as _, LICENSE_KEY, MemoryStore},
    };

    fn record(key: &str, domains: &[&str], plan: Plan) -> LicenseLookup {
        LicenseLookup::Present(LicenseRecord::new(
            key.to_owned(),
            domains.iter().map(|d| (*d).to_owned()).collect(),
            plan,
        ))
    }

    #[test]
    fn authorized_record_keeps_its_plan() {
        let validation = validate(
            &record("CO-AB12-CD34-EF56-GH78", &["example.com"], Plan::Pro),
            "example.com",
        );

        assert!(validation.authorized);
        assert_eq!(validation.plan, Plan::Pro);
        assert_eq!(validation.reason, None);
    }

    #[test]
    fn absent_record_is_unauthorized_without_violation() {
        let validation = validate(&LicenseLookup::Absent, "example.com");

        assert!(!validation.authorized);
        assert_eq!(validation.reason, None);
        assert_eq!(validation.license_key, None);
    }

    #[test]
    fn malformed_record_reports_invalid_format() {
        let validation = validate(&LicenseLookup::Malformed("eof".to_owned()), "example.com");

        assert_eq!(validation.reason, Some(ViolationReason::InvalidLicenseFormat));
    }

    #[test]
    fn foreign_origin_is_unauthorized_domain_regardless_of_key() {
        for key in ["CO-AB12-CD34-EF56-GH78", "garbage"] {
            for domains in [&["example.com"][..], &[][..]] {
                let validation = validate(&record(key, domains, Plan::Agency), "other.com");

                assert!(!validation.authorized);
                assert_eq!(validation.plan, Plan::Free);
                assert_eq!(validation.reason, Some(ViolationReason::UnauthorizedDomain));
            }
        }
    }

    #[test]
    fn bad_key_on_authorized_domain_is_invalid_key_format() {
        for key in ["CO-ab12-CD34-EF56-GH78", "CO-AB12-CD34-EF56", "LICENSE"] {
            let validation = validate(&record(key, &["example.com"], Plan::Pro), "example.com");

            assert!(!validation.authorized);
            assert_eq!(validation.plan, Plan::Free);
            assert_eq!(validation.reason, Some(ViolationReason::InvalidLicenseKeyFormat));
        }
    }

    fn stored(raw: &str, origin: &str) -> Validation {
        let store = Arc::new(MemoryStore::new());
        store.set(LICENSE_KEY, raw).unwrap();
        validate(&LicenseStore::new(store).read(), origin)
    }

    #[test]
    fn missing_or_mistyped_key_is_invalid_key_format() {
        for raw in [
            r#"{"domains":["example.com"],"plan":"pro"}"#,
            r#"{"key":null,"domains":["example.com"],"plan":"pro"}"#,
            r#"{"key":1234,"domains":["example.com"],"plan":"pro"}"#,
        ] {
            let validation = stored(raw, "example.com");

            assert!(!validation.authorized, "{raw}");
            assert_eq!(validation.license_key, None);
            assert_eq!(
                validation.reason,
                Some(ViolationReason::InvalidLicenseKeyFormat),
                "{raw}"
            );
        }
    }

    #[test]
    fn domain_check_runs_before_key_check_for_stored_records() {
        for raw in [
            r#"{"key":null,"domains":["other.com"],"plan":"pro"}"#,
            r#"{"key":"CO-AB12-CD34-EF56-GH78","domains":null,"plan":"pro"}"#,
            r#"{"key":1234}"#,
        ] {
            assert_eq!(
                stored(raw, "example.com").reason,
                Some(ViolationReason::UnauthorizedDomain),
                "{raw}"
            );
        }
    }

    #[test]
    fn null_plan_authorizes_as_free() {
        let validation = stored(
            r#"{"key":"CO-AB12-CD34-EF56-GH78","domains":["example.com"],"plan":null}"#,
            "example.com",
        );

        assert!(validation.authorized);
        assert_eq!(validation.plan, Plan::Free);
        assert_eq!(validation.reason, None);
    }

    #[test]
    fn non_object_values_are_invalid_format() {
        assert_eq!(
            stored(r#"["example.com"]"#, "example.com").reason,
            Some(ViolationReason::InvalidLicenseFormat)
        );
    }

    #[test]
    fn reason_codes_match_serialized_names() {
        for reason in [
            ViolationReason::InvalidLicenseFormat,
            ViolationReason::UnauthorizedDomain,
            ViolationReason::InvalidLicenseKeyFormat,
            ViolationReason::UnauthorizedPremiumAccess,
            ViolationReason::WatermarkRemoval,
            ViolationReason::ProtectionScriptsRemoved,
            ViolationReason::DevtoolsAccessed,
        ] {
            let serialized = serde_json::to_string(&reason).unwrap();
            assert_eq!(serialized, format!("\"{}\"", reason.code()));
        }
    }
}
