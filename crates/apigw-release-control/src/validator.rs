//! Pre-flight release validation.
//!
//! Checks run in order and the first failure wins:
//!
//! 1. gateway and stage are active (skipped when liveness is bypassed)
//! 2. the stage declares at least one backend host
//! 3. the resource version uses the current schema
//! 4. every `{env.NAME}` placeholder resolves to a well-formed stage variable

use std::sync::LazyLock;

use apigw_release_store::{
    Gateway, PublishSource, ResourceVersion, Stage, TriggerPublishType,
};
use regex::Regex;

use crate::error::ValidationError;

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{env\.([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid regex pattern")
});

static PATH_VALUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w/.-]*$").expect("Invalid regex pattern"));

static HOST_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*(:[0-9]{1,5})?$",
    )
    .expect("Invalid regex pattern")
});

/// The records one release is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// The gateway.
    pub gateway: &'a Gateway,
    /// The stage receiving the release.
    pub stage: &'a Stage,
    /// The resource version being released.
    pub resource_version: &'a ResourceVersion,
}

/// Which checks a validation run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationMode {
    bypass_liveness: bool,
}

impl ValidationMode {
    /// Run every check.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            bypass_liveness: false,
        }
    }

    /// Skip the gateway and stage activity check.
    #[must_use]
    pub const fn bypass_liveness() -> Self {
        Self {
            bypass_liveness: true,
        }
    }

    /// The mode a trigger runs with.
    ///
    /// Enabling a gateway publishes stages that are not active yet, and
    /// disabling one tears down stages that already are not.
    #[must_use]
    pub const fn for_trigger(source: PublishSource, trigger: TriggerPublishType) -> Self {
        if matches!(source, PublishSource::GatewayEnable)
            || matches!(trigger, TriggerPublishType::RevokeDisable)
        {
            Self::bypass_liveness()
        } else {
            Self::strict()
        }
    }

    /// Returns true if the liveness check is skipped.
    #[must_use]
    pub const fn skips_liveness(self) -> bool {
        self.bypass_liveness
    }
}

/// Runs the pre-flight checks of a release.
#[derive(Debug, Clone)]
pub struct ReleaseValidator {
    current_schema_version: String,
}

impl ReleaseValidator {
    /// Create a validator requiring `current_schema_version`.
    #[must_use]
    pub fn new(current_schema_version: impl Into<String>) -> Self {
        Self {
            current_schema_version: current_schema_version.into(),
        }
    }

    /// The schema version resource versions must use.
    #[must_use]
    pub fn current_schema_version(&self) -> &str {
        &self.current_schema_version
    }

    /// Validate one release.
    ///
    /// # Errors
    ///
    /// Returns the first failing check.
    pub fn validate(
        &self,
        input: &ValidationInput<'_>,
        mode: ValidationMode,
    ) -> Result<(), ValidationError> {
        if !mode.skips_liveness() {
            Self::check_liveness(input)?;
        }
        Self::check_backend_hosts(input.stage)?;
        self.check_schema(input.resource_version)?;
        Self::check_variables(input)
    }

    fn check_liveness(input: &ValidationInput<'_>) -> Result<(), ValidationError> {
        if !input.gateway.is_active() {
            return Err(ValidationError::GatewayInactive {
                gateway: input.gateway.name.clone(),
            });
        }
        if !input.stage.is_active() {
            return Err(ValidationError::StageInactive {
                stage: input.stage.name.clone(),
            });
        }
        Ok(())
    }

    fn check_backend_hosts(stage: &Stage) -> Result<(), ValidationError> {
        if stage.host_count() == 0 {
            return Err(ValidationError::NoBackendHosts {
                stage: stage.name.clone(),
            });
        }
        Ok(())
    }

    fn check_schema(&self, version: &ResourceVersion) -> Result<(), ValidationError> {
        if version.schema_version != self.current_schema_version {
            return Err(ValidationError::SchemaMismatch {
                version: version.version.clone(),
                schema: version.schema_version.clone(),
                current: self.current_schema_version.clone(),
            });
        }
        Ok(())
    }

    fn check_variables(input: &ValidationInput<'_>) -> Result<(), ValidationError> {
        let stage = input.stage;

        for resource in &input.resource_version.resources {
            check_template(stage, &resource.path, VariableKind::Path)?;
            for host in &resource.hosts {
                check_template(stage, host, VariableKind::Host)?;
            }
        }

        for backend in &stage.backends {
            for host in &backend.hosts {
                check_template(stage, &host.host, VariableKind::Host)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum VariableKind {
    Path,
    Host,
}

fn check_template(stage: &Stage, template: &str, kind: VariableKind) -> Result<(), ValidationError> {
    for captures in PLACEHOLDER_REGEX.captures_iter(template) {
        let name = &captures[1];
        let Some(value) = stage.vars.get(name) else {
            return Err(ValidationError::MissingVariable {
                stage: stage.name.clone(),
                name: name.to_string(),
            });
        };

        match kind {
            VariableKind::Path if !PATH_VALUE_REGEX.is_match(value) => {
                return Err(ValidationError::InvalidPathVariable {
                    stage: stage.name.clone(),
                    name: name.to_string(),
                    value: value.clone(),
                });
            }
            VariableKind::Host if !HOST_VALUE_REGEX.is_match(value) => {
                return Err(ValidationError::InvalidHostVariable {
                    stage: stage.name.clone(),
                    name: name.to_string(),
                    value: value.clone(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_release_core::{GatewayId, ResourceVersionId, StageId};
    use apigw_release_store::{
        BackendHost, GatewayStatus, HostingType, ResourceEntry, StageBackend, StageStatus,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn gateway(status: GatewayStatus) -> Gateway {
        Gateway {
            id: GatewayId::new(1),
            name: "payments".to_string(),
            status,
            hosting_type: HostingType::Default,
        }
    }

    fn stage(host: &str, vars: &[(&str, &str)]) -> Stage {
        Stage {
            id: StageId::new(1),
            gateway_id: GatewayId::new(1),
            name: "prod".to_string(),
            status: StageStatus::Active,
            backends: vec![StageBackend {
                name: "default".to_string(),
                hosts: vec![BackendHost::new("http", host)],
            }],
            vars: vars
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn version(schema: &str, path: &str) -> ResourceVersion {
        ResourceVersion {
            id: ResourceVersionId::new(5),
            gateway_id: GatewayId::new(1),
            version: "1.4.0".to_string(),
            schema_version: schema.to_string(),
            resources: vec![ResourceEntry {
                name: "list-orders".to_string(),
                method: "GET".to_string(),
                path: path.to_string(),
                backend: "default".to_string(),
                hosts: Vec::new(),
            }],
            created_at: Utc::now(),
        }
    }

    fn validate(
        gateway: &Gateway,
        stage: &Stage,
        version: &ResourceVersion,
        mode: ValidationMode,
    ) -> Result<(), ValidationError> {
        ReleaseValidator::new("2.0").validate(
            &ValidationInput {
                gateway,
                stage,
                resource_version: version,
            },
            mode,
        )
    }

    #[test]
    fn valid_release_passes() {
        let result = validate(
            &gateway(GatewayStatus::Active),
            &stage("{env.HOST}", &[("HOST", "orders.internal:8080"), ("PREFIX", "v1/orders")]),
            &version("2.0", "/{env.PREFIX}/list"),
            ValidationMode::strict(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn inactive_gateway_fails_unless_bypassed() {
        let gw = gateway(GatewayStatus::Inactive);
        let st = stage("orders.internal", &[]);
        let rv = version("2.0", "/orders");

        assert!(matches!(
            validate(&gw, &st, &rv, ValidationMode::strict()),
            Err(ValidationError::GatewayInactive { .. })
        ));
        assert!(validate(&gw, &st, &rv, ValidationMode::bypass_liveness()).is_ok());
    }

    #[test]
    fn inactive_stage_fails() {
        let mut st = stage("orders.internal", &[]);
        st.status = StageStatus::Inactive;
        assert_eq!(
            validate(
                &gateway(GatewayStatus::Active),
                &st,
                &version("2.0", "/orders"),
                ValidationMode::strict()
            ),
            Err(ValidationError::StageInactive {
                stage: "prod".to_string()
            })
        );
    }

    #[test]
    fn zero_hosts_names_the_stage() {
        let mut st = stage("orders.internal", &[]);
        st.backends[0].hosts.clear();
        let err = validate(
            &gateway(GatewayStatus::Active),
            &st,
            &version("2.0", "/orders"),
            ValidationMode::bypass_liveness(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoBackendHosts {
                stage: "prod".to_string()
            }
        );
        assert!(err.to_string().contains("prod"));
    }

    #[test]
    fn outdated_schema_asks_for_new_version() {
        let err = validate(
            &gateway(GatewayStatus::Active),
            &stage("orders.internal", &[]),
            &version("1.0", "/orders"),
            ValidationMode::strict(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("create a new resource version"));
    }

    #[test]
    fn missing_variable_fails() {
        let err = validate(
            &gateway(GatewayStatus::Active),
            &stage("orders.internal", &[]),
            &version("2.0", "/{env.PREFIX}/list"),
            ValidationMode::strict(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingVariable {
                stage: "prod".to_string(),
                name: "PREFIX".to_string()
            }
        );
    }

    #[test]
    fn malformed_path_variable_fails() {
        let err = validate(
            &gateway(GatewayStatus::Active),
            &stage("orders.internal", &[("PREFIX", "v1?debug=1")]),
            &version("2.0", "/{env.PREFIX}/list"),
            ValidationMode::strict(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPathVariable { .. }));
    }

    #[test]
    fn malformed_host_variable_fails() {
        let err = validate(
            &gateway(GatewayStatus::Active),
            &stage("{env.HOST}", &[("HOST", "http://orders.internal")]),
            &version("2.0", "/orders"),
            ValidationMode::strict(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidHostVariable { .. }));
    }

    #[test]
    fn mode_for_trigger() {
        assert!(ValidationMode::for_trigger(
            PublishSource::GatewayEnable,
            TriggerPublishType::RollingUpdate
        )
        .skips_liveness());
        assert!(ValidationMode::for_trigger(
            PublishSource::StageDisable,
            TriggerPublishType::RevokeDisable
        )
        .skips_liveness());
        assert!(!ValidationMode::for_trigger(
            PublishSource::ManualPublish,
            TriggerPublishType::RollingUpdate
        )
        .skips_liveness());
    }
}
