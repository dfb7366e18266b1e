use serde::{Deserialize, Serialize};

/// Outcome of one environment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: bool,
    pub message: String,
    /// Remediation steps for the operator; empty when the check passed.
    pub hints: Vec<String>,
}

impl CheckResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            hints: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>, hints: Vec<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            hints,
        }
    }
}

/// All checks of one preflight run. `ready` is their conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ready: bool,
    pub workdir: CheckResult,
    pub runtime: CheckResult,
    pub public_access: CheckResult,
}

impl PreflightReport {
    pub fn new(workdir: CheckResult, runtime: CheckResult, public_access: CheckResult) -> Self {
        Self {
            ready: workdir.ok && runtime.ok && public_access.ok,
            workdir,
            runtime,
            public_access,
        }
    }

    /// Checks paired with their names, in execution order.
    pub fn checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("workdir", &self.workdir),
            ("runtime", &self.runtime),
            ("public_access", &self.public_access),
        ]
    }
}
