#![cfg(test)]

use crate::eval::{RuleVisit, RuleVisitRecorder};
use crate::flag::{Environment, FlagRecord};
use crate::store::FlagStore;
use std::cell::RefCell;

pub struct TestStore {
    flags: Vec<FlagRecord>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::new_from_json_str(
            r#"[
                {
                    "key": "beta",
                    "tenantId": "acme",
                    "environment": "PROD",
                    "enabled": true,
                    "rule": {
                        "type": "or",
                        "rules": [
                            {"type": "allowlist", "userIds": ["alice"]},
                            {"type": "percentage", "value": 0}
                        ]
                    }
                },
                {
                    "key": "dark-mode",
                    "tenantId": "acme",
                    "environment": "PROD",
                    "enabled": true,
                    "rule": {"type": "percentage", "value": 100}
                },
                {
                    "key": "new-dashboard",
                    "tenantId": "acme",
                    "environment": "PROD",
                    "enabled": true,
                    "rule": {
                        "type": "and",
                        "rules": [
                            {"type": "allowlist", "userIds": ["user-1", "user-2", "user-3"]},
                            {"type": "percentage", "value": 60}
                        ]
                    }
                },
                {
                    "key": "ai-recommendations",
                    "tenantId": "acme",
                    "environment": "PROD",
                    "enabled": true,
                    "rules": {"type": "segment", "key": "ml-early-access"}
                },
                {
                    "key": "rollout-disabled",
                    "tenantId": "acme",
                    "environment": "PROD",
                    "enabled": false,
                    "rule": {"type": "percentage", "value": 100}
                },
                {
                    "key": "beta",
                    "tenantId": "acme",
                    "environment": "STAGING",
                    "enabled": true,
                    "rule": {"type": "percentage", "value": 100}
                },
                {
                    "key": "dark-mode",
                    "tenantId": "techstart",
                    "environment": "PROD",
                    "enabled": false,
                    "rule": {"type": "percentage", "value": 100}
                }
            ]"#,
        )
    }

    pub fn new_from_json_str(flags: &str) -> Self {
        Self {
            flags: serde_json::from_str(flags).unwrap(),
        }
    }
}

impl FlagStore for TestStore {
    fn flag(&self, tenant_id: &str, environment: Environment, key: &str) -> Option<&FlagRecord> {
        self.flags.iter().find(|flag| {
            flag.tenant_id == tenant_id && flag.environment == environment && flag.key == key
        })
    }

    fn flags(&self, tenant_id: &str, environment: Environment) -> Vec<&FlagRecord> {
        let mut flags: Vec<&FlagRecord> = self
            .flags
            .iter()
            .filter(|flag| flag.tenant_id == tenant_id && flag.environment == environment)
            .collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }
}

pub struct InMemoryRuleVisitRecorder {
    pub visits: RefCell<Vec<RuleVisit>>,
}

impl InMemoryRuleVisitRecorder {
    pub fn new() -> Self {
        Self {
            visits: RefCell::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.visits.borrow().len()
    }
}

impl RuleVisitRecorder for InMemoryRuleVisitRecorder {
    fn record(&self, visit: RuleVisit) {
        self.visits.borrow_mut().push(visit);
    }
}
