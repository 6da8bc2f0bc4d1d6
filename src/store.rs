use crate::flag::{Environment, FlagRecord};

/// FlagStore is the read side of whatever persists feature flags.
///
/// The evaluator never talks to a store itself; callers look the record up and pass it to
/// [crate::evaluate]. Implementations are responsible for tenant and environment scoping:
/// a record returned for `(tenant_id, environment)` must belong to that tenant and
/// environment.
pub trait FlagStore {
    /// Retrieve the flag with key `key` configured for the given tenant and environment.
    fn flag(&self, tenant_id: &str, environment: Environment, key: &str) -> Option<&FlagRecord>;

    /// All flags configured for the given tenant and environment, ordered by key.
    fn flags(&self, tenant_id: &str, environment: Environment) -> Vec<&FlagRecord>;
}
