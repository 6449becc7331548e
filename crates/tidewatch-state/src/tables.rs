//! redb table definitions for the Tidewatch state store.
//!
//! Entity tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The health-check log is keyed by an auto-increment `u64`; its index
//! tables map `{target_id}:{checked_at:020}:{id:020}` to the record id.

use redb::TableDefinition;

/// Monitored applications keyed by `{application_id}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Monitored hosts keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Append-only health-check records keyed by auto-increment id.
pub const HEALTH_CHECKS: TableDefinition<u64, &[u8]> = TableDefinition::new("health_checks");

/// Index over application-owned records: `{application_id}:{checked_at}:{id}` → id.
pub const APP_CHECK_INDEX: TableDefinition<&str, u64> = TableDefinition::new("app_check_index");

/// Index over host-owned records: `{host_id}:{checked_at}:{id}` → id.
pub const HOST_CHECK_INDEX: TableDefinition<&str, u64> = TableDefinition::new("host_check_index");
