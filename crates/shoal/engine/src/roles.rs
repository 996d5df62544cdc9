//! Role grants for internal and relation users.

use serde::{Deserialize, Serialize};
use std::fmt;

use shoal_types::InternalRole;

/// A named role on a database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

impl fmt::Display for RoleGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.db)
    }
}

fn admin_roles() -> Vec<RoleGrant> {
    vec![
        RoleGrant::new("userAdminAnyDatabase", "admin"),
        RoleGrant::new("readWriteAnyDatabase", "admin"),
        RoleGrant::new("userAdmin", "admin"),
    ]
}

fn monitor_roles() -> Vec<RoleGrant> {
    vec![
        RoleGrant::new("explainRole", "admin"),
        RoleGrant::new("clusterMonitor", "admin"),
        RoleGrant::new("read", "local"),
    ]
}

fn backup_roles() -> Vec<RoleGrant> {
    vec![
        RoleGrant::new("readWrite", "admin"),
        RoleGrant::new("backup", "admin"),
        RoleGrant::new("clusterMonitor", "admin"),
        RoleGrant::new("restore", "admin"),
        RoleGrant::new("pbmAnyAction", "admin"),
    ]
}

pub fn internal_roles(role: InternalRole) -> Vec<RoleGrant> {
    match role {
        InternalRole::Operator => admin_roles(),
        InternalRole::Backup => backup_roles(),
        InternalRole::Monitor => monitor_roles(),
    }
}

/// `readWrite` on the relation's database plus any extra role sets.
/// Unknown extra roles are ignored.
pub fn relation_roles(database: &str, extra: &[String]) -> Vec<RoleGrant> {
    let mut grants = vec![RoleGrant::new("readWrite", database)];
    for name in extra {
        let more = match name.as_str() {
            "admin" => admin_roles(),
            "monitor" => monitor_roles(),
            "backup" => backup_roles(),
            _ => continue,
        };
        grants.extend(more);
    }
    grants.sort();
    grants.dedup();
    grants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_roles_default() {
        let grants = relation_roles("app", &[]);
        assert_eq!(grants, vec![RoleGrant::new("readWrite", "app")]);
    }

    #[test]
    fn test_relation_roles_extra_deduplicated() {
        let extra = vec!["monitor".to_string(), "backup".to_string(), "root".to_string()];
        let grants = relation_roles("app", &extra);
        let cluster_monitor = grants
            .iter()
            .filter(|g| g.role == "clusterMonitor")
            .count();
        assert_eq!(cluster_monitor, 1);
        assert!(grants.contains(&RoleGrant::new("pbmAnyAction", "admin")));
        assert!(!grants.iter().any(|g| g.role == "root"));
    }

    #[test]
    fn test_internal_roles() {
        assert!(internal_roles(InternalRole::Monitor).contains(&RoleGrant::new("read", "local")));
        assert_eq!(
            RoleGrant::new("userAdmin", "admin").to_string(),
            "userAdmin@admin"
        );
    }
}
