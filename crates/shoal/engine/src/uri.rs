//! Connection strings published to clients.

use shoal_types::Secret;

/// `mongodb://user:pw@h1,h2/db?replicaSet=rs&authSource=admin`
pub fn connection_uri(
    username: &str,
    password: &Secret,
    hosts: &[String],
    database: &str,
    replica_set: &str,
) -> String {
    format!(
        "mongodb://{}:{}@{}/{}?replicaSet={}&authSource=admin",
        username,
        password.expose(),
        hosts.join(","),
        database,
        replica_set
    )
}

/// Address of a unit from its host and the configured port.
pub fn member_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_uri() {
        let uri = connection_uri(
            "relation-4",
            &Secret::new("pw"),
            &["10.0.0.1:27017".into(), "10.0.0.2:27017".into()],
            "app",
            "shoal",
        );
        assert_eq!(
            uri,
            concat!(
                "mongodb://relation-4:pw@10.0.0.1:27017,10.0.0.2:27017/app",
                "?replicaSet=shoal&authSource=admin"
            )
        );
    }

    #[test]
    fn test_member_address() {
        assert_eq!(member_address("10.0.0.1", 27017), "10.0.0.1:27017");
        assert_eq!(member_address("10.0.0.1:27018", 27017), "10.0.0.1:27018");
    }
}
