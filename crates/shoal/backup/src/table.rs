//! Backup listing as shown by the `list-backups` action.

use shoal_types::BackupRecord;

const ID_WIDTH: usize = 21;
const KIND_WIDTH: usize = 12;

pub fn format_backup_table(records: &[BackupRecord]) -> String {
    let header = format!(
        "{:<id$} | {:<kind$} | {}",
        "backup-id",
        "backup-type",
        "backup-status",
        id = ID_WIDTH,
        kind = KIND_WIDTH
    );
    let mut lines = vec![header.clone(), "-".repeat(header.len())];

    let mut sorted: Vec<&BackupRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    for record in sorted {
        let mut status = record.status.to_string();
        if let Some(error) = &record.error {
            status = format!("{}: {}", status, error);
        }
        lines.push(format!(
            "{:<id$} | {:<kind$} | {}",
            record.id.to_string(),
            record.kind.to_string(),
            status,
            id = ID_WIDTH,
            kind = KIND_WIDTH
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::{BackupId, BackupKind, BackupStatus};

    #[test]
    fn test_rows_sorted_by_id() {
        let late = BackupId::parse("2026-03-02T10:00:00Z").unwrap();
        let early = BackupId::parse("2026-03-01T10:00:00Z").unwrap();
        let mut failed = BackupRecord::started(late, BackupKind::Logical, None);
        failed.complete(BackupStatus::Failed, Some("disk full".into()));
        let mut finished = BackupRecord::started(early, BackupKind::Physical, None);
        finished.complete(BackupStatus::Finished, None);

        let table = format_backup_table(&[failed, finished]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("backup-id"));
        assert!(lines[2].starts_with("2026-03-01T10:00:00Z  | physical     | finished"));
        assert!(lines[3].ends_with("failed: disk full"));
    }
}
