//! `old=new` remap patterns for cross-cluster restores.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BackupError, Result};

/// Parse `old=new,old2=new2`. Whitespace around names is ignored; an empty
/// pattern is an empty remap.
pub fn parse_remap(pattern: &str) -> Result<BTreeMap<String, String>> {
    let mut remap = BTreeMap::new();
    for pair in pattern.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (old, new) = pair
            .split_once('=')
            .map(|(o, n)| (o.trim(), n.trim()))
            .filter(|(o, n)| !o.is_empty() && !n.is_empty())
            .ok_or_else(|| BackupError::InvalidRemap(format!("expected old=new, got {:?}", pair)))?;
        if remap.insert(old.to_string(), new.to_string()).is_some() {
            return Err(BackupError::InvalidRemap(format!("{:?} remapped twice", old)));
        }
    }
    Ok(remap)
}

/// Check `remap` against the names captured in a backup. Every source must
/// exist, and after remapping all names must still be distinct.
pub fn check_remap(remap: &BTreeMap<String, String>, components: &[String]) -> Result<()> {
    for old in remap.keys() {
        if !components.contains(old) {
            return Err(BackupError::InvalidRemap(format!(
                "{:?} is not in the backup",
                old
            )));
        }
    }
    let mut seen = BTreeSet::new();
    for name in components {
        let target = remap.get(name).unwrap_or(name);
        if !seen.insert(target.as_str()) {
            return Err(BackupError::RemapConflict(format!(
                "{:?} would be used by more than one replica set",
                target
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse() {
        let remap = parse_remap(" old = new ,a=b").unwrap();
        assert_eq!(remap["old"], "new");
        assert_eq!(remap["a"], "b");
        assert!(parse_remap("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_remap("old"), Err(BackupError::InvalidRemap(_))));
        assert!(matches!(parse_remap("=new"), Err(BackupError::InvalidRemap(_))));
        assert!(matches!(
            parse_remap("a=b,a=c"),
            Err(BackupError::InvalidRemap(_))
        ));
    }

    #[test]
    fn test_target_collision() {
        let components = names(&["cfg", "shard-one", "shard-two"]);
        let remap = parse_remap("shard-one=shard-two").unwrap();
        assert!(matches!(
            check_remap(&remap, &components),
            Err(BackupError::RemapConflict(_))
        ));

        let remap = parse_remap("shard-one=x,shard-two=x").unwrap();
        assert!(matches!(
            check_remap(&remap, &components),
            Err(BackupError::RemapConflict(_))
        ));

        // Swapping names is fine.
        let remap = parse_remap("shard-one=shard-two,shard-two=shard-one").unwrap();
        assert!(check_remap(&remap, &components).is_ok());
    }

    #[test]
    fn test_unknown_source() {
        let remap = parse_remap("other=new").unwrap();
        assert!(matches!(
            check_remap(&remap, &names(&["shoal"])),
            Err(BackupError::InvalidRemap(_))
        ));
    }
}
