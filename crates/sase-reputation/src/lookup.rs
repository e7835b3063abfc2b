//! Lookup Service
//!
//! Answers "is this URL listed" against the snapshot-backed lists,
//! reloading snapshots the updater replaced. Lists are consulted in
//! configuration order for every candidate, candidates in emission order.

use crate::canonical::CandidateSet;
use crate::config::ReputationConfig;
use crate::store::WatchedList;
use tracing::{debug, warn};

/// A listed URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// URL as it was looked up
    pub url: String,
    /// List that matched
    pub list: String,
    /// Canonical form whose digest matched
    pub candidate: String,
}

/// Lookup over a fixed, ordered set of lists
pub struct LookupService {
    lists: Vec<WatchedList>,
    reload_every: u32,
    since_check: u32,
}

impl LookupService {
    /// `reload_every` lookups pass between two snapshot freshness checks.
    /// The first lookup always checks.
    pub fn new(lists: Vec<WatchedList>, reload_every: u32) -> Self {
        let reload_every = reload_every.max(1);
        Self {
            lists,
            reload_every,
            since_check: reload_every,
        }
    }

    pub fn from_config(config: &ReputationConfig) -> Self {
        Self::new(config.watched_lists(), config.reload_every)
    }

    pub fn lists(&self) -> &[WatchedList] {
        &self.lists
    }

    /// Whether any list can match at all
    pub fn has_data(&self) -> bool {
        self.lists.iter().any(|w| w.list().is_usable())
    }

    /// Reload every list whose snapshot changed. A failing list keeps its
    /// previous content and does not hold back the others.
    pub fn refresh(&mut self) {
        for watched in &mut self.lists {
            if let Err(e) = watched.refresh() {
                warn!("Reload of {} failed: {}", watched.path().display(), e);
            }
        }
    }

    /// Look `url` up, reloading snapshots first when a check is due
    pub fn lookup(&mut self, url: &str) -> Option<Match> {
        if self.since_check >= self.reload_every {
            self.refresh();
            self.since_check = 0;
        }
        self.since_check += 1;

        self.check(url)
    }

    /// Look `url` up against the lists as currently loaded
    pub fn check(&self, url: &str) -> Option<Match> {
        if !self.has_data() {
            return None;
        }

        let candidates = match CandidateSet::from_url(url) {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("{}", e);
                return None;
            }
        };

        for candidate in candidates.iter() {
            let hex = candidate.digest.to_hex();
            for watched in &self.lists {
                let list = watched.list();
                if list.contains(&hex) {
                    debug!("Match is found in {}: {}", list.name(), candidate.form);
                    return Some(Match {
                        url: url.to_string(),
                        list: list.name().to_string(),
                        candidate: candidate.form.clone(),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest;
    use crate::scratch_dir;
    use crate::store::{save, BlockList, ListVersion};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn write_list(path: &Path, name: &str, forms: &[&str]) {
        let mut list = BlockList::new(name);
        list.apply_full_snapshot(
            ListVersion::new(1, 0),
            forms.iter().map(|f| digest(f).to_hex()),
        );
        save(path, &list).unwrap();
    }

    fn service(dir: &Path, reload_every: u32) -> (LookupService, PathBuf, PathBuf) {
        let black = dir.join("black.snapshot");
        let malware = dir.join("malware.snapshot");
        let lists = vec![
            WatchedList::new("black", &black),
            WatchedList::new("malware", &malware),
        ];
        (LookupService::new(lists, reload_every), black, malware)
    }

    #[test]
    fn test_no_data_never_matches() {
        let dir = scratch_dir();
        let (mut service, _, _) = service(&dir, 10);

        assert!(!service.has_data());
        assert_eq!(service.lookup("http://example.com/"), None);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_match_reports_original_url() {
        let dir = scratch_dir();
        let (mut service, _, malware) = service(&dir, 10);
        write_list(&malware, "malware", &["example.com/"]);

        let hit = service.lookup("http://www.example.com/some/page.html?x=1").unwrap();
        assert_eq!(hit.url, "http://www.example.com/some/page.html?x=1");
        assert_eq!(hit.list, "malware");
        assert_eq!(hit.candidate, "example.com/");

        assert_eq!(service.lookup("http://example.org/"), None);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_list_priority_and_candidate_order() {
        let dir = scratch_dir();
        let (mut service, black, malware) = service(&dir, 10);
        write_list(&black, "black", &["example.com/", "www.example.com/a/"]);
        write_list(&malware, "malware", &["example.com/", "www.example.com/"]);

        let hit = service.lookup("http://www.example.com/a/b").unwrap();
        // www.example.com/ is emitted first, only malware holds it
        assert_eq!(hit.list, "malware");
        assert_eq!(hit.candidate, "www.example.com/");

        let hit = service.lookup("http://example.com/").unwrap();
        assert_eq!(hit.list, "black");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_rejected_scheme_is_no_match() {
        let dir = scratch_dir();
        let (mut service, black, _) = service(&dir, 10);
        write_list(&black, "black", &["example.com/"]);

        assert_eq!(service.lookup("https://example.com/"), None);
        assert!(service.lookup("http://example.com/").is_some());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_reload_is_throttled() {
        let dir = scratch_dir();
        let (mut service, black, _) = service(&dir, 3);

        assert_eq!(service.lookup("http://example.com/"), None);
        write_list(&black, "black", &["example.com/"]);

        assert_eq!(service.lookup("http://example.com/"), None);
        assert_eq!(service.lookup("http://example.com/"), None);
        assert!(service.lookup("http://example.com/").is_some());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_broken_snapshot_does_not_block_other_lists() {
        let dir = scratch_dir();
        let (mut service, black, malware) = service(&dir, 10);
        fs::write(&black, "garbage").unwrap();
        write_list(&malware, "malware", &["example.com/"]);

        let hit = service.lookup("http://example.com/").unwrap();
        assert_eq!(hit.list, "malware");
        assert!(!service.lists()[0].list().is_usable());

        fs::remove_dir_all(dir).unwrap();
    }
}
