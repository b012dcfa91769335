//! Client append tracker for read-my-writes checks.

use std::collections::HashMap;
use std::sync::RwLock;

/// Records which block ids each client has successfully appended to each
/// file, in issuance order. A read satisfies read-my-writes for a client iff
/// every recorded id shows up in the metadata it is served.
pub struct ClientTracker {
    appends: RwLock<HashMap<String, HashMap<String, Vec<u64>>>>,
}

impl Default for ClientTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTracker {
    pub fn new() -> Self {
        ClientTracker {
            appends: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, client_id: &str, filename: &str, block_id: u64) {
        let mut appends = self.appends.write().unwrap();
        appends
            .entry(client_id.to_string())
            .or_default()
            .entry(filename.to_string())
            .or_default()
            .push(block_id);
    }

    /// The ids this client has appended to this file, in issuance order.
    pub fn recorded(&self, client_id: &str, filename: &str) -> Vec<u64> {
        let appends = self.appends.read().unwrap();
        appends
            .get(client_id)
            .and_then(|files| files.get(filename))
            .cloned()
            .unwrap_or_default()
    }

    /// True iff every block id recorded for (client, file) is present in
    /// `file_block_ids`. A client with no recorded appends is trivially
    /// satisfied by any version.
    pub fn satisfies_read_my_writes(
        &self,
        client_id: &str,
        filename: &str,
        file_block_ids: &[u64],
    ) -> bool {
        let appends = self.appends.read().unwrap();
        let Some(recorded) = appends.get(client_id).and_then(|files| files.get(filename)) else {
            return true;
        };
        recorded.iter().all(|id| file_block_ids.contains(id))
    }

    pub fn clear_client(&self, client_id: &str) {
        self.appends.write().unwrap().remove(client_id);
    }

    pub fn clear_file(&self, filename: &str) {
        let mut appends = self.appends.write().unwrap();
        for files in appends.values_mut() {
            files.remove(filename);
        }
    }

    pub fn clear_all(&self) {
        self.appends.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tracker_tests {
    use super::*;

    #[test]
    fn soundness_of_read_my_writes() {
        let tracker = ClientTracker::new();
        assert!(tracker.satisfies_read_my_writes("c1", "f", &[]));

        tracker.record("c1", "f", 10);
        tracker.record("c1", "f", 20);
        assert_eq!(tracker.recorded("c1", "f"), vec![10, 20]);

        // superset satisfies, any missing recorded id does not
        assert!(tracker.satisfies_read_my_writes("c1", "f", &[5, 10, 20, 30]));
        assert!(!tracker.satisfies_read_my_writes("c1", "f", &[10]));
        assert!(!tracker.satisfies_read_my_writes("c1", "f", &[20, 30]));

        // other clients and other files are unaffected
        assert!(tracker.satisfies_read_my_writes("c2", "f", &[]));
        assert!(tracker.satisfies_read_my_writes("c1", "g", &[]));
    }

    #[test]
    fn clears() {
        let tracker = ClientTracker::new();
        tracker.record("c1", "f", 1);
        tracker.record("c1", "g", 2);
        tracker.record("c2", "f", 3);

        tracker.clear_file("f");
        assert!(tracker.recorded("c1", "f").is_empty());
        assert!(tracker.recorded("c2", "f").is_empty());
        assert_eq!(tracker.recorded("c1", "g"), vec![2]);

        tracker.clear_client("c1");
        assert!(tracker.recorded("c1", "g").is_empty());

        tracker.record("c3", "h", 9);
        tracker.clear_all();
        assert!(tracker.recorded("c3", "h").is_empty());
    }
}
