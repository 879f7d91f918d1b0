//! Key namespaces used in the coordination store.

use crate::config::settings::CoordinationConfig;

/// Prefixes of the four namespaces the worker reads or writes.
///
/// Tasks: `task_prefix + name` holds the JSON task record.
/// Kill markers: `kill_prefix + name`, empty and lease-bound.
/// Locks: `lock_prefix + name`, empty and lease-bound.
/// Workers: `worker_prefix + node id`, empty and lease-bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub task_prefix: String,
    pub kill_prefix: String,
    pub lock_prefix: String,
    pub worker_prefix: String,
}

impl KeyLayout {
    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self {
            task_prefix: config.task_prefix.clone(),
            kill_prefix: config.kill_prefix.clone(),
            lock_prefix: config.lock_prefix.clone(),
            worker_prefix: config.worker_prefix.clone(),
        }
    }

    pub fn task_key(&self, name: &str) -> String {
        format!("{}{}", self.task_prefix, name)
    }

    pub fn kill_key(&self, name: &str) -> String {
        format!("{}{}", self.kill_prefix, name)
    }

    pub fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.lock_prefix, name)
    }

    pub fn worker_key(&self, node: &str) -> String {
        format!("{}{}", self.worker_prefix, node)
    }

    /// Strip a namespace prefix from a key, yielding the task name.
    pub fn extract_name<'a>(key: &'a str, prefix: &str) -> &'a str {
        key.strip_prefix(prefix).unwrap_or(key)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::from_config(&CoordinationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = KeyLayout::default();
        assert_eq!(layout.task_key("backup"), "/cron/task/backup");
        assert_eq!(layout.kill_key("backup"), "/cron/kill/backup");
        assert_eq!(layout.lock_key("backup"), "/cron/lock/backup");
        assert_eq!(layout.worker_key("10.0.0.7"), "/cron/worker/10.0.0.7");
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(KeyLayout::extract_name("/cron/kill/job1", "/cron/kill/"), "job1");
        assert_eq!(KeyLayout::extract_name("/cron/task/a/b", "/cron/task/"), "a/b");
        assert_eq!(KeyLayout::extract_name("other", "/cron/kill/"), "other");
    }
}
