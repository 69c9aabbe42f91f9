use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use super::trie::PathNode;

pub const PERM_READ: u32 = 1;
pub const PERM_WRITE: u32 = 1 << 1;

/// The permission tree of one repository. Built off to the side and then
/// published whole, readers never observe a partially filled tree.
#[derive(Debug)]
pub struct RepositoryTree {
    pub rid: u64,
    pub name: String,
    pub root: PathNode,
}

impl RepositoryTree {
    pub fn new(rid: u64, name: impl ToString) -> Self {
        let name = name.to_string();
        let root = PathNode::new(&name);
        Self { rid, name, root }
    }

    pub fn insert(&mut self, path: &str, entry_id: u64) {
        self.root.insert(path, entry_id);
    }

    pub fn lookup(&self, path: &str) -> Option<HashSet<u64>> {
        self.root.lookup(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: u64,
    pub name: String,

    /// Entry id to permission bits.
    pub perms: HashMap<u64, u32>,
}

impl User {
    /// Bitwise OR of the grants this user holds on `entry_ids`. Ids without a
    /// grant contribute nothing.
    pub fn aggregate(&self, entry_ids: &HashSet<u64>) -> u32 {
        entry_ids
            .iter()
            .filter_map(|id| self.perms.get(id))
            .fold(0, |acc, perm| acc | perm)
    }
}

/// In-memory cache of repository trees and user permission tables.
///
/// The refresh loop is the only writer. Each top-level entry is an [`Arc`]
/// swapped in a single map operation, so request handlers can read while a
/// refresh is running.
#[derive(Debug, Default)]
pub struct PermissionStore {
    repos: DashMap<u64, Arc<RepositoryTree>>,
    repo_names: DashMap<String, u64>,
    users: DashMap<String, Arc<User>>,
    user_names: DashMap<u64, String>,

    last_repo_check: AtomicU64,
    last_user_check: AtomicU64,

    warm: AtomicBool,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    pub fn mark_warm(&self) {
        if !self.warm.swap(true, Ordering::AcqRel) {
            info!(
                "Permission store is warm: {} repositories, {} users",
                self.repos.len(),
                self.users.len()
            );
        }
    }

    pub fn last_repo_check(&self) -> u64 {
        self.last_repo_check.load(Ordering::Acquire)
    }

    pub fn last_user_check(&self) -> u64 {
        self.last_user_check.load(Ordering::Acquire)
    }

    /// Moves the repository watermark forward. Smaller values are ignored.
    pub fn advance_repo_check(&self, time: u64) {
        self.last_repo_check.fetch_max(time, Ordering::AcqRel);
    }

    /// Moves the user watermark forward. Smaller values are ignored.
    pub fn advance_user_check(&self, time: u64) {
        self.last_user_check.fetch_max(time, Ordering::AcqRel);
    }

    pub fn replace_repo(&self, tree: RepositoryTree) {
        let rid = tree.rid;
        let name = tree.name.clone();
        let old = self.repos.insert(rid, Arc::new(tree));

        self.repo_names.insert(name.clone(), rid);
        if let Some(old) = old {
            if old.name != name {
                self.repo_names.remove_if(&old.name, |_, id| *id == rid);
            }
        }
    }

    pub fn remove_repo(&self, rid: u64) -> bool {
        match self.repos.remove(&rid) {
            Some((_, old)) => {
                self.repo_names.remove_if(&old.name, |_, id| *id == rid);
                true
            }
            None => false,
        }
    }

    pub fn get_repo(&self, name: &str) -> Option<Arc<RepositoryTree>> {
        let rid = *self.repo_names.get(name)?;
        self.repos.get(&rid).map(|tree| tree.value().clone())
    }

    pub fn replace_user(&self, user: User) {
        let uid = user.uid;
        let name = user.name.clone();
        self.users.insert(name.clone(), Arc::new(user));

        if let Some(old) = self.user_names.insert(uid, name.clone()) {
            if old != name {
                self.users.remove_if(&old, |_, user| user.uid == uid);
            }
        }
    }

    pub fn remove_user(&self, uid: u64) -> bool {
        match self.user_names.remove(&uid) {
            Some((_, name)) => self
                .users
                .remove_if(&name, |_, user| user.uid == uid)
                .is_some(),
            None => false,
        }
    }

    pub fn get_user(&self, name: &str) -> Option<Arc<User>> {
        self.users.get(name).map(|user| user.value().clone())
    }

    pub fn repo_count(&self) -> usize {
        self.repos.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(uid: u64, name: &str, perms: &[(u64, u32)]) -> User {
        User {
            uid,
            name: name.to_string(),
            perms: perms.iter().copied().collect(),
        }
    }

    #[test]
    fn test_aggregate() {
        let alice = user(1, "alice", &[(1, PERM_READ | PERM_WRITE), (2, PERM_READ)]);

        let all: HashSet<u64> = [1, 2].into_iter().collect();
        assert_eq!(alice.aggregate(&all), PERM_READ | PERM_WRITE);

        let private: HashSet<u64> = [2].into_iter().collect();
        assert_eq!(alice.aggregate(&private), PERM_READ);

        let unknown: HashSet<u64> = [7, 8].into_iter().collect();
        assert_eq!(alice.aggregate(&unknown), 0);

        assert_eq!(alice.aggregate(&HashSet::new()), 0);
    }

    #[test]
    fn test_repos() {
        let store = PermissionStore::new();
        assert!(store.get_repo("docs").is_none());

        let mut tree = RepositoryTree::new(1, "docs");
        tree.insert("/trunk", 10);
        store.replace_repo(tree);

        let docs = store.get_repo("docs").unwrap();
        assert_eq!(docs.rid, 1);
        assert_eq!(docs.lookup("trunk/a").unwrap(), HashSet::from([10]));

        // Rename keeps the id and drops the stale name.
        store.replace_repo(RepositoryTree::new(1, "manuals"));
        assert!(store.get_repo("docs").is_none());
        assert_eq!(store.get_repo("manuals").unwrap().rid, 1);
        assert_eq!(store.repo_count(), 1);

        // A reader holding the old tree keeps a consistent view.
        assert_eq!(docs.lookup("trunk").unwrap(), HashSet::from([10]));

        assert!(store.remove_repo(1));
        assert!(!store.remove_repo(1));
        assert!(store.get_repo("manuals").is_none());
        assert_eq!(store.repo_count(), 0);
    }

    #[test]
    fn test_rename_swap() {
        let store = PermissionStore::new();
        store.replace_repo(RepositoryTree::new(1, "a"));
        store.replace_repo(RepositoryTree::new(2, "b"));

        store.replace_repo(RepositoryTree::new(2, "a"));
        store.replace_repo(RepositoryTree::new(1, "b"));

        assert_eq!(store.get_repo("a").unwrap().rid, 2);
        assert_eq!(store.get_repo("b").unwrap().rid, 1);
    }

    #[test]
    fn test_users() {
        let store = PermissionStore::new();
        store.replace_user(user(1, "alice", &[(1, PERM_READ)]));
        assert_eq!(store.get_user("alice").unwrap().perms[&1], PERM_READ);

        store.replace_user(user(1, "alice", &[(1, PERM_WRITE)]));
        assert_eq!(store.get_user("alice").unwrap().perms[&1], PERM_WRITE);
        assert_eq!(store.user_count(), 1);

        // Renamed user.
        store.replace_user(user(1, "alice2", &[(1, PERM_WRITE)]));
        assert!(store.get_user("alice").is_none());
        assert_eq!(store.get_user("alice2").unwrap().uid, 1);
        assert_eq!(store.user_count(), 1);

        assert!(store.remove_user(1));
        assert!(store.get_user("alice2").is_none());
        assert!(!store.remove_user(2));
    }

    #[test]
    fn test_watermarks() {
        let store = PermissionStore::new();
        assert_eq!(store.last_repo_check(), 0);

        store.advance_repo_check(100);
        store.advance_repo_check(50);
        assert_eq!(store.last_repo_check(), 100);

        store.advance_user_check(20);
        store.advance_user_check(30);
        assert_eq!(store.last_user_check(), 30);
    }

    #[test]
    fn test_warm() {
        let store = PermissionStore::new();
        assert!(!store.is_warm());
        store.mark_warm();
        store.mark_warm();
        assert!(store.is_warm());
    }
}
