mod method;

pub mod store;
pub mod trie;

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use store::PermissionStore;

/// Decides whether a request may reach the upstream server, based on the
/// current contents of the [`PermissionStore`].
pub struct Authorizer {
    store: Arc<PermissionStore>,
    bypass: HashSet<String>,
}

impl Authorizer {
    pub fn new(store: Arc<PermissionStore>, bypass: &[String]) -> Self {
        Self {
            store,
            bypass: bypass.iter().cloned().collect(),
        }
    }

    /// Paths on the bypass list are allowed for anyone, even before the first
    /// refresh has completed.
    pub fn is_bypass(&self, path: &str) -> bool {
        self.bypass.contains(path)
    }

    /// `path` is the request path with the gateway prefix already removed,
    /// e.g. `/docs/trunk/README`. `user` is `None` for requests whose
    /// credentials could not be parsed.
    pub fn can_access(&self, user: Option<&str>, method: &str, path: &str) -> bool {
        if self.is_bypass(path) {
            return true;
        }

        // Checked on the whole path, `!` suffix included: the upstream
        // resolves dot segments anywhere in it.
        if trie::has_traversal(path) {
            debug!("Path '{path}' has a dot segment, deny {method}");
            return false;
        }

        if !self.store.is_warm() {
            debug!("Permission store is not ready, deny {method} {path}");
            return false;
        }

        let user = match user {
            Some(name) => match self.store.get_user(name) {
                Some(user) => Some(user),
                None => {
                    debug!("User '{name}' not found");
                    return false;
                }
            },
            None => None,
        };

        let path = match path.split_once('!') {
            Some((path, _)) => path,
            None => path,
        };

        let parts: Vec<&str> = path.splitn(3, '/').collect();
        if parts.len() < 3 {
            debug!("Path '{path}' does not address a repository, pass through");
            return true;
        }
        let repo_name = parts[1];
        let repo_path = parts[2];

        let user = match user {
            Some(user) => user,
            None => {
                debug!("Anonymous request on repository path '{path}', deny");
                return false;
            }
        };

        let repo = match self.store.get_repo(repo_name) {
            Some(repo) => repo,
            None => {
                debug!("Repository '{repo_name}' not found");
                return false;
            }
        };

        if repo_path.is_empty() {
            return true;
        }

        let entry_ids = match repo.lookup(repo_path) {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                debug!("Path '{repo_path}' has no entry in repository '{repo_name}'");
                return false;
            }
        };

        let perm = user.aggregate(&entry_ids);
        let required = method::required_perm(method);
        let granted = required == 0 || perm & required != 0;
        debug!(
            "User '{}' {method} on '{repo_name}/{repo_path}': perm {perm}, required {required}, granted {granted}",
            user.name
        );

        granted
    }
}
