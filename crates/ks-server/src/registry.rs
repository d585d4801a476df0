//! Registry of issued usernames

use dashmap::DashSet;

use ks_core::Username;

/// Set of usernames issued since startup.
///
/// Entries are never removed, so a username stays valid for every later
/// reconnection. Lookups and registrations may run concurrently from any
/// number of connection handlers.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    users: DashSet<Username>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            users: DashSet::new(),
        }
    }

    /// Record a username.
    ///
    /// Returns `false` when the username was already present, which happens
    /// whenever two registrations draw the same value.
    pub fn register(&self, username: Username) -> bool {
        self.users.insert(username)
    }

    /// Check whether a username has been issued
    pub fn exists(&self, username: &str) -> bool {
        self.users.contains(&Username::from(username))
    }

    /// Number of distinct usernames issued
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if no username has been issued
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// List all issued usernames, sorted
    pub fn list(&self) -> Vec<Username> {
        let mut users: Vec<Username> = self.users.iter().map(|u| u.key().clone()).collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_register_and_exists() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.exists("12"));

        assert!(registry.register(Username::from("12")));
        assert!(registry.exists("12"));
        assert!(!registry.exists("13"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SessionRegistry::new();
        assert!(registry.register(Username::from("5")));
        assert!(!registry.register(Username::from("5")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_independent_draws_are_all_registered() {
        let registry = SessionRegistry::new();
        let mut rng = StdRng::seed_from_u64(2024);

        let first = Username::generate(&mut rng, 128);
        let second = Username::generate(&mut rng, 128);
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(registry.exists(first.as_str()));
        assert!(registry.exists(second.as_str()));
        let expected = if first == second { 1 } else { 2 };
        assert_eq!(registry.len(), expected);
    }

    #[test]
    fn test_list_sorted() {
        let registry = SessionRegistry::new();
        registry.register(Username::from("9"));
        registry.register(Username::from("1"));
        assert_eq!(
            registry.list(),
            vec![Username::from("1"), Username::from("9")]
        );
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        registry.register(Username::new(format!("{}-{}", t, i)));
                        assert!(registry.exists(&format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 800);
    }
}
