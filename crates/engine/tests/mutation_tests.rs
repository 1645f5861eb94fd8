//! Conditional update and delete through the repository
//!
//! Conflicts are produced deterministically by writing to the same id from
//! inside the updater, i.e. after the fetch and before the guarded write.

mod common;

use common::*;
use kvrepo_core::Mutation;
use kvrepo_engine::Layout;

// ============================================================================
// update / update_if
// ============================================================================

mod update {
    use super::*;

    #[test]
    fn test_absent() {
        for (label, repo) in all_repos() {
            let outcome = repo.update("ghost", |p| p).unwrap();
            assert_eq!(outcome, Mutation::Absent, "{label}");
            assert_eq!(outcome.as_legacy(), None, "{label}");
            assert_eq!(repo.get("ghost").unwrap(), None, "{label}");
        }
    }

    #[test]
    fn test_applied() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .update("alice", |mut p| {
                    p.tags.push("admin".to_string());
                    p
                })
                .unwrap();
            assert_eq!(outcome, Mutation::Applied, "{label}");
            assert_eq!(outcome.as_legacy(), Some(true), "{label}");
            assert_eq!(
                repo.get("alice").unwrap().unwrap().tags,
                vec!["admin".to_string()],
                "{label}"
            );
        }
    }

    #[test]
    fn test_condition_not_met_writes_nothing() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .update_if(
                    "alice",
                    |mut p| {
                        p.age = 99;
                        p
                    },
                    |p| p.age > 50,
                )
                .unwrap();
            assert_eq!(outcome, Mutation::ConditionNotMet, "{label}");
            assert_eq!(outcome.as_legacy(), Some(true), "{label}");
            assert_eq!(repo.get("alice").unwrap().map(|p| p.age), Some(30), "{label}");
        }
    }

    #[test]
    fn test_interleaved_write_wins() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .update("alice", |mut p| {
                    // Writer B lands between our fetch and our write
                    repo.set("alice", &person("alice", 77)).unwrap();
                    p.age = 31;
                    p
                })
                .unwrap();
            assert_eq!(outcome, Mutation::Conflict, "{label}");
            assert_eq!(outcome.as_legacy(), Some(false), "{label}");
            assert_eq!(repo.get("alice").unwrap().map(|p| p.age), Some(77), "{label}");
        }
    }

    #[test]
    fn test_interleaved_delete_is_conflict() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .update("alice", |p| {
                    repo.delete("alice").unwrap();
                    p
                })
                .unwrap();
            assert_eq!(outcome, Mutation::Conflict, "{label}");
            assert_eq!(repo.get("alice").unwrap(), None, "{label}");
        }
    }

    #[test]
    fn test_other_ids_do_not_conflict() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .update("alice", |mut p| {
                    repo.set("bob", &person("bob", 40)).unwrap();
                    p.age = 31;
                    p
                })
                .unwrap();
            assert_eq!(outcome, Mutation::Applied, "{label}");
        }
    }
}

// ============================================================================
// delete_if
// ============================================================================

mod delete_if {
    use super::*;

    #[test]
    fn test_outcomes() {
        for (label, repo) in all_repos() {
            assert_eq!(repo.delete_if("ghost", |_| true).unwrap(), Mutation::Absent, "{label}");

            repo.set("alice", &person("alice", 30)).unwrap();
            assert_eq!(
                repo.delete_if("alice", |p| p.age > 40).unwrap(),
                Mutation::ConditionNotMet,
                "{label}"
            );
            assert!(repo.exists("alice").unwrap(), "{label}");

            assert_eq!(
                repo.delete_if("alice", |p| p.age == 30).unwrap(),
                Mutation::Applied,
                "{label}"
            );
            assert!(!repo.exists("alice").unwrap(), "{label}");
        }
    }

    #[test]
    fn test_changed_value_survives() {
        for (label, repo) in all_repos() {
            repo.set("alice", &person("alice", 30)).unwrap();
            let outcome = repo
                .delete_if("alice", |_| {
                    repo.set("alice", &person("alice", 31)).unwrap();
                    true
                })
                .unwrap();
            assert_eq!(outcome, Mutation::Conflict, "{label}");
            assert_eq!(repo.get("alice").unwrap().map(|p| p.age), Some(31), "{label}");
        }
    }
}

// ============================================================================
// Equality-gated operations
// ============================================================================

mod equality {
    use super::*;

    const LAYOUTS: [Layout; 2] = [Layout::Value, Layout::ValueInHash];

    fn repos() -> Vec<(String, kvrepo_engine::Repository<Person>)> {
        LAYOUTS
            .iter()
            .flat_map(|&layout| {
                [
                    (format!("memory/{layout}"), memory_repo(layout).1),
                    (format!("cluster/{layout}"), cluster_repo(layout).1),
                ]
            })
            .collect()
    }

    #[test]
    fn test_update_if_it_is() {
        for (label, repo) in repos() {
            let old = person("alice", 30);
            let new = person("alice", 31);
            assert!(!repo.update_if_it_is("alice", &old, &new).unwrap(), "{label}");
            assert_eq!(repo.get("alice").unwrap(), None, "{label}");

            repo.set("alice", &old).unwrap();
            assert!(!repo.update_if_it_is("alice", &new, &old).unwrap(), "{label}");
            assert!(repo.update_if_it_is("alice", &old, &new).unwrap(), "{label}");
            assert_eq!(repo.get("alice").unwrap(), Some(new), "{label}");
        }
    }

    #[test]
    fn test_update_if_it_is_not() {
        for (label, repo) in repos() {
            let old = person("alice", 30);
            let new = person("alice", 31);
            // Absent never counts as "not equal"
            assert!(!repo.update_if_it_is_not("alice", &old, &new).unwrap(), "{label}");
            assert_eq!(repo.get("alice").unwrap(), None, "{label}");

            repo.set("alice", &old).unwrap();
            assert!(!repo.update_if_it_is_not("alice", &old, &new).unwrap(), "{label}");
            assert_eq!(repo.get("alice").unwrap(), Some(old.clone()), "{label}");

            assert!(repo.update_if_it_is_not("alice", &new, &new).unwrap(), "{label}");
            assert_eq!(repo.get("alice").unwrap(), Some(new), "{label}");
        }
    }

    #[test]
    fn test_delete_if_it_is() {
        for (label, repo) in repos() {
            let alice = person("alice", 30);
            assert!(!repo.delete_if_it_is("alice", &alice).unwrap(), "{label}");

            repo.set("alice", &alice).unwrap();
            assert!(!repo.delete_if_it_is("alice", &person("alice", 31)).unwrap(), "{label}");
            assert!(repo.exists("alice").unwrap(), "{label}");
            assert!(repo.delete_if_it_is("alice", &alice).unwrap(), "{label}");
            assert!(!repo.exists("alice").unwrap(), "{label}");
        }
    }

    #[test]
    fn test_delete_if_it_is_not() {
        for (label, repo) in repos() {
            let alice = person("alice", 30);
            assert!(!repo.delete_if_it_is_not("alice", &alice).unwrap(), "{label}");

            repo.set("alice", &alice).unwrap();
            assert!(!repo.delete_if_it_is_not("alice", &alice).unwrap(), "{label}");
            assert!(repo.exists("alice").unwrap(), "{label}");
            assert!(repo.delete_if_it_is_not("alice", &person("alice", 31)).unwrap(), "{label}");
            assert!(!repo.exists("alice").unwrap(), "{label}");
        }
    }

    #[test]
    fn test_one_differing_field_does_not_match() {
        let (_, repo) = memory_repo(Layout::ValueInHash);
        let mut tagged = person("alice", 30);
        tagged.tags.push("admin".to_string());
        repo.set("alice", &tagged).unwrap();

        let untagged = person("alice", 30);
        assert!(!repo.delete_if_it_is("alice", &untagged).unwrap());
        assert!(repo.delete_if_it_is("alice", &tagged).unwrap());
    }
}
