//! Proptest generators for property-based testing.

use proptest::prelude::*;

use quasar_filesync_core::{RelativePath, Role};

/// Paths shared by both sides, so edits collide often.
pub const PATH_POOL: &[&str] = &["a.txt", "b.txt", "notes/c.md", "notes/deep/d.bin"];

/// Generate a random valid relative path.
pub fn relative_path() -> impl Strategy<Value = RelativePath> {
    "[a-z][a-z0-9_]{0,7}(/[a-z][a-z0-9_]{0,7}){0,2}\\.[a-z]{1,3}".prop_map(|s| {
        RelativePath::new(s).expect("generated path is relative and visible")
    })
}

/// Pick a path from [`PATH_POOL`].
pub fn pooled_path() -> impl Strategy<Value = String> {
    prop::sample::select(PATH_POOL).prop_map(String::from)
}

/// Generate file content of at most `max_len` bytes.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a role.
pub fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Leader), Just(Role::Follower)]
}

/// One action in an edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `role` writes `content` to `path`.
    Write {
        role: Role,
        path: String,
        content: Vec<u8>,
    },
    /// `role` deletes `path`.
    Delete { role: Role, path: String },
    /// `role` processes up to `count` pending messages.
    Deliver { role: Role, count: usize },
}

/// Steps that run concurrently: writes and partial deliveries interleave.
///
/// Every written content is distinct, and nothing is deleted. Hashes are
/// the only version signal on the wire, so a path that returns to a hash
/// the peer has already seen can leave the two sides apart; these scripts
/// never do that.
pub fn concurrent_script(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        3 => (role(), pooled_path(), content(16)).prop_map(|(role, path, content)| {
            Step::Write { role, path, content }
        }),
        2 => (role(), 1usize..4).prop_map(|(role, count)| Step::Deliver { role, count }),
    ];
    prop::collection::vec(step, 0..=max_len).prop_map(tag_writes)
}

/// Edits applied one at a time, each fully delivered before the next.
///
/// Deletes and empty writes are included.
pub fn sequential_script(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        3 => (role(), pooled_path(), content(8)).prop_map(|(role, path, content)| {
            Step::Write { role, path, content }
        }),
        1 => (role(), pooled_path()).prop_map(|(role, path)| Step::Delete { role, path }),
    ];
    prop::collection::vec(step, 0..=max_len)
}

/// Make each write's content unique by prefixing its position.
fn tag_writes(steps: Vec<Step>) -> Vec<Step> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| match step {
            Step::Write {
                role,
                path,
                content,
            } => {
                let mut tagged = format!("{i:06}:").into_bytes();
                tagged.extend_from_slice(&content);
                Step::Write {
                    role,
                    path,
                    content: tagged,
                }
            }
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_generated_paths_are_visible(path in relative_path()) {
            prop_assert!(!path.is_hidden());
            prop_assert!(!path.as_str().starts_with('/'));
        }

        #[test]
        fn test_concurrent_writes_are_unique(steps in concurrent_script(40)) {
            let mut seen = HashSet::new();
            for step in &steps {
                let is_delete = matches!(step, Step::Delete { .. });
                prop_assert!(!is_delete);
                if let Step::Write { content, .. } = step {
                    prop_assert!(seen.insert(content.clone()));
                }
            }
        }
    }
}
