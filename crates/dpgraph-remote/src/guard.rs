//! Allow-list of qualified op names a party will execute.

use std::collections::BTreeSet;

use crate::error::{RemoteError, Result};
use crate::op::RemoteOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGuard {
    allowed: BTreeSet<String>,
}

impl Default for CommandGuard {
    /// Every tensor op.
    fn default() -> Self {
        Self {
            allowed: RemoteOp::all_qualified_names().into_iter().collect(),
        }
    }
}

impl CommandGuard {
    /// Restrict to `names`; each must be a known qualified op name.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: BTreeSet<String> = RemoteOp::all_qualified_names().into_iter().collect();
        let mut allowed = BTreeSet::new();
        for name in names {
            let name = name.into();
            if !known.contains(&name) {
                return Err(RemoteError::Config(format!("unknown command `{name}` in allow-list")));
            }
            allowed.insert(name);
        }
        Ok(Self { allowed })
    }

    pub fn allows(&self, op: &str) -> bool {
        self.allowed.contains(op)
    }

    pub fn check(&self, op: &str) -> Result<()> {
        if self.allows(op) {
            Ok(())
        } else {
            Err(RemoteError::DisallowedCommand(op.to_string()))
        }
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_tensor_ops_only() {
        let guard = CommandGuard::default();
        guard.check("tensor.matmul").unwrap();
        assert!(matches!(
            guard.check("tensor.__class__"),
            Err(RemoteError::DisallowedCommand(_))
        ));
    }

    #[test]
    fn restricted_list_rejects_the_rest() {
        let guard = CommandGuard::from_names(["tensor.add", "tensor.sum"]).unwrap();
        assert!(guard.allows("tensor.add"));
        assert!(!guard.allows("tensor.mul"));
        assert!(CommandGuard::from_names(["shell.exec"]).is_err());
    }
}
