//! Append-only AST validator: parses base vs. new source trees under a set
//! of scope prefixes and flags deletions, exported-signature drift, `init`
//! (constructor) drift, and methods added outside their file's scope.
//!
//! Operates over the changed-file set the build gate already materialised
//! (base content via `show_file_at_ref`, new content from the worktree),
//! not a full directory walk — the gate only ever needs to know what the
//! agent's commit actually touched.

use std::collections::{HashMap, HashSet};

use quote::ToTokens;
use serde::{Deserialize, Serialize};
use syn::visit::{self, Visit};

pub const KNOWN_EXTENSIONLESS_FILENAMES: &[&str] = &["Makefile", "Dockerfile", "Justfile", "Procfile", "Vagrantfile", "Rakefile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DeletedCode,
    DeletedFunc,
    ModifiedInit,
    ModifiedExport,
    OutOfScopeMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub symbol: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub allow_new_funcs: bool,
    pub allow_new_methods: bool,
    pub allow_new_files: bool,
    pub allow_public_api_change: bool,
}

impl Default for Policy {
    /// Append-only, new files allowed, methods scope-limited, no public-API
    /// changes, no init changes, no deletions (the latter two are not
    /// flags — `block_init_modification`/`block_deletion` are always on).
    fn default() -> Self {
        Self {
            allow_new_funcs: true,
            allow_new_methods: true,
            allow_new_files: true,
            allow_public_api_change: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub base_content: Option<String>,
    pub new_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstResult {
    pub violations: Vec<Violation>,
    pub passed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AstError {
    #[error("failed to parse {file}: {source}")]
    Parse { file: String, source: String },
}

#[derive(Debug, Clone)]
struct Signature {
    key: String,
    is_exported: bool,
    is_init: bool,
    token_text: String,
}

struct SignatureVisitor {
    receiver: Option<String>,
    out: Vec<Signature>,
}

impl SignatureVisitor {
    fn record(&mut self, name: &str, sig: &syn::Signature, vis: &syn::Visibility) {
        let key = match &self.receiver {
            Some(receiver) => format!("{receiver}.{name}"),
            None => name.to_string(),
        };
        self.out.push(Signature {
            key,
            is_exported: matches!(vis, syn::Visibility::Public(_)),
            is_init: name == "new",
            token_text: sig.to_token_stream().to_string(),
        });
    }
}

impl<'ast> Visit<'ast> for SignatureVisitor {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        self.record(&node.sig.ident.to_string(), &node.sig, &node.vis);
        visit::visit_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let receiver = node.self_ty.to_token_stream().to_string().replace(' ', "");
        let mut inner = SignatureVisitor {
            receiver: Some(receiver),
            out: Vec::new(),
        };
        for item in &node.items {
            if let syn::ImplItem::Fn(method) = item {
                inner.record(&method.sig.ident.to_string(), &method.sig, &method.vis);
            }
        }
        self.out.append(&mut inner.out);
        visit::visit_item_impl(self, node);
    }
}

fn extract_signatures(file: &str, content: &str) -> Result<Vec<Signature>, AstError> {
    let parsed = syn::parse_file(content).map_err(|e| AstError::Parse {
        file: file.to_string(),
        source: e.to_string(),
    })?;
    let mut visitor = SignatureVisitor { receiver: None, out: Vec::new() };
    for item in &parsed.items {
        visitor.visit_item(item);
    }
    Ok(visitor.out)
}

fn in_scope(path: &str, scope_paths: &[String]) -> bool {
    scope_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Validates `diffs` against `policy`, emitting exactly the violation kinds
/// spec'd: `deleted_code`, `deleted_func`, `modified_init`, `modified_export`,
/// `out_of_scope_method`.
///
/// `allow_new_methods == false` is modelled as scope being empty for method
/// additions (every new method becomes `out_of_scope_method`); there is no
/// dedicated kind for a disallowed free function, so `allow_new_funcs ==
/// false` surfaces as `modified_export` on any newly added *exported* free
/// function (growing the public surface without permission is the closest
/// fit among the enumerated kinds).
pub fn validate(diffs: &[FileDiff], scope_paths: &[String], policy: &Policy) -> Result<AstResult, AstError> {
    let mut violations = Vec::new();

    for diff in diffs {
        if !diff.path.ends_with(".rs") {
            continue;
        }

        match (&diff.base_content, &diff.new_content) {
            (Some(_), None) => {
                violations.push(Violation {
                    kind: ViolationKind::DeletedCode,
                    symbol: diff.path.clone(),
                    file: diff.path.clone(),
                });
                continue;
            }
            (None, Some(_)) if !policy.allow_new_files => {
                violations.push(Violation {
                    kind: ViolationKind::DeletedCode,
                    symbol: diff.path.clone(),
                    file: diff.path.clone(),
                });
                continue;
            }
            (None, None) => continue,
            _ => {}
        }

        let base_sigs: HashMap<String, Signature> = match &diff.base_content {
            Some(content) => extract_signatures(&diff.path, content)?.into_iter().map(|s| (s.key.clone(), s)).collect(),
            None => HashMap::new(),
        };
        let new_sigs: HashMap<String, Signature> = match &diff.new_content {
            Some(content) => extract_signatures(&diff.path, content)?.into_iter().map(|s| (s.key.clone(), s)).collect(),
            None => HashMap::new(),
        };

        let base_keys: HashSet<&String> = base_sigs.keys().collect();
        let new_keys: HashSet<&String> = new_sigs.keys().collect();

        for key in base_keys.difference(&new_keys) {
            violations.push(Violation {
                kind: ViolationKind::DeletedFunc,
                symbol: (*key).clone(),
                file: diff.path.clone(),
            });
        }

        for key in base_keys.intersection(&new_keys) {
            let base_sig = &base_sigs[*key];
            let new_sig = &new_sigs[*key];
            if base_sig.token_text == new_sig.token_text {
                continue;
            }
            if new_sig.is_init {
                violations.push(Violation {
                    kind: ViolationKind::ModifiedInit,
                    symbol: (*key).clone(),
                    file: diff.path.clone(),
                });
            } else if (base_sig.is_exported || new_sig.is_exported) && !policy.allow_public_api_change {
                violations.push(Violation {
                    kind: ViolationKind::ModifiedExport,
                    symbol: (*key).clone(),
                    file: diff.path.clone(),
                });
            }
        }

        for key in new_keys.difference(&base_keys) {
            let sig = &new_sigs[*key];
            let is_method = sig.key.contains('.');
            if is_method {
                let out_of_scope = !policy.allow_new_methods || !in_scope(&diff.path, scope_paths);
                if out_of_scope {
                    violations.push(Violation {
                        kind: ViolationKind::OutOfScopeMethod,
                        symbol: (*key).clone(),
                        file: diff.path.clone(),
                    });
                }
            } else if !policy.allow_new_funcs && sig.is_exported {
                violations.push(Violation {
                    kind: ViolationKind::ModifiedExport,
                    symbol: (*key).clone(),
                    file: diff.path.clone(),
                });
            }
        }
    }

    Ok(AstResult {
        passed: violations.is_empty(),
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(path: &str, base: Option<&str>, new: Option<&str>) -> FileDiff {
        FileDiff {
            path: path.to_string(),
            base_content: base.map(str::to_string),
            new_content: new.map(str::to_string),
        }
    }

    #[test]
    fn appending_a_new_function_passes() {
        let d = diff(
            "/pkg/foo.rs",
            Some("pub fn existing() -> i32 { 1 }"),
            Some("pub fn existing() -> i32 { 1 }\nfn added() -> i32 { 2 }"),
        );
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn deleting_a_function_is_flagged() {
        let d = diff("/pkg/foo.rs", Some("pub fn remove() {}"), Some(""));
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::DeletedFunc) && v.symbol == "remove"));
    }

    #[test]
    fn removing_a_whole_file_is_deleted_code() {
        let d = diff("/pkg/foo.rs", Some("fn x() {}"), None);
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::DeletedCode)));
    }

    #[test]
    fn new_file_blocked_when_policy_disallows() {
        let d = diff("/pkg/new.rs", None, Some("fn x() {}"));
        let mut policy = Policy::default();
        policy.allow_new_files = false;
        let result = validate(&[d], &["/pkg/".to_string()], &policy).unwrap();
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::DeletedCode)));
    }

    #[test]
    fn modifying_new_signature_is_modified_init() {
        let d = diff(
            "/pkg/thing.rs",
            Some("impl Thing { pub fn new(a: i32) -> Self { Self } }"),
            Some("impl Thing { pub fn new(a: i32, b: i32) -> Self { Self } }"),
        );
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::ModifiedInit) && v.symbol == "Thing.new"));
    }

    #[test]
    fn modifying_exported_signature_blocks_without_api_change_permission() {
        let d = diff("/pkg/thing.rs", Some("pub fn compute(a: i32) -> i32 { a }"), Some("pub fn compute(a: i32, b: i32) -> i32 { a + b }"));
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::ModifiedExport)));
    }

    #[test]
    fn modifying_exported_signature_passes_when_api_change_allowed() {
        let d = diff("/pkg/thing.rs", Some("pub fn compute(a: i32) -> i32 { a }"), Some("pub fn compute(a: i32, b: i32) -> i32 { a + b }"));
        let mut policy = Policy::default();
        policy.allow_public_api_change = true;
        let result = validate(&[d], &["/pkg/".to_string()], &policy).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn new_method_outside_scope_is_flagged() {
        let d = diff("/outside/thing.rs", Some("impl Thing {}"), Some("impl Thing { fn added(&self) {} }"));
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.violations.iter().any(|v| matches!(v.kind, ViolationKind::OutOfScopeMethod)));
    }

    #[test]
    fn new_method_inside_scope_passes() {
        let d = diff("/pkg/thing.rs", Some("impl Thing {}"), Some("impl Thing { fn added(&self) {} }"));
        let result = validate(&[d], &["/pkg/".to_string()], &Policy::default()).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn new_methods_disallowed_globally_flags_even_in_scope() {
        let d = diff("/pkg/thing.rs", Some("impl Thing {}"), Some("impl Thing { fn added(&self) {} }"));
        let mut policy = Policy::default();
        policy.allow_new_methods = false;
        let result = validate(&[d], &["/pkg/".to_string()], &policy).unwrap();
        assert!(!result.passed);
    }
}
