//! Argument binding and placeholder interpolation.
//!
//! Caller overrides replace declared defaults. Defaults may reference other
//! arguments with `#{name}` and are resolved recursively; a reference cycle
//! fails before anything is spawned. Resolution is pure.

use std::path::{Path, MAIN_SEPARATOR_STR};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};

use super::error::ExecutionError;
use crate::catalog::AtomicTestSpec;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\{([^{}]*)\}").expect("placeholder pattern is valid"))
}

fn atomics_folder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$?PathToAtomicsFolder[\\/]").expect("atomics folder pattern is valid")
    })
}

/// Split every element on commas: `["a=1,b=2", "c=3"]` -> three pairs.
pub fn expand_pairs<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `key=value` pairs. The value may itself contain `=`.
pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<IndexMap<String, String>, ExecutionError> {
    let mut map = IndexMap::with_capacity(pairs.len());
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| ExecutionError::MalformedInput(pair.to_string()))?;
        map.insert(key.trim().to_string(), value.to_string());
    }
    Ok(map)
}

/// Final argument values for one test, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArguments {
    values: IndexMap<String, String>,
}

impl ResolvedArguments {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.values
    }

    pub fn into_map(self) -> IndexMap<String, String> {
        self.values
    }

    /// Replace every `#{name}` token in `template`.
    ///
    /// Substituted values are not rescanned. An undeclared placeholder is an
    /// error, never an empty substitution.
    pub fn interpolate(&self, template: &str) -> Result<String, ExecutionError> {
        substitute(template.trim(), |name| {
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| ExecutionError::UnboundArgument { name: name.to_string() })
        })
    }
}

/// Placeholder names referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .collect()
}

fn substitute<F>(template: &str, mut lookup: F) -> Result<String, ExecutionError>
where
    F: FnMut(&str) -> Result<String, ExecutionError>,
{
    let mut failure = None;
    let out = placeholder_regex().replace_all(template, |caps: &Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        match lookup(caps[1].trim()) {
            Ok(v) => v,
            Err(e) => {
                failure = Some(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

/// Rewrite `PathToAtomicsFolder\...` references to live under `base_dir`.
pub fn rewrite_atomics_folder(value: &str, base_dir: &Path) -> String {
    let re = atomics_folder_regex();
    if !re.is_match(value) {
        return value.to_string();
    }
    let base = base_dir.display().to_string();
    let base = base.trim_end_matches(['/', '\\']);
    let prefix = format!("{}{}", base, MAIN_SEPARATOR_STR);
    let rewritten = re.replace_all(value, regex::NoExpand(&prefix));
    rewritten.replace(['/', '\\'], MAIN_SEPARATOR_STR)
}

/// Resolve every declared argument of `test`.
pub fn resolve_arguments(
    test: &AtomicTestSpec,
    overrides: &IndexMap<String, String>,
    base_dir: &Path,
) -> Result<ResolvedArguments, ExecutionError> {
    for key in overrides.keys() {
        if !test.input_arguments.contains_key(key) {
            tracing::warn!(test = %test.name, argument = %key, "ignoring override for undeclared argument");
        }
    }

    let mut resolver = Resolver {
        test,
        overrides,
        base_dir,
        done: IndexMap::new(),
        stack: Vec::new(),
    };
    for name in test.input_arguments.keys() {
        resolver.resolve(name)?;
    }

    let values = test
        .input_arguments
        .keys()
        .filter_map(|k| resolver.done.get(k).map(|v| (k.clone(), v.clone())))
        .collect();
    Ok(ResolvedArguments { values })
}

struct Resolver<'a> {
    test: &'a AtomicTestSpec,
    overrides: &'a IndexMap<String, String>,
    base_dir: &'a Path,
    done: IndexMap<String, String>,
    stack: Vec<String>,
}

impl Resolver<'_> {
    fn resolve(&mut self, name: &str) -> Result<String, ExecutionError> {
        if let Some(value) = self.done.get(name) {
            return Ok(value.clone());
        }
        if let Some(pos) = self.stack.iter().position(|n| n == name) {
            let mut chain = self.stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(ExecutionError::ArgumentCycle { chain });
        }
        let test = self.test;
        let spec = test
            .input_arguments
            .get(name)
            .ok_or_else(|| ExecutionError::UnboundArgument { name: name.to_string() })?;

        let raw = match self.overrides.get(name) {
            Some(value) => value.clone(),
            None => {
                let default = spec.default.clone().unwrap_or_default();
                self.stack.push(name.to_string());
                let expanded = substitute(&default, |inner| self.resolve(inner));
                self.stack.pop();
                expanded?
            }
        };

        let value = rewrite_atomics_folder(&raw, self.base_dir);
        check_type(name, &spec.kind, &value)?;
        self.done.insert(name.to_string(), value.clone());
        Ok(value)
    }
}

fn check_type(name: &str, kind: &str, value: &str) -> Result<(), ExecutionError> {
    if value.is_empty() {
        return Ok(());
    }
    let ok = match kind.to_ascii_lowercase().as_str() {
        "integer" => value.trim().parse::<i64>().is_ok(),
        "float" => value.trim().parse::<f64>().is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ExecutionError::InvalidArgumentValue {
            name: name.to_string(),
            kind: kind.to_string(),
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ExecutorSpec, InputArgumentSpec};

    fn arg(kind: &str, default: &str) -> InputArgumentSpec {
        InputArgumentSpec {
            description: String::new(),
            kind: kind.to_string(),
            default: Some(default.to_string()),
        }
    }

    fn test_with(args: &[(&str, InputArgumentSpec)]) -> AtomicTestSpec {
        AtomicTestSpec {
            name: "t".into(),
            guid: None,
            description: String::new(),
            supported_platforms: vec!["linux".into()],
            input_arguments: args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            dependency_executor_name: None,
            dependencies: Vec::new(),
            executor: ExecutorSpec {
                name: "sh".into(),
                ..Default::default()
            },
            signatures: Vec::new(),
        }
    }

    fn base() -> &'static Path {
        Path::new("/opt/atomics")
    }

    #[test]
    fn defaults_used_without_overrides() {
        let test = test_with(&[
            ("target_path", arg("path", r"C:\temp\evil.txt")),
            ("count", arg("integer", "5")),
        ]);
        let resolved = resolve_arguments(&test, &IndexMap::new(), base()).unwrap();
        assert_eq!(resolved.get("target_path"), Some(r"C:\temp\evil.txt"));
        assert_eq!(resolved.get("count"), Some("5"));

        let cmd = resolved.interpolate("type #{target_path}").unwrap();
        assert_eq!(cmd, r"type C:\temp\evil.txt");
    }

    #[test]
    fn override_replaces_only_its_argument() {
        let test = test_with(&[("a", arg("string", "one")), ("b", arg("string", "two"))]);
        let overrides = parse_pairs(&["a=custom"]).unwrap();
        let resolved = resolve_arguments(&test, &overrides, base()).unwrap();
        assert_eq!(resolved.get("a"), Some("custom"));
        assert_eq!(resolved.get("b"), Some("two"));
    }

    #[test]
    fn nested_defaults_resolve_through_overrides() {
        let test = test_with(&[
            ("file", arg("path", "#{dir}/#{name}.txt")),
            ("dir", arg("path", "/tmp")),
            ("name", arg("string", "loot")),
        ]);
        let overrides = parse_pairs(&["dir=/var/tmp"]).unwrap();
        let resolved = resolve_arguments(&test, &overrides, base()).unwrap();
        assert_eq!(resolved.get("file"), Some("/var/tmp/loot.txt"));
        let order: Vec<_> = resolved.as_map().keys().cloned().collect();
        assert_eq!(order, vec!["file", "dir", "name"]);
    }

    #[test]
    fn direct_cycle_detected() {
        let test = test_with(&[("a", arg("string", "x#{a}"))]);
        let err = resolve_arguments(&test, &IndexMap::new(), base()).unwrap_err();
        match err {
            ExecutionError::ArgumentCycle { chain } => assert_eq!(chain, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn indirect_cycle_detected() {
        let test = test_with(&[
            ("a", arg("string", "#{b}")),
            ("b", arg("string", "#{c}")),
            ("c", arg("string", "#{a}")),
        ]);
        let err = resolve_arguments(&test, &IndexMap::new(), base()).unwrap_err();
        match err {
            ExecutionError::ArgumentCycle { chain } => {
                assert_eq!(chain, vec!["a", "b", "c", "a"])
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn override_breaks_cycle() {
        let test = test_with(&[("a", arg("string", "#{b}")), ("b", arg("string", "#{a}"))]);
        let overrides = parse_pairs(&["b=fixed"]).unwrap();
        let resolved = resolve_arguments(&test, &overrides, base()).unwrap();
        assert_eq!(resolved.get("a"), Some("fixed"));
    }

    #[test]
    fn undeclared_placeholder_is_unbound() {
        let test = test_with(&[("a", arg("string", "1"))]);
        let resolved = resolve_arguments(&test, &IndexMap::new(), base()).unwrap();
        let err = resolved.interpolate("echo #{a} #{missing}").unwrap_err();
        assert!(matches!(err, ExecutionError::UnboundArgument { name } if name == "missing"));
    }

    #[test]
    fn default_referencing_undeclared_is_unbound() {
        let test = test_with(&[("a", arg("string", "#{ghost}"))]);
        let err = resolve_arguments(&test, &IndexMap::new(), base()).unwrap_err();
        assert!(matches!(err, ExecutionError::UnboundArgument { name } if name == "ghost"));
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let test = test_with(&[("a", arg("string", "1"))]);
        let overrides = parse_pairs(&["a=#{b}"]).unwrap();
        let resolved = resolve_arguments(&test, &overrides, base()).unwrap();
        assert_eq!(resolved.interpolate("echo #{a}").unwrap(), "echo #{b}");
    }

    #[test]
    fn expands_comma_separated_pairs() {
        let pairs = expand_pairs(&["a=1,b=2", "c=x=y"]);
        assert_eq!(pairs, vec!["a=1", "b=2", "c=x=y"]);
        let map = parse_pairs(&pairs).unwrap();
        assert_eq!(map["c"], "x=y");
    }

    #[test]
    fn malformed_pair_rejected() {
        assert!(matches!(parse_pairs(&["novalue"]), Err(ExecutionError::MalformedInput(_))));
        assert!(matches!(parse_pairs(&["=v"]), Err(ExecutionError::MalformedInput(_))));
    }

    #[test]
    fn integer_override_validated() {
        let test = test_with(&[("n", arg("Integer", "1"))]);
        let overrides = parse_pairs(&["n=lots"]).unwrap();
        let err = resolve_arguments(&test, &overrides, base()).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidArgumentValue { .. }));
    }

    #[test]
    fn atomics_folder_rewritten() {
        let test = test_with(&[(
            "bin",
            arg("path", r"PathToAtomicsFolder\T1003\bin\tool.exe"),
        )]);
        let resolved = resolve_arguments(&test, &IndexMap::new(), base()).unwrap();
        let sep = MAIN_SEPARATOR_STR;
        let expected = format!("{sep}opt{sep}atomics{sep}T1003{sep}bin{sep}tool.exe");
        assert_eq!(resolved.get("bin"), Some(expected.as_str()));
    }

    #[test]
    fn unrelated_values_untouched_by_folder_rewrite() {
        assert_eq!(rewrite_atomics_folder("https://x/y", base()), "https://x/y");
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(placeholders("#{a} and #{ b } #{a}"), vec!["a", "b", "a"]);
    }
}
