//! Object and label name generation
//!
//! Every generated name is `<prefix>-<suffix>`, where the prefix keeps it
//! traceable to the infrastructure and role that produced it and the suffix
//! is a random hex string. Names are valid DNS-1123 labels.

use uuid::Uuid;

/// Longest name the platform accepts for services and label values
pub const MAX_NAME_LEN: usize = 63;

const SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct NameGenerator;

impl NameGenerator {
    pub fn new() -> Self {
        Self
    }

    /// `generate("infra1-master-svc")` -> `infra1-master-svc-1a2b3c4d`
    pub fn generate(&self, prefix: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..SUFFIX_LEN];

        let mut prefix = sanitize(prefix);
        prefix.truncate(MAX_NAME_LEN - SUFFIX_LEN - 1);
        let prefix = prefix.trim_end_matches('-');

        if prefix.is_empty() {
            format!("obi-{}", suffix)
        } else {
            format!("{}-{}", prefix, suffix)
        }
    }

    /// Name for an object belonging to `infrastructure` in the given role
    pub fn object_name(&self, infrastructure: &str, role: &str) -> String {
        self.generate(&format!("{}-{}", infrastructure, role))
    }

    /// Fresh infrastructure name when the descriptor does not set one
    pub fn infrastructure_name(&self) -> String {
        self.generate("obi-infrastructure")
    }
}

/// Lowercase alphanumerics and '-', starting with a letter
pub fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }

    collapsed
        .trim_start_matches(|c: char| !c.is_ascii_lowercase())
        .to_string()
}

/// Whether `name` can be used as-is for a workload or endpoint
///
/// Service names are DNS-1035 labels, so the first character must be a
/// letter.
pub fn is_valid_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_names_are_unique() {
        let names = NameGenerator::new();
        let generated: HashSet<String> =
            (0..500).map(|_| names.generate("infra1-master")).collect();
        assert_eq!(generated.len(), 500);
    }

    #[test]
    fn test_generated_name_keeps_prefix() {
        let name = NameGenerator::new().object_name("infra1", "heartbeat-svc");
        assert!(name.starts_with("infra1-heartbeat-svc-"));
        assert!(is_valid_name(&name));
    }

    #[test]
    fn test_long_prefix_is_truncated() {
        let long = "x".repeat(120);
        let name = NameGenerator::new().generate(&long);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(is_valid_name(&name));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("My_Infra.Prod"), "my-infra-prod");
        assert_eq!(sanitize("--a__b"), "a-b");
        assert_eq!(sanitize("9-lives"), "lives");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_numeric_prefix_still_starts_with_letter() {
        let name = NameGenerator::new().generate("2024");
        assert!(name.starts_with("obi-"));
        assert!(is_valid_name(&name));
    }

    #[test]
    fn test_empty_prefix_falls_back() {
        let name = NameGenerator::new().generate("___");
        assert!(name.starts_with("obi-"));
        assert!(is_valid_name(&name));
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("infra1"));
        assert!(!is_valid_name("Infra1"));
        assert!(!is_valid_name("infra1-"));
        assert!(!is_valid_name("1infra"));
        assert!(!is_valid_name("-infra"));
        assert!(!is_valid_name(""));
    }
}
