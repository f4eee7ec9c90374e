//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs: the custom alias
//! allow-list, the cache listing parser and the catalog/cache merge rule.

use foundry_orchestrator::cache::{parse_cache_listing, validate_cache_path, validate_cli_alias};
use foundry_orchestrator::orchestrator::merge_catalog_and_cache;
use foundry_orchestrator::{CacheModelRecord, CatalogModel, ModelSource};
use proptest::prelude::*;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

/// Aliases built only from allowed segments joined by single dashes
fn arb_valid_alias() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z0-9_]{1,8}", 1..5).prop_map(|segments| segments.join("-"))
}

fn arb_catalog_model() -> impl Strategy<Value = CatalogModel> {
    ("[a-z0-9]{1,6}", "[a-z0-9]{1,6}").prop_map(|(id, alias)| CatalogModel {
        id: format!("cat-{}", id),
        alias: format!("cat-{}", alias),
        device_type: "CPU".to_string(),
        execution_provider: "CPUExecutionProvider".to_string(),
        model_size: "1 MB".to_string(),
        version: "1".to_string(),
    })
}

fn arb_cache_record() -> impl Strategy<Value = CacheModelRecord> {
    ("[a-z0-9]{1,6}", "[a-z0-9]{1,6}").prop_map(|(id, alias)| CacheModelRecord {
        description: alias.clone(),
        alias,
        id,
        source: ModelSource::Cache,
    })
}

// =============================================================================
// Alias allow-list
// =============================================================================

proptest! {
    #[test]
    fn valid_aliases_are_accepted(alias in arb_valid_alias()) {
        prop_assert!(validate_cli_alias(&alias).is_ok());
    }

    #[test]
    fn aliases_with_shell_metacharacters_are_rejected(
        prefix in "[a-z]{0,5}",
        meta in prop::sample::select(vec![';', '&', '|', '$', '`', ' ', '/', '\'', '"', '\n', '>', '<', '*']),
        suffix in "[a-z]{0,5}",
    ) {
        let alias = format!("{}{}{}", prefix, meta, suffix);
        prop_assert!(validate_cli_alias(&alias).is_err());
    }

    #[test]
    fn dash_edges_and_double_dashes_are_rejected(alias in arb_valid_alias()) {
        let leading = format!("-{}", alias);
        let trailing = format!("{}-", alias);
        let doubled = format!("{}--{}", alias, alias);
        prop_assert!(validate_cli_alias(&leading).is_err());
        prop_assert!(validate_cli_alias(&trailing).is_err());
        prop_assert!(validate_cli_alias(&doubled).is_err());
    }
}

// =============================================================================
// Cache listing parser
// =============================================================================

proptest! {
    #[test]
    fn listing_parser_never_panics(input in "\\PC*") {
        let _ = parse_cache_listing(&input);
    }

    #[test]
    fn lines_without_marker_are_ignored(lines in prop::collection::vec("[A-Za-z0-9 :.-]{0,40}", 0..10)) {
        let output = lines.join("\n");
        prop_assert!(parse_cache_listing(&output).is_empty());
    }

    #[test]
    fn marker_lines_round_trip(entries in prop::collection::vec(("[a-z0-9][a-z0-9.-]{0,20}", "[A-Za-z0-9][A-Za-z0-9:._-]{0,30}"), 1..8)) {
        let mut output = String::from("Models cached on device:\n   Alias    Model ID\n");
        for (alias, id) in &entries {
            output.push_str(&format!("💾 {:<30}  {}\n", alias, id));
        }

        let parsed = parse_cache_listing(&output);
        prop_assert_eq!(parsed.len(), entries.len());
        for (record, (alias, id)) in parsed.iter().zip(entries.iter()) {
            prop_assert_eq!(&record.alias, alias);
            prop_assert_eq!(&record.id, id);
        }
    }
}

// =============================================================================
// Cache path validation
// =============================================================================

proptest! {
    #[test]
    fn paths_under_denied_roots_are_rejected(
        root in prop::sample::select(vec!["/etc", "/sys", "/proc", "/root", "/bin", "/sbin", "/usr/bin", "/usr/sbin"]),
        tail in prop::collection::vec("[a-z0-9]{1,8}", 0..4),
    ) {
        let path = std::iter::once(root.to_string())
            .chain(tail)
            .collect::<Vec<_>>()
            .join("/");
        prop_assert!(validate_cache_path(&path).is_err());
    }

    #[test]
    fn paths_with_nul_are_rejected(prefix in "/tmp/[a-z]{1,8}", suffix in "[a-z]{0,8}") {
        let path = format!("{}\0{}", prefix, suffix);
        prop_assert!(validate_cache_path(&path).is_err());
    }
}

// =============================================================================
// Merge rule
// =============================================================================

proptest! {
    #[test]
    fn merge_keeps_catalog_and_flags_only_unknown_cache_entries(
        catalog in prop::collection::vec(arb_catalog_model(), 0..6),
        cache in prop::collection::vec(arb_cache_record(), 0..6),
    ) {
        let merged = merge_catalog_and_cache(&catalog, &cache);

        // Every catalog entry comes first, never custom
        prop_assert!(merged.len() >= catalog.len());
        for (model, entry) in merged.iter().zip(catalog.iter()) {
            prop_assert_eq!(&model.id, &entry.id);
            prop_assert!(!model.is_custom);
        }

        // Cache entries never collide with catalog names (distinct prefixes)
        for custom in &merged[catalog.len()..] {
            prop_assert!(custom.is_custom);
            prop_assert_eq!(custom.source, ModelSource::Cache);
        }
    }

    #[test]
    fn cache_entries_matching_catalog_are_not_custom(
        catalog in prop::collection::vec(arb_catalog_model(), 1..6),
        pick in any::<prop::sample::Index>(),
        by_alias in any::<bool>(),
    ) {
        let target = &catalog[pick.index(catalog.len())];
        let record = if by_alias {
            CacheModelRecord {
                alias: target.alias.clone(),
                id: "some-local-build".to_string(),
                description: target.alias.clone(),
                source: ModelSource::Cache,
            }
        } else {
            CacheModelRecord {
                alias: "local-name".to_string(),
                id: target.id.clone(),
                description: "local-name".to_string(),
                source: ModelSource::Cache,
            }
        };

        let merged = merge_catalog_and_cache(&catalog, &[record]);
        prop_assert!(merged.iter().all(|m| !m.is_custom));
    }
}
