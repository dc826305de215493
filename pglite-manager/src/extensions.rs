// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// Where the engine runtime finds an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionSpec {
    /// Module path handed to `require`.
    pub module: &'static str,
    /// Symbol exported by that module.
    pub symbol: &'static str,
}

static SUPPORTED_EXTENSIONS: phf::Map<&'static str, ExtensionSpec> = phf_map! {
    "pgvector" => ExtensionSpec { module: "@electric-sql/pglite/vector", symbol: "vector" },
    "pg_trgm" => ExtensionSpec { module: "@electric-sql/pglite/contrib/pg_trgm", symbol: "pg_trgm" },
    "btree_gin" => ExtensionSpec { module: "@electric-sql/pglite/contrib/btree_gin", symbol: "btree_gin" },
    "btree_gist" => ExtensionSpec { module: "@electric-sql/pglite/contrib/btree_gist", symbol: "btree_gist" },
    "fuzzystrmatch" => ExtensionSpec { module: "@electric-sql/pglite/contrib/fuzzystrmatch", symbol: "fuzzystrmatch" },
};

pub fn lookup(name: &str) -> Option<&'static ExtensionSpec> {
    SUPPORTED_EXTENSIONS.get(name)
}

/// Registered extension names, sorted.
pub fn supported_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = SUPPORTED_EXTENSIONS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// One entry of the launcher's extension list: `registry_key` is the key in the
/// engine's `extensions` object, bound to `require(module_path)[import_name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionImport {
    pub import_name: String,
    pub module_path: String,
    pub registry_key: String,
}

impl ExtensionImport {
    pub(crate) fn resolve(name: &str) -> Option<Self> {
        lookup(name).map(|spec| ExtensionImport {
            import_name: spec.symbol.to_string(),
            module_path: spec.module.to_string(),
            registry_key: name.to_string(),
        })
    }
}
