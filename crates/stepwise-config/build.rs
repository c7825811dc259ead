//! Build script for stepwise-config
//!
//! Embeds the config templates kept at the workspace root and refuses to
//! build when the minimal template names a section the full one lacks.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// (constant name, file at the workspace root)
const TEMPLATES: &[(&str, &str)] = &[
    ("FULL_CONFIG", "stepwise.toml"),
    ("MINIMAL_CONFIG", "stepwise.minimal.toml"),
];

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let workspace_root = Path::new(&manifest_dir)
        .ancestors()
        .nth(2)
        .expect("stepwise-config must live in <root>/crates/")
        .to_path_buf();

    let mut generated = String::new();
    let mut sections = Vec::new();
    for (name, file) in TEMPLATES {
        let path = workspace_root.join(file);
        println!("cargo:rerun-if-changed={}", path.display());
        let text = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Cannot read config template {}: {}", path.display(), e));

        sections.push((*file, section_headers(&text)));
        generated.push_str(&format!(
            "/// Embedded copy of `{file}` from the workspace root\npub const {name}: &str = {text:?};\n\n"
        ));
    }

    let (full_file, full_sections) = &sections[0];
    for (file, headers) in &sections[1..] {
        for header in headers {
            assert!(
                full_sections.contains(header),
                "{file} has section [{header}] missing from {full_file}"
            );
        }
    }

    let dest = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set")).join("embedded_configs.rs");
    fs::write(&dest, generated).expect("Cannot write embedded_configs.rs");
    println!("cargo:rerun-if-changed=build.rs");
}

/// `[section]` headers of a template, commented-out ones included.
fn section_headers(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .map(str::to_string)
        .collect()
}
